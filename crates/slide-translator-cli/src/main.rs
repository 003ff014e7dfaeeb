//! Slide Translator CLI - Command line tool for translating presentation text.

mod progress;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use progress::BarProgress;
use slide_translator_core::{
    AppConfig, CheckpointStore, DocumentFile, FragmentFile, Lang, ListedCheckpoint, RunOptions,
    SlideTranslator, TraversalOptions, util::translated_output_path,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "slide-translate")]
#[command(author, version, about = "Translate presentation text with an LLM, resumably", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Checkpoint directory (default: ./translation_recovery)
    #[arg(long, global = true)]
    checkpoint_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Translate a slide deck or fragment file
    Translate(TranslateArgs),
    /// List checkpoints with their progress
    List,
    /// Show one checkpoint in detail
    Status {
        /// Checkpoint file
        checkpoint: PathBuf,
    },
    /// Write the translations stored in a checkpoint
    Export {
        /// Checkpoint file
        checkpoint: PathBuf,

        /// Output JSON file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct TranslateArgs {
    /// Input JSON file (slide deck or fragments)
    input: PathBuf,

    /// Output file (default: input-<target>.json)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Source language code
    #[arg(short = 's', long)]
    source: Option<String>,

    /// Target language code
    #[arg(short = 't', long)]
    target: Option<String>,

    /// Resume from a checkpoint file
    #[arg(long)]
    resume: Option<PathBuf>,

    /// Treat the input as a flat fragment file even if it looks like a deck
    #[arg(long)]
    fragments: bool,

    /// Only translate plain text shapes (no tables, charts, notes or groups)
    #[arg(long)]
    text_only: bool,

    /// OpenAI API base URL
    #[arg(long, env = "OPENAI_API_BASE")]
    api_base: Option<String>,

    /// OpenAI API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Model name for OpenAI-compatible API
    #[arg(long, env = "OPENAI_MODEL")]
    model: Option<String>,

    /// Token ceiling per batch (default depends on the target language)
    #[arg(long)]
    max_tokens: Option<usize>,
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = if let Some(config_path) = &cli.config {
        AppConfig::from_file(config_path).context("Failed to load config file")?
    } else {
        AppConfig::load()
    };
    if let Some(dir) = &cli.checkpoint_dir {
        config.checkpoint.dir.clone_from(dir);
    }
    Ok(config)
}

fn load_document(args: &TranslateArgs) -> Result<DocumentFile> {
    if args.fragments {
        let content = std::fs::read_to_string(&args.input)
            .context(format!("Failed to read {}", args.input.display()))?;
        let value: serde_json::Value =
            serde_json::from_str(&content).context("Input is not valid JSON")?;
        return Ok(DocumentFile::Fragments(FragmentFile::from_value(value)?));
    }
    DocumentFile::from_file(&args.input)
        .context(format!("Failed to load {}", args.input.display()))
}

async fn translate(mut config: AppConfig, args: TranslateArgs) -> Result<()> {
    // Override config with CLI arguments
    if let Some(source) = &args.source {
        config.source_lang = Lang::new(source);
    }
    if let Some(target) = &args.target {
        config.target_lang = Lang::new(target);
    }
    if let Some(api_base) = args.api_base.clone() {
        config.translator.api_base = api_base;
    }
    if args.api_key.is_some() {
        config.translator.api_key.clone_from(&args.api_key);
    }
    if let Some(model) = args.model.clone() {
        config.translator.model = model;
    }
    if args.max_tokens.is_some() {
        config.batch.max_tokens = args.max_tokens;
    }
    config.validate()?;

    info!("Loading document: {}", args.input.display());
    let document = load_document(&args)?;

    let progress = Arc::new(BarProgress::new());
    let translator = SlideTranslator::new(config.clone())
        .context("Failed to initialize translator")?
        .with_progress(progress.clone());

    let traversal = if args.text_only {
        TraversalOptions::text_only()
    } else {
        TraversalOptions::default()
    };
    let options = RunOptions {
        resume: args.resume.clone(),
        file_id: args
            .input
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string),
    };

    let translated = translator
        .translate_document(document, &traversal, options)
        .await
        .context("Translation failed")?;
    progress.finish();

    let output_path = args
        .output
        .unwrap_or_else(|| translated_output_path(&args.input, config.target_lang.as_str()));
    translated
        .document
        .save(&output_path)
        .context(format!("Failed to write output: {}", output_path.display()))?;

    // CLI output is intentional
    #[allow(clippy::print_stdout)]
    {
        println!("{}", translated.outcome.summary);
        println!("  Checkpoint:  {}", translated.outcome.checkpoint_path.display());
        println!("Translated document saved to: {}", output_path.display());
        if !translated.outcome.summary.is_complete() {
            println!(
                "Some fragments are untranslated; rerun with --resume {} to retry them",
                translated.outcome.checkpoint_path.display()
            );
        }
    }

    Ok(())
}

#[allow(clippy::print_stdout)]
fn list(config: &AppConfig) -> Result<()> {
    let store = CheckpointStore::new(config.checkpoint.dir.clone());
    let listed = store.list()?;

    if listed.is_empty() {
        println!("No checkpoints in {}", store.dir().display());
        return Ok(());
    }

    println!("Checkpoints in {}:", store.dir().display());
    for entry in listed {
        match entry {
            ListedCheckpoint::Valid(summary) => {
                let name = summary
                    .path
                    .file_name()
                    .map_or_else(String::new, |n| n.to_string_lossy().into_owned());
                println!("\n{name}");
                println!(
                    "  {} {} -> {}: {}/{} ({:.1}%)",
                    summary.file_id.as_deref().unwrap_or(&summary.job_id),
                    summary.source_lang,
                    summary.target_lang,
                    summary.translated,
                    summary.total,
                    summary.progress_percent
                );
                if !summary.failed_batches.is_empty() {
                    println!("  Failed batches: {}", summary.failed_batches.join(", "));
                }
                println!("  Started:      {}", summary.created_at.format("%Y-%m-%d %H:%M:%S"));
                println!("  Last updated: {}", summary.updated_at.format("%Y-%m-%d %H:%M:%S"));
            }
            ListedCheckpoint::Unreadable { path, reason } => {
                println!("\n{} (unreadable: {reason})", path.display());
            }
        }
    }
    Ok(())
}

#[allow(clippy::print_stdout)]
fn status(path: &Path) -> Result<()> {
    let state = CheckpointStore::load(path)?;
    let translated = state.reconstruct().len();

    println!("Job {}", state.job_id);
    if let Some(file_id) = &state.file_id {
        println!("  File:        {file_id}");
    }
    println!("  Languages:   {} -> {}", state.source_lang, state.target_lang);
    println!(
        "  Progress:    {}/{} ({:.1}%)",
        translated,
        state.total_fragment_count,
        state.progress_percent()
    );
    println!("  Batches:     {} completed", state.completed_batch_ids.len());
    println!("  Recovery:    {} rounds", state.recovery_rounds);
    println!(
        "  API usage:   {} calls, {} tokens",
        state.usage.api_calls,
        state.usage.total_tokens()
    );
    for failed in &state.failed_batches {
        println!(
            "  Failed {}: {} fragments, {} unresolved ({})",
            failed.batch_id,
            failed.fragment_ids.len(),
            failed.pending_ids().len(),
            failed.error
        );
    }
    println!("  Started:     {}", state.created_at.to_rfc3339());
    println!("  Updated:     {}", state.updated_at.to_rfc3339());
    Ok(())
}

fn export(path: &Path, output: Option<&Path>) -> Result<()> {
    let translations = CheckpointStore::export_translations(path)?;
    let json = serde_json::to_string_pretty(&translations)?;

    match output {
        Some(output) => {
            std::fs::write(output, json)
                .context(format!("Failed to write output: {}", output.display()))?;
            info!("Exported {} translations to {}", translations.len(), output.display());
        }
        None => {
            // CLI output is intentional
            #[allow(clippy::print_stdout)]
            {
                println!("{json}");
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before parsing args so env vars are available)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let config = load_config(&cli)?;

    match cli.command {
        Command::Translate(args) => translate(config, args).await,
        Command::List => list(&config),
        Command::Status { checkpoint } => status(&checkpoint),
        Command::Export { checkpoint, output } => export(&checkpoint, output.as_deref()),
    }
}
