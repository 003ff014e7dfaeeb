//! Prompt construction for batch translation requests.

use crate::batch::Batch;
use crate::config::Lang;
use crate::document::DocumentContext;
use crate::error::Result;

use super::traits::BackendRequest;

/// System instructions for a language pair.
pub fn system_instructions(source: &Lang, target: &Lang) -> String {
    let source = language_name(source);
    let target = language_name(target);
    format!(
        "You are a professional translator. Translate from {source} to {target}.\n\
         Ensure consistency in terminology and contextual meaning across the whole presentation.\n\
         \n\
         IMPORTANT: If you encounter text that already appears to be in {target}, \
         preserve it exactly as is without any changes."
    )
}

/// User message carrying the slide context and the batch payload.
pub fn user_message(
    batch: &Batch,
    context_json: &str,
    source: &Lang,
    target: &Lang,
) -> Result<String> {
    let source = language_name(source);
    let target = language_name(target);
    let payload = serde_json::to_string_pretty(&batch.fragments)?;

    Ok(format!(
        "Translate the values of the following JSON object from {source} to {target}.\n\
         Use the slide context below for terminology and consistency.\n\
         \n\
         IMPORTANT INSTRUCTIONS:\n\
         - If a value already appears to be in {target}, keep it exactly as is.\n\
         - Return exactly the same keys, one translated value per key. Do not add or drop keys.\n\
         - Do NOT escape newlines as \\n or tabs as \\t; use the actual characters.\n\
         - Return VALID JSON with all keys and string values in double quotes.\n\
         - Do not include any trailing commas.\n\
         \n\
         This is batch {label} with {count} items.\n\
         \n\
         Slide context:\n\
         {context_json}\n\
         \n\
         Now translate this JSON object, preserving its keys:\n\
         {payload}\n\
         \n\
         Reply ONLY with the translated JSON object.",
        label = batch.id,
        count = batch.len(),
    ))
}

/// Build the full request for one batch.
pub fn build_request(
    batch: &Batch,
    context_json: &str,
    source: &Lang,
    target: &Lang,
) -> Result<BackendRequest> {
    Ok(BackendRequest {
        label: batch.id.clone(),
        system: system_instructions(source, target),
        user: user_message(batch, context_json, source, target)?,
        payload: batch.fragments.clone(),
    })
}

/// Serialize the slide context once per job.
pub fn render_context(context: &DocumentContext) -> Result<String> {
    Ok(serde_json::to_string_pretty(context)?)
}

/// Convert language code to human-readable name for prompts
pub fn language_name(lang: &Lang) -> &str {
    match lang.as_str() {
        "en" => "English",
        "zh-CN" | "zh" => "Simplified Chinese",
        "zh-TW" => "Traditional Chinese",
        "ja" => "Japanese",
        "ko" => "Korean",
        "es" => "Spanish",
        "fr" => "French",
        "de" => "German",
        "it" => "Italian",
        "pt" => "Portuguese",
        "nl" => "Dutch",
        "ru" => "Russian",
        "ar" => "Arabic",
        "hi" => "Hindi",
        "th" => "Thai",
        "vi" => "Vietnamese",
        // The model understands most ISO codes
        other => other,
    }
}
