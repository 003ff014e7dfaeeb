//! Integration tests for slide-translator-core
//!
//! These tests drive whole jobs through the orchestrator:
//! - Deduplication and fan-out
//! - Retries, recovery splitting and the final sweep
//! - Checkpoint resume
//! - The OpenAI-compatible backend against a mock HTTP server

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;
use slide_translator_core::{
    AppConfig, Backend, BatchConfig, CheckpointConfig, CheckpointStore, Deck, Error, FragmentSet,
    Lang, ListedCheckpoint, OpenAiBackend, Orchestrator, Result, RetryConfig, RunOptions,
    SlideTranslator, TranslationResult, TranslatorConfig, TraversalOptions,
    translator::{BackendInfo, BackendReply, BackendRequest, TokenUsage},
};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// =============================================================================
// Scripted Backend for Testing
// =============================================================================

type Script = dyn Fn(usize, &BackendRequest) -> Result<BackendReply> + Send + Sync;

/// A backend driven by a closure that sees the call index and the request.
/// Every request is recorded for later inspection.
struct ScriptedBackend {
    script: Box<Script>,
    calls: AtomicUsize,
    requests: Mutex<Vec<BackendRequest>>,
}

impl ScriptedBackend {
    fn new(script: impl Fn(usize, &BackendRequest) -> Result<BackendReply> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Translates every payload value with `translate`.
    fn mapping(translate: fn(&str) -> String) -> Arc<Self> {
        Self::new(move |_, request| reply_with(&request.payload, translate))
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn requests(&self) -> Vec<BackendRequest> {
        self.requests.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn info(&self) -> BackendInfo {
        BackendInfo { name: "scripted" }
    }

    async fn complete(&self, request: &BackendRequest) -> Result<BackendReply> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .expect("lock poisoned")
            .push(request.clone());
        (self.script)(index, request)
    }
}

fn reply_with(payload: &FragmentSet, translate: impl Fn(&str) -> String) -> Result<BackendReply> {
    let translated: TranslationResult = payload
        .iter()
        .map(|(id, text)| (id.clone(), translate(text)))
        .collect();
    Ok(BackendReply {
        text: serde_json::to_string(&translated)?,
        usage: Some(TokenUsage {
            input_tokens: 100,
            output_tokens: 50,
        }),
    })
}

fn to_french(text: &str) -> String {
    match text {
        "Hello" => "Bonjour".to_string(),
        "World" => "Monde".to_string(),
        other => format!("fr:{other}"),
    }
}

fn shout(text: &str) -> String {
    text.to_uppercase()
}

// =============================================================================
// Test Fixtures
// =============================================================================

fn test_config(dir: &Path) -> AppConfig {
    AppConfig {
        retry: RetryConfig::immediate(),
        checkpoint: CheckpointConfig {
            dir: dir.to_path_buf(),
        },
        ..AppConfig::default()
    }
}

fn set(pairs: &[(&str, &str)]) -> FragmentSet {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

/// `count` fragments of equal length so batch order follows id order
fn numbered(count: usize) -> FragmentSet {
    (0..count)
        .map(|i| (format!("f{i:02}"), format!("Fragment text {i:02}")))
        .collect()
}

async fn run(backend: Arc<ScriptedBackend>, config: AppConfig, fragments: &FragmentSet) -> slide_translator_core::JobOutcome {
    Orchestrator::new(backend, config)
        .run(fragments, &Vec::new(), RunOptions::default())
        .await
        .expect("job should finish")
}

// =============================================================================
// Deduplication Tests
// =============================================================================

#[tokio::test]
async fn test_duplicates_translated_once_and_fanned_out() {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = ScriptedBackend::mapping(to_french);
    let fragments = set(&[("a", "Hello"), ("b", "World"), ("c", "Hello")]);

    let outcome = run(backend.clone(), test_config(dir.path()), &fragments).await;

    assert_eq!(
        outcome.result,
        set(&[("a", "Bonjour"), ("b", "Monde"), ("c", "Bonjour")])
    );
    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    assert!(!requests[0].payload.contains_key("c"));
    assert_eq!(outcome.summary.duplicates, 1);
    assert_eq!(outcome.summary.usage.api_calls, 1);
    assert_eq!(outcome.summary.backend, "scripted");
}

// =============================================================================
// Retry and Recovery Tests
// =============================================================================

#[tokio::test]
async fn test_transient_failures_retried_within_budget() {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = ScriptedBackend::new(|index, request| {
        if index < 2 {
            Err(Error::TranslationRequest("HTTP 503: overloaded".to_string()))
        } else {
            reply_with(&request.payload, to_french)
        }
    });
    let mut config = test_config(dir.path());
    config.retry.max_retries = 2;

    let fragments = set(&[("a", "Hello"), ("b", "World")]);
    let outcome = run(backend.clone(), config, &fragments).await;

    assert_eq!(backend.calls(), 3);
    assert!(outcome.summary.is_complete());
    assert_eq!(outcome.summary.failed_batches, 0);

    let state = CheckpointStore::load(&outcome.checkpoint_path).expect("checkpoint");
    assert!(state.completed_batch_ids.contains("batch_1"));
}

#[tokio::test]
async fn test_rate_limit_then_success() {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = ScriptedBackend::new(|index, request| {
        if index == 0 {
            Err(Error::TranslationRateLimited {
                retry_after: Some(0),
            })
        } else {
            reply_with(&request.payload, shout)
        }
    });

    let outcome = run(backend.clone(), test_config(dir.path()), &set(&[("a", "hi")])).await;

    assert_eq!(backend.calls(), 2);
    assert_eq!(outcome.result["a"], "HI");
}

#[tokio::test]
async fn test_failed_batch_split_into_sub_batches() {
    let dir = tempfile::tempdir().expect("tempdir");
    // The full batch always fails, and so does any batch holding f10
    let backend = ScriptedBackend::new(|_, request| {
        if request.payload.len() == 20 || request.payload.contains_key("f10") {
            Err(Error::TranslationTimeout)
        } else {
            reply_with(&request.payload, shout)
        }
    });
    let mut config = test_config(dir.path());
    config.retry.max_retries = 0;
    config.retry.recovery_max_retries = 0;
    config.retry.recovery_divisor = 4;
    config.retry.min_recovery_chunk = 1;

    let fragments = numbered(20);
    let outcome = run(backend.clone(), config, &fragments).await;

    let sub_batches: Vec<String> = backend
        .requests()
        .iter()
        .filter(|r| r.label.starts_with("batch_1_sub_"))
        .map(|r| r.label.clone())
        .collect();
    assert_eq!(
        sub_batches,
        vec!["batch_1_sub_1", "batch_1_sub_2", "batch_1_sub_3", "batch_1_sub_4"]
    );
    for request in backend.requests() {
        if request.label.starts_with("batch_1_sub_") {
            assert_eq!(request.payload.len(), 5);
        }
    }

    assert_eq!(outcome.summary.translated, 15);
    assert_eq!(outcome.summary.missing.len(), 5);
    assert!(outcome.summary.missing.contains(&"f10".to_string()));
    assert_eq!(outcome.summary.failed_batches, 1);
    assert_eq!(outcome.summary.partial_failures, 1);

    let state = CheckpointStore::load(&outcome.checkpoint_path).expect("checkpoint");
    let failed = &state.failed_batches[0];
    assert_eq!(failed.batch_id, "batch_1");
    assert_eq!(failed.fragment_ids.len(), 20);
    assert_eq!(failed.unresolved_ids.len(), 5);
    assert!(failed.unresolved_ids.contains(&"f10".to_string()));
}

#[tokio::test]
async fn test_failed_batch_removed_when_all_sub_batches_succeed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = ScriptedBackend::new(|_, request| {
        if request.label == "batch_1" {
            Err(Error::TranslationInvalidResponse("empty".to_string()))
        } else {
            reply_with(&request.payload, shout)
        }
    });
    let mut config = test_config(dir.path());
    config.retry.max_retries = 1;

    let outcome = run(backend, config, &numbered(9)).await;

    assert!(outcome.summary.is_complete());
    assert_eq!(outcome.summary.failed_batches, 0);
}

#[tokio::test]
async fn test_final_sweep_fills_omissions() {
    let dir = tempfile::tempdir().expect("tempdir");
    // First reply drops the last two keys
    let backend = ScriptedBackend::new(|index, request| {
        if index == 0 {
            let kept: FragmentSet = request
                .payload
                .iter()
                .take(request.payload.len() - 2)
                .map(|(id, text)| (id.clone(), text.clone()))
                .collect();
            reply_with(&kept, shout)
        } else {
            reply_with(&request.payload, shout)
        }
    });

    let fragments = numbered(10);
    let outcome = run(backend.clone(), test_config(dir.path()), &fragments).await;

    assert!(outcome.summary.is_complete());
    assert_eq!(outcome.result.len(), 10);
    let requests = backend.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].label, "final_1");
    assert_eq!(requests[1].payload.len(), 2);
}

#[tokio::test]
async fn test_malformed_reply_is_repaired() {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = ScriptedBackend::new(|_, _| {
        Ok(BackendReply::text(
            "```json\n{\"a\": \"Bonjour\nle monde\", b: \"Salut\",}\n```",
        ))
    });
    let fragments = set(&[("a", "Hello world"), ("b", "Hi")]);

    let outcome = run(backend.clone(), test_config(dir.path()), &fragments).await;

    assert_eq!(backend.calls(), 1);
    assert_eq!(outcome.result["a"], "Bonjour\nle monde");
    assert_eq!(outcome.result["b"], "Salut");
}

#[tokio::test]
async fn test_reply_filtered_and_stringified() {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = ScriptedBackend::new(|_, _| {
        Ok(BackendReply::text(r#"{"a": 2024, "b": "Deux", "unasked": "x"}"#))
    });
    let fragments = set(&[("a", "2024"), ("b", "Two")]);

    let outcome = run(backend, test_config(dir.path()), &fragments).await;

    assert_eq!(outcome.result, set(&[("a", "2024"), ("b", "Deux")]));
}

#[tokio::test]
async fn test_unusable_replies_exhaust_retries() {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = ScriptedBackend::new(|_, _| Ok(BackendReply::text("I cannot help with that.")));
    let mut config = test_config(dir.path());
    config.retry.max_retries = 0;
    config.retry.recovery_max_retries = 1;

    let outcome = run(backend.clone(), config, &set(&[("a", "Hello")])).await;

    // 1 attempt, then 2 each for the recovery sub-batch and the final sweep
    assert_eq!(backend.calls(), 5);
    assert_eq!(outcome.summary.missing, vec!["a".to_string()]);
    assert_eq!(outcome.summary.failed_batches, 1);
}

#[tokio::test]
async fn test_non_transient_errors_are_not_retried() {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = ScriptedBackend::new(|_, _| Err(Error::Io(std::io::Error::other("disk full"))));

    let outcome = run(backend.clone(), test_config(dir.path()), &set(&[("a", "Hello")])).await;

    // One call each for the batch, its recovery sub-batch and the final sweep
    assert_eq!(backend.calls(), 3);
    assert_eq!(outcome.summary.missing, vec!["a".to_string()]);
    assert_eq!(outcome.summary.failed_batches, 1);
}

// =============================================================================
// Checkpoint and Resume Tests
// =============================================================================

fn small_batches(dir: &Path) -> AppConfig {
    AppConfig {
        batch: BatchConfig {
            max_tokens: Some(40),
            prompt_overhead: 10,
            per_item_overhead: 0,
        },
        ..test_config(dir)
    }
}

#[tokio::test]
async fn test_resume_matches_uninterrupted_run() {
    let fragments = numbered(20);

    let clean_dir = tempfile::tempdir().expect("tempdir");
    let clean = ScriptedBackend::mapping(shout);
    let expected = run(clean.clone(), small_batches(clean_dir.path()), &fragments).await;
    let total_batches = clean.calls();
    assert!(total_batches >= 3, "need several batches, got {total_batches}");

    // Crash on the third call
    let dir = tempfile::tempdir().expect("tempdir");
    let crashing = ScriptedBackend::new(|index, request| {
        if index >= 2 {
            Err(Error::TranslationMissingApiKey)
        } else {
            reply_with(&request.payload, shout)
        }
    });
    let err = Orchestrator::new(crashing, small_batches(dir.path()))
        .run(&fragments, &Vec::new(), RunOptions::default())
        .await
        .expect_err("fatal error should abort");
    assert!(err.is_fatal());

    let listed = CheckpointStore::new(dir.path()).list().expect("list");
    let checkpoint = match listed.as_slice() {
        [ListedCheckpoint::Valid(summary)] => summary.clone(),
        other => panic!("expected one checkpoint, got {other:?}"),
    };
    let state = CheckpointStore::load(&checkpoint.path).expect("checkpoint");
    assert_eq!(state.completed_batch_ids.len(), 2);

    let resumed_backend = ScriptedBackend::mapping(shout);
    let resumed = Orchestrator::new(resumed_backend.clone(), small_batches(dir.path()))
        .run(
            &fragments,
            &Vec::new(),
            RunOptions {
                resume: Some(checkpoint.path.clone()),
                file_id: None,
            },
        )
        .await
        .expect("resume should finish");

    assert_eq!(resumed.result, expected.result);
    assert_eq!(resumed_backend.calls(), total_batches - 2);
    assert_eq!(resumed.checkpoint_path, checkpoint.path);
}

#[tokio::test]
async fn test_resume_of_finished_job_makes_no_calls() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fragments = numbered(6);
    let first = run(ScriptedBackend::mapping(shout), test_config(dir.path()), &fragments).await;

    let backend = ScriptedBackend::mapping(shout);
    let again = Orchestrator::new(backend.clone(), test_config(dir.path()))
        .run(
            &fragments,
            &Vec::new(),
            RunOptions {
                resume: Some(first.checkpoint_path.clone()),
                file_id: None,
            },
        )
        .await
        .expect("resume should finish");

    assert_eq!(backend.calls(), 0);
    assert_eq!(again.result, first.result);
}

#[tokio::test]
async fn test_resume_rejects_other_language_pair() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fragments = numbered(2);
    let first = run(ScriptedBackend::mapping(shout), test_config(dir.path()), &fragments).await;

    let mut config = test_config(dir.path());
    config.target_lang = Lang::new("de");
    let err = Orchestrator::new(ScriptedBackend::mapping(shout), config)
        .run(
            &fragments,
            &Vec::new(),
            RunOptions {
                resume: Some(first.checkpoint_path),
                file_id: None,
            },
        )
        .await
        .expect_err("language mismatch");

    assert!(matches!(err, Error::ConfigInvalid { .. }));
}

#[tokio::test]
async fn test_checkpoint_listing_after_job() {
    let dir = tempfile::tempdir().expect("tempdir");
    let outcome = Orchestrator::new(ScriptedBackend::mapping(shout), test_config(dir.path()))
        .run(
            &numbered(4),
            &Vec::new(),
            RunOptions {
                resume: None,
                file_id: Some("deck.json".to_string()),
            },
        )
        .await
        .expect("job should finish");

    let listed = CheckpointStore::new(dir.path()).list().expect("list");
    assert_eq!(listed.len(), 1);
    let ListedCheckpoint::Valid(summary) = &listed[0] else {
        panic!("checkpoint should be readable");
    };
    assert_eq!(summary.path, outcome.checkpoint_path);
    assert_eq!(summary.file_id.as_deref(), Some("deck.json"));
    assert_eq!(summary.translated, 4);
    assert!((summary.progress_percent - 100.0).abs() < f64::EPSILON);

    let exported = CheckpointStore::export_translations(&summary.path).expect("export");
    assert_eq!(exported, outcome.result);
}

// =============================================================================
// Document Tests
// =============================================================================

#[tokio::test]
async fn test_translate_deck_end_to_end() {
    let dir = tempfile::tempdir().expect("tempdir");
    let deck: Deck = serde_json::from_value(json!({
        "slides": [
            {"shapes": [
                {"kind": "text", "text": "Hello", "is_title": true},
                {"kind": "table", "rows": [["World", "Hello"]]}
            ]},
            {"shapes": [{"kind": "text", "text": "World"}], "notes": "Hello"}
        ]
    }))
    .expect("valid deck");

    let backend = ScriptedBackend::mapping(to_french);
    let translator = SlideTranslator::with_backend(backend.clone(), test_config(dir.path()));
    let translated = translator
        .translate_document(deck, &TraversalOptions::default(), RunOptions::default())
        .await
        .expect("translation should finish");

    assert_eq!(translated.applied, 5);
    assert_eq!(backend.calls(), 1);
    let out = serde_json::to_value(&translated.document).expect("serialize");
    assert_eq!(out["slides"][0]["shapes"][0]["text"], "Bonjour");
    assert_eq!(out["slides"][0]["shapes"][1]["rows"][0][1], "Bonjour");
    assert_eq!(out["slides"][1]["notes"], "Bonjour");

    // Slide context travels with the batch
    let request = &backend.requests()[0];
    assert!(request.user.contains("\"slide_number\": 2"));
}

// =============================================================================
// OpenAI Backend Tests
// =============================================================================

fn request_for(payload: &FragmentSet) -> BackendRequest {
    BackendRequest {
        label: "batch_1".to_string(),
        system: "Translate".to_string(),
        user: serde_json::to_string(payload).expect("serialize"),
        payload: payload.clone(),
    }
}

#[tokio::test]
async fn test_openai_backend_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "{\"a\": \"Bonjour\"}"}}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 8}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = TranslatorConfig::new(
        format!("{}/v1", server.uri()),
        Some("sk-test".to_string()),
        "test-model",
    );
    let backend = OpenAiBackend::new(&config);
    let reply = backend
        .complete(&request_for(&set(&[("a", "Hello")])))
        .await
        .expect("request should succeed");

    assert_eq!(reply.text, "{\"a\": \"Bonjour\"}");
    assert_eq!(
        reply.usage,
        Some(TokenUsage {
            input_tokens: 120,
            output_tokens: 8
        })
    );
}

#[tokio::test]
async fn test_openai_backend_rate_limited() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
        .mount(&server)
        .await;

    let config = TranslatorConfig::new(format!("{}/v1", server.uri()), None, "test-model");
    let err = OpenAiBackend::new(&config)
        .complete(&request_for(&set(&[("a", "Hello")])))
        .await
        .expect_err("429 should fail");

    assert!(matches!(
        err,
        Error::TranslationRateLimited {
            retry_after: Some(7)
        }
    ));
}

#[tokio::test]
async fn test_openai_backend_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let config = TranslatorConfig::new(format!("{}/v1", server.uri()), None, "test-model");
    let err = OpenAiBackend::new(&config)
        .complete(&request_for(&set(&[("a", "Hello")])))
        .await
        .expect_err("500 should fail");

    match err {
        Error::TranslationRequest(message) => assert!(message.contains("500")),
        other => panic!("unexpected error: {other}"),
    }
    assert!(Error::TranslationRequest(String::new()).is_transient());
}

#[tokio::test]
async fn test_openai_backend_empty_choices() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let config = TranslatorConfig::new(format!("{}/v1", server.uri()), None, "test-model");
    let err = OpenAiBackend::new(&config)
        .complete(&request_for(&set(&[("a", "Hello")])))
        .await
        .expect_err("no choices");

    assert!(matches!(err, Error::TranslationInvalidResponse(_)));
}

#[test]
fn test_job_ids_stable_across_runs() {
    let fragments = numbered(3);
    let a = slide_translator_core::checkpoint::job_id(&Lang::new("en"), &Lang::new("fr"), &fragments);
    let b = slide_translator_core::checkpoint::job_id(&Lang::new("en"), &Lang::new("fr"), &fragments);
    assert_eq!(a, b);
}
