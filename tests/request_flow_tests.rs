// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Stream-fallback executor flows against a scripted provider adapter.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use tabwright::config::Settings;
use tabwright::error::{ApiError, Result, TabwrightError};
use tabwright::llm::{
    ApiType, ChunkStream, MessageRecord, ProviderAdapter, ProviderTable, RequestEngine,
    RequestModelPayload, RequestObserver, StreamAccumulator, ToolArguments, ToolCall,
};
use tabwright::tools::normalize::normalize_tool_call;

#[derive(Debug, Clone)]
enum Script {
    Status(u16),
    Empty,
    Chunks(Vec<Value>),
    ChunksThenError(Vec<Value>),
}

struct ScriptedAdapter {
    scripts: Mutex<VecDeque<Script>>,
    fallback_script: Script,
    non_stream_response: Value,
    stream_calls: AtomicUsize,
    non_stream_calls: AtomicUsize,
}

impl ScriptedAdapter {
    fn new(scripts: Vec<Script>, fallback_script: Script) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            fallback_script,
            non_stream_response: json!({
                "text": "complete reply",
                "tool_calls": [{"id": "n1", "name": "list_tabs", "arguments": "{}"}]
            }),
            stream_calls: AtomicUsize::new(0),
            non_stream_calls: AtomicUsize::new(0),
        }
    }
}

/// Chunks are `{"text": ..}` deltas or `{"tool": <raw call>}` entries.
#[derive(Default)]
struct ScriptedAccumulator {
    calls: Vec<ToolCall>,
}

impl StreamAccumulator for ScriptedAccumulator {
    fn process_chunk(&mut self, chunk: &Value) -> Result<Option<String>> {
        if let Some(raw) = chunk.get("tool") {
            self.calls.extend(normalize_tool_call(raw));
        }
        Ok(chunk.get("text").and_then(Value::as_str).map(str::to_string))
    }

    fn finish(self: Box<Self>) -> Vec<ToolCall> {
        self.calls
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn api_type(&self) -> ApiType {
        ApiType::Chat
    }

    async fn request_stream(&self, _body: &Value, _cancel: &CancellationToken) -> Result<ChunkStream> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback_script.clone());

        match script {
            Script::Status(status) => Err(ApiError::HttpStatus {
                status,
                message: "scripted failure".to_string(),
            }
            .into()),
            Script::Empty => Ok(Box::pin(stream::empty::<Result<Value>>())),
            Script::Chunks(chunks) => Ok(Box::pin(stream::iter(
                chunks.into_iter().map(Ok::<Value, TabwrightError>),
            ))),
            Script::ChunksThenError(chunks) => {
                let items = chunks
                    .into_iter()
                    .map(Ok::<Value, TabwrightError>)
                    .chain(std::iter::once(Err(TabwrightError::Api(ApiError::Network(
                        "connection reset".to_string(),
                    )))));
                Ok(Box::pin(stream::iter(items)))
            }
        }
    }

    async fn request_non_stream(&self, _body: &Value, _cancel: &CancellationToken) -> Result<Value> {
        self.non_stream_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.non_stream_response.clone())
    }

    fn stream_accumulator(&self) -> Box<dyn StreamAccumulator> {
        Box::new(ScriptedAccumulator::default())
    }

    fn extract_reply(&self, response: &Value) -> String {
        response["text"].as_str().unwrap_or_default().to_string()
    }

    fn extract_tool_calls(&self, response: &Value) -> Vec<ToolCall> {
        response["tool_calls"]
            .as_array()
            .map(|raw| raw.iter().filter_map(normalize_tool_call).collect())
            .unwrap_or_default()
    }
}

#[derive(Default)]
struct RecordingObserver {
    deltas: Mutex<Vec<String>>,
    starts: AtomicUsize,
}

impl RequestObserver for RecordingObserver {
    fn on_stream_start(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn on_delta(&self, delta: &str) {
        self.deltas.lock().unwrap().push(delta.to_string());
    }
}

fn engine_with(adapter: Arc<ScriptedAdapter>) -> RequestEngine {
    let mut providers = ProviderTable::new();
    providers.register(adapter);
    RequestEngine::new(providers)
}

fn messages() -> Vec<MessageRecord> {
    vec![MessageRecord::user("hi")]
}

#[tokio::test(start_paused = true)]
async fn test_stream_success_reports_deltas_and_tool_calls() {
    let adapter = Arc::new(ScriptedAdapter::new(
        vec![Script::Chunks(vec![
            json!({"text": "Hel"}),
            json!({"text": "lo"}),
            json!({"tool": {"id": "s1", "function": {"name": "find", "arguments": "{\"query\":\"x\"}"}}}),
        ])],
        Script::Empty,
    ));
    let observer = Arc::new(RecordingObserver::default());
    let settings = Settings::default();
    let records = messages();

    let result = engine_with(adapter.clone())
        .request_model(RequestModelPayload::new(&settings, &records).with_observer(observer.clone()))
        .await
        .unwrap();

    assert!(result.streamed);
    assert_eq!(result.reply, "Hello");
    assert_eq!(result.tool_calls.len(), 1);
    assert_eq!(result.tool_calls[0].name, "find");
    assert_eq!(*observer.deltas.lock().unwrap(), vec!["Hel", "lo"]);
    assert_eq!(observer.starts.load(Ordering::SeqCst), 1);
    assert_eq!(adapter.non_stream_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried_within_budget() {
    let adapter = Arc::new(ScriptedAdapter::new(
        vec![
            Script::Status(503),
            Script::Status(429),
            Script::Chunks(vec![json!({"text": "ok"})]),
        ],
        Script::Empty,
    ));
    let settings = Settings::default();
    let records = messages();

    let started = tokio::time::Instant::now();
    let result = engine_with(adapter.clone())
        .request_model(RequestModelPayload::new(&settings, &records))
        .await
        .unwrap();

    assert!(result.streamed);
    assert_eq!(result.reply, "ok");
    assert_eq!(adapter.stream_calls.load(Ordering::SeqCst), 3);
    // 500ms + 1000ms of backoff
    assert_eq!(started.elapsed(), Duration::from_millis(1500));
}

#[tokio::test(start_paused = true)]
async fn test_empty_streams_fall_back_to_one_non_stream_request() {
    let adapter = Arc::new(ScriptedAdapter::new(Vec::new(), Script::Empty));
    let settings = Settings::default();
    let records = messages();

    let started = tokio::time::Instant::now();
    let result = engine_with(adapter.clone())
        .request_model(RequestModelPayload::new(&settings, &records))
        .await
        .unwrap();

    assert!(!result.streamed);
    assert_eq!(result.reply, "complete reply");
    assert_eq!(
        result.tool_calls,
        vec![ToolCall::new("n1", "list_tabs", ToolArguments::Text("{}".into()))]
    );
    assert_eq!(adapter.non_stream_calls.load(Ordering::SeqCst), 1);
    // Attempts at 0, 0.5, 1.5, 3.5, 7.5, 15.5, 31.5 and 60 seconds.
    assert_eq!(adapter.stream_calls.load(Ordering::SeqCst), 8);
    assert_eq!(started.elapsed(), Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_partial_stream_falls_back_without_retrying_stream() {
    let adapter = Arc::new(ScriptedAdapter::new(
        vec![Script::ChunksThenError(vec![json!({"text": "par"})])],
        Script::Chunks(vec![json!({"text": "never"})]),
    ));
    let observer = Arc::new(RecordingObserver::default());
    let settings = Settings::default();
    let records = messages();

    let result = engine_with(adapter.clone())
        .request_model(RequestModelPayload::new(&settings, &records).with_observer(observer.clone()))
        .await
        .unwrap();

    assert!(!result.streamed);
    assert_eq!(result.reply, "complete reply");
    assert_eq!(adapter.stream_calls.load(Ordering::SeqCst), 1);
    assert_eq!(adapter.non_stream_calls.load(Ordering::SeqCst), 1);
    assert_eq!(*observer.deltas.lock().unwrap(), vec!["par"]);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff_aborts_immediately() {
    let adapter = Arc::new(ScriptedAdapter::new(Vec::new(), Script::Status(500)));
    let settings = Settings::default();
    let records = messages();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(2000)).await;
        trigger.cancel();
    });

    let started = tokio::time::Instant::now();
    let err = engine_with(adapter.clone())
        .request_model(RequestModelPayload::new(&settings, &records).with_cancel(cancel))
        .await
        .unwrap_err();

    assert!(matches!(err, TabwrightError::Aborted));
    assert_eq!(started.elapsed(), Duration::from_millis(2000));
    // Attempts at 0, 500 and 1500ms; the 2000ms wake lands inside the third backoff.
    assert_eq!(adapter.stream_calls.load(Ordering::SeqCst), 3);
    assert_eq!(adapter.non_stream_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_provider_is_config_error() {
    let settings = Settings::default();
    let records = messages();

    let err = RequestEngine::new(ProviderTable::new())
        .request_model(RequestModelPayload::new(&settings, &records))
        .await
        .unwrap_err();
    assert!(matches!(err, TabwrightError::Config(_)));
}
