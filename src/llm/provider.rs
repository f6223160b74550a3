// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Provider adapter trait and related types
//!
//! Every wire protocol plugs into the request executor through the same five
//! operations: open a stream, send a complete request, consume a stream,
//! extract the reply text, and extract tool calls.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{ApiError, Result, TabwrightError};
use crate::llm::message::ToolCall;
use crate::llm::providers::ApiType;

/// Stream of decoded provider chunks
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Value>> + Send>>;

/// Main trait for provider adapters
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Wire protocol this adapter speaks
    fn api_type(&self) -> ApiType;

    /// Issue the streaming body and return the decoded chunk stream.
    async fn request_stream(&self, body: &Value, cancel: &CancellationToken)
        -> Result<ChunkStream>;

    /// Issue the non-streaming body and return the raw response.
    async fn request_non_stream(&self, body: &Value, cancel: &CancellationToken) -> Result<Value>;

    /// Fresh accumulator for one stream attempt
    fn stream_accumulator(&self) -> Box<dyn StreamAccumulator>;

    /// Drive a stream to completion, reporting progress to `sink`.
    async fn consume_stream(
        &self,
        stream: ChunkStream,
        sink: &StreamSink,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome> {
        drive_stream(stream, self.stream_accumulator(), sink, cancel).await
    }

    /// Reply text of a non-streamed response
    fn extract_reply(&self, response: &Value) -> String;

    /// Tool calls of a non-streamed response
    fn extract_tool_calls(&self, response: &Value) -> Vec<ToolCall>;
}

/// Per-provider state machine folding stream chunks into a reply
pub trait StreamAccumulator: Send {
    /// Consume one chunk, returning the text delta it carried, if any.
    fn process_chunk(&mut self, chunk: &Value) -> Result<Option<String>>;

    /// Tool calls assembled from the whole stream
    fn finish(self: Box<Self>) -> Vec<ToolCall>;
}

/// Result of a fully consumed stream
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamOutcome {
    pub reply: String,
    pub tool_calls: Vec<ToolCall>,
    pub chunks: usize,
}

/// Callbacks fired while a request streams
///
/// All methods default to no-ops so callers only implement what they watch.
pub trait RequestObserver: Send + Sync {
    /// First chunk of the request arrived
    fn on_stream_start(&self) {}

    /// A raw chunk arrived; `count` is its 1-based position in the attempt
    fn on_chunk(&self, _chunk: &Value, _count: usize) {}

    /// Reply text grew by `delta`
    fn on_delta(&self, _delta: &str) {}
}

/// Observer that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RequestObserver for NoopObserver {}

/// Observer handle shared by every stream attempt of one request
pub struct StreamSink {
    observer: Arc<dyn RequestObserver>,
    started: AtomicBool,
}

impl StreamSink {
    pub fn new(observer: Arc<dyn RequestObserver>) -> Self {
        Self {
            observer,
            started: AtomicBool::new(false),
        }
    }

    /// Whether `on_stream_start` has fired for this request
    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn chunk(&self, chunk: &Value, count: usize) {
        if !self.started.swap(true, Ordering::SeqCst) {
            self.observer.on_stream_start();
        }
        self.observer.on_chunk(chunk, count);
    }

    fn delta(&self, delta: &str) {
        self.observer.on_delta(delta);
    }
}

/// Consume `stream` with `accumulator`.
///
/// Zero chunks yields [`ApiError::EmptyStream`]; a failure after at least one
/// chunk yields [`ApiError::PartialStream`], which is not retried.
pub async fn drive_stream(
    mut stream: ChunkStream,
    mut accumulator: Box<dyn StreamAccumulator>,
    sink: &StreamSink,
    cancel: &CancellationToken,
) -> Result<StreamOutcome> {
    let mut chunks = 0usize;
    let mut reply = String::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TabwrightError::Aborted),
            next = stream.next() => next,
        };

        let Some(item) = next else {
            break;
        };

        let processed = item.and_then(|chunk| {
            chunks += 1;
            sink.chunk(&chunk, chunks);
            accumulator.process_chunk(&chunk)
        });

        match processed {
            Ok(Some(delta)) if !delta.is_empty() => {
                reply.push_str(&delta);
                sink.delta(&delta);
            }
            Ok(_) => {}
            Err(err) if err.is_abort() => return Err(err),
            Err(err) if chunks > 0 => {
                return Err(ApiError::PartialStream {
                    chunks,
                    message: err.to_string(),
                }
                .into());
            }
            Err(err) => return Err(err),
        }
    }

    if chunks == 0 {
        return Err(ApiError::EmptyStream.into());
    }

    Ok(StreamOutcome {
        reply,
        tool_calls: accumulator.finish(),
        chunks,
    })
}

/// Tool definition for the LLM
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    /// Tool name
    pub name: String,

    /// Tool description
    pub description: String,

    /// Input schema (JSON Schema)
    pub input_schema: ToolInputSchema,
}

/// Input schema for a tool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInputSchema {
    /// Schema type (always "object")
    #[serde(rename = "type")]
    pub schema_type: String,

    /// Property definitions
    pub properties: Value,

    /// Required properties
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

impl ToolInputSchema {
    /// The schema as a JSON Schema document
    pub fn to_value(&self) -> Value {
        let mut schema = serde_json::json!({
            "type": self.schema_type,
            "properties": self.properties,
        });
        if !self.required.is_empty() {
            schema["required"] = serde_json::json!(self.required);
        }
        schema
    }
}
