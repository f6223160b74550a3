// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! OpenAI Chat Completions provider
//!
//! Tool messages on this API are text only, so images attached to tool
//! results travel in one follow-up user message placed after the run of
//! tool messages.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::error::{ApiError, Result};
use crate::llm::body::BodyInput;
use crate::llm::message::{MessageIntermediate, ToolCall, ToolImageInput};
use crate::llm::provider::{ChunkStream, ProviderAdapter, StreamAccumulator, ToolDefinition};
use crate::llm::providers::common::{
    endpoint, error_message, read_json, send_cancellable, sse_chunk_stream,
};
use crate::llm::providers::ApiType;
use crate::tools::normalize::{normalize_tool_call, normalize_tool_calls};

/// Map turns to Chat Completions `messages`.
pub fn map_messages(system_prompt: &str, messages: &[MessageIntermediate]) -> Vec<Value> {
    let mut mapped = Vec::with_capacity(messages.len() + 1);
    if !system_prompt.trim().is_empty() {
        mapped.push(json!({"role": "system", "content": system_prompt}));
    }

    let mut pending_images: Vec<(String, ToolImageInput)> = Vec::new();

    for message in messages {
        match message {
            MessageIntermediate::Conversation {
                role,
                content,
                tool_call_entries,
            } => {
                flush_tool_images(&mut mapped, &mut pending_images);

                let mut turn = json!({"role": role.as_str(), "content": content});
                if !tool_call_entries.is_empty() {
                    let calls: Vec<Value> = tool_call_entries
                        .iter()
                        .map(|entry| {
                            json!({
                                "id": entry.call_id,
                                "type": "function",
                                "function": {
                                    "name": entry.name,
                                    "arguments": entry.arguments,
                                }
                            })
                        })
                        .collect();
                    turn["tool_calls"] = Value::Array(calls);
                }
                mapped.push(turn);
            }
            MessageIntermediate::ToolResult {
                call_id,
                content,
                image_input,
                ..
            } => {
                mapped.push(json!({
                    "role": "tool",
                    "content": content,
                    "tool_call_id": call_id,
                }));
                if let Some(image) = image_input {
                    pending_images.push((call_id.clone(), image.clone()));
                }
            }
        }
    }

    flush_tool_images(&mut mapped, &mut pending_images);
    mapped
}

fn flush_tool_images(mapped: &mut Vec<Value>, pending: &mut Vec<(String, ToolImageInput)>) {
    if pending.is_empty() {
        return;
    }
    let mut parts = Vec::with_capacity(pending.len() * 2);
    for (call_id, image) in pending.drain(..) {
        parts.push(json!({
            "type": "text",
            "text": format!("Image returned by tool call {}:", call_id),
        }));
        parts.push(json!({
            "type": "image_url",
            "image_url": {"url": image.as_url()},
        }));
    }
    mapped.push(json!({"role": "user", "content": parts}));
}

/// OpenAI-style function tools
pub fn map_tools(tools: &[ToolDefinition]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.input_schema.to_value(),
                }
            })
        })
        .collect()
}

pub fn build_base_body(input: &BodyInput<'_>) -> Value {
    json!({
        "model": input.model,
        "messages": map_messages(input.system_prompt, input.messages),
        "tools": map_tools(input.tools),
    })
}

pub fn extract_reply(response: &Value) -> String {
    response
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

pub fn extract_tool_calls(response: &Value) -> Vec<ToolCall> {
    response
        .pointer("/choices/0/message/tool_calls")
        .and_then(Value::as_array)
        .map(|calls| normalize_tool_calls(calls))
        .unwrap_or_default()
}

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulates `choices[0].delta` chunks
#[derive(Debug, Default)]
pub struct ChatAccumulator {
    calls: BTreeMap<u64, PartialCall>,
}

impl StreamAccumulator for ChatAccumulator {
    fn process_chunk(&mut self, chunk: &Value) -> Result<Option<String>> {
        if chunk.get("error").is_some() {
            let message = error_message(chunk).unwrap_or_else(|| chunk.to_string());
            return Err(ApiError::StreamError(message).into());
        }

        let Some(delta) = chunk.pointer("/choices/0/delta") else {
            return Ok(None);
        };

        if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
            for (position, call) in calls.iter().enumerate() {
                let index = call
                    .get("index")
                    .and_then(Value::as_u64)
                    .unwrap_or(position as u64);
                let entry = self.calls.entry(index).or_default();
                if let Some(id) = call
                    .get("id")
                    .and_then(Value::as_str)
                    .filter(|id| !id.is_empty())
                {
                    entry.id = id.to_string();
                }
                // Some backends repeat the full name on every delta.
                if let Some(name) = call
                    .pointer("/function/name")
                    .and_then(Value::as_str)
                    .filter(|name| !name.is_empty() && *name != entry.name)
                {
                    entry.name.push_str(name);
                }
                if let Some(args) = call.pointer("/function/arguments").and_then(Value::as_str) {
                    entry.arguments.push_str(args);
                }
            }
        }

        Ok(delta
            .get("content")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    fn finish(self: Box<Self>) -> Vec<ToolCall> {
        self.calls
            .into_values()
            .filter_map(|call| {
                normalize_tool_call(&json!({
                    "id": call.id,
                    "type": "function",
                    "function": {"name": call.name, "arguments": call.arguments},
                }))
            })
            .collect()
    }
}

/// HTTP adapter for `POST {base}/chat/completions`
pub struct ChatAdapter {
    client: Client,
    base_url: String,
    api_key: String,
}

impl ChatAdapter {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    async fn post(&self, body: &Value, cancel: &CancellationToken) -> Result<reqwest::Response> {
        let request = self
            .client
            .post(endpoint(&self.base_url, "chat/completions"))
            .bearer_auth(&self.api_key)
            .json(body);
        send_cancellable(request, cancel).await
    }
}

#[async_trait]
impl ProviderAdapter for ChatAdapter {
    fn api_type(&self) -> ApiType {
        ApiType::Chat
    }

    async fn request_stream(
        &self,
        body: &Value,
        cancel: &CancellationToken,
    ) -> Result<ChunkStream> {
        let response = self.post(body, cancel).await?;
        Ok(sse_chunk_stream(response))
    }

    async fn request_non_stream(&self, body: &Value, cancel: &CancellationToken) -> Result<Value> {
        let response = self.post(body, cancel).await?;
        read_json(response, cancel).await
    }

    fn stream_accumulator(&self) -> Box<dyn StreamAccumulator> {
        Box::<ChatAccumulator>::default()
    }

    fn extract_reply(&self, response: &Value) -> String {
        extract_reply(response)
    }

    fn extract_tool_calls(&self, response: &Value) -> Vec<ToolCall> {
        extract_tool_calls(response)
    }
}
