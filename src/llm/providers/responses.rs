// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! OpenAI Responses provider

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::error::{ApiError, Result};
use crate::llm::body::BodyInput;
use crate::llm::message::{MessageIntermediate, ToolCall};
use crate::llm::provider::{ChunkStream, ProviderAdapter, StreamAccumulator, ToolDefinition};
use crate::llm::providers::common::{
    endpoint, error_message, read_json, send_cancellable, sse_chunk_stream,
};
use crate::llm::providers::ApiType;
use crate::tools::normalize::normalize_tool_call;

/// Map turns to Responses `input` items.
pub fn map_input(messages: &[MessageIntermediate]) -> Vec<Value> {
    let mut input = Vec::with_capacity(messages.len());

    for message in messages {
        match message {
            MessageIntermediate::Conversation {
                role,
                content,
                tool_call_entries,
            } => {
                if !content.is_empty() || tool_call_entries.is_empty() {
                    input.push(json!({"role": role.as_str(), "content": content}));
                }
                for entry in tool_call_entries {
                    input.push(json!({
                        "type": "function_call",
                        "call_id": entry.call_id,
                        "name": entry.name,
                        "arguments": entry.arguments,
                    }));
                }
            }
            MessageIntermediate::ToolResult {
                call_id,
                content,
                image_input,
                ..
            } => {
                let output = match image_input {
                    Some(image) => json!([
                        {"type": "input_text", "text": content},
                        {"type": "input_image", "image_url": image.as_url()},
                    ]),
                    None => Value::String(content.clone()),
                };
                input.push(json!({
                    "type": "function_call_output",
                    "call_id": call_id,
                    "output": output,
                }));
            }
        }
    }

    input
}

/// Flat function tools
pub fn map_tools(tools: &[ToolDefinition]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.input_schema.to_value(),
            })
        })
        .collect()
}

pub fn build_base_body(input: &BodyInput<'_>) -> Value {
    let mut body = json!({
        "model": input.model,
        "input": map_input(input.messages),
        "tools": map_tools(input.tools),
    });
    if !input.system_prompt.trim().is_empty() {
        body["instructions"] = Value::String(input.system_prompt.to_string());
    }
    body
}

pub fn extract_reply(response: &Value) -> String {
    if let Some(text) = response.get("output_text").and_then(Value::as_str) {
        return text.to_string();
    }
    output_items(response)
        .filter(|item| item.get("type").and_then(Value::as_str) == Some("message"))
        .filter_map(|item| item.get("content").and_then(Value::as_array))
        .flatten()
        .filter(|part| part.get("type").and_then(Value::as_str) == Some("output_text"))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect()
}

pub fn extract_tool_calls(response: &Value) -> Vec<ToolCall> {
    output_items(response)
        .filter(|item| item.get("type").and_then(Value::as_str) == Some("function_call"))
        .filter_map(normalize_tool_call)
        .collect()
}

fn output_items(response: &Value) -> impl Iterator<Item = &Value> {
    response
        .get("output")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

/// Accumulates typed Responses stream events
#[derive(Debug, Default)]
pub struct ResponsesAccumulator {
    calls: BTreeMap<u64, Value>,
}

impl ResponsesAccumulator {
    fn call_for(&mut self, event: &Value) -> Option<&mut Value> {
        if let Some(index) = event.get("output_index").and_then(Value::as_u64) {
            return self.calls.get_mut(&index);
        }
        let item_id = event.get("item_id").and_then(Value::as_str)?;
        self.calls
            .values_mut()
            .find(|call| call.get("id").and_then(Value::as_str) == Some(item_id))
    }
}

impl StreamAccumulator for ResponsesAccumulator {
    fn process_chunk(&mut self, chunk: &Value) -> Result<Option<String>> {
        let event_type = chunk.get("type").and_then(Value::as_str).unwrap_or_default();

        match event_type {
            "response.output_text.delta" => {
                Ok(chunk.get("delta").and_then(Value::as_str).map(str::to_string))
            }
            "response.output_item.added" | "response.output_item.done" => {
                let Some(item) = chunk.get("item") else {
                    return Ok(None);
                };
                if item.get("type").and_then(Value::as_str) != Some("function_call") {
                    return Ok(None);
                }
                let index = chunk
                    .get("output_index")
                    .and_then(Value::as_u64)
                    .unwrap_or(self.calls.len() as u64);
                let mut item = item.clone();
                if item.get("arguments").and_then(Value::as_str).is_none() {
                    // Keep deltas gathered so far when the item carries no arguments.
                    let gathered = self
                        .calls
                        .get(&index)
                        .and_then(|c| c.get("arguments").cloned())
                        .unwrap_or_else(|| Value::String(String::new()));
                    item["arguments"] = gathered;
                }
                self.calls.insert(index, item);
                Ok(None)
            }
            "response.function_call_arguments.delta" => {
                let delta = chunk.get("delta").and_then(Value::as_str).unwrap_or_default();
                if let Some(call) = self.call_for(chunk) {
                    let mut arguments = call
                        .get("arguments")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    arguments.push_str(delta);
                    call["arguments"] = Value::String(arguments);
                }
                Ok(None)
            }
            "response.function_call_arguments.done" => {
                if let Some(final_args) = chunk.get("arguments").cloned() {
                    if let Some(call) = self.call_for(chunk) {
                        call["arguments"] = final_args;
                    }
                }
                Ok(None)
            }
            "error" => {
                let message = error_message(chunk).unwrap_or_else(|| chunk.to_string());
                Err(ApiError::StreamError(message).into())
            }
            "response.failed" => {
                let message = chunk
                    .get("response")
                    .and_then(error_message)
                    .unwrap_or_else(|| "response failed".to_string());
                Err(ApiError::StreamError(message).into())
            }
            _ => Ok(None),
        }
    }

    fn finish(self: Box<Self>) -> Vec<ToolCall> {
        self.calls
            .into_values()
            .filter_map(|call| normalize_tool_call(&call))
            .collect()
    }
}

/// HTTP adapter for `POST {base}/responses`
pub struct ResponsesAdapter {
    client: Client,
    base_url: String,
    api_key: String,
}

impl ResponsesAdapter {
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
            .post(endpoint(&self.base_url, "responses"))
            .bearer_auth(&self.api_key)
            .json(body);
        send_cancellable(request, cancel).await
    }
}

#[async_trait]
impl ProviderAdapter for ResponsesAdapter {
    fn api_type(&self) -> ApiType {
        ApiType::Responses
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
        Box::<ResponsesAccumulator>::default()
    }

    fn extract_reply(&self, response: &Value) -> String {
        extract_reply(response)
    }

    fn extract_tool_calls(&self, response: &Value) -> Vec<ToolCall> {
        extract_tool_calls(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::message::{Role, ToolArguments, ToolCallEntry, ToolImageInput};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_map_input_items() {
        let messages = vec![
            MessageIntermediate::Conversation {
                role: Role::User,
                content: "shot please".to_string(),
                tool_call_entries: vec![],
            },
            MessageIntermediate::Conversation {
                role: Role::Assistant,
                content: String::new(),
                tool_call_entries: vec![ToolCallEntry {
                    call_id: "call_1".to_string(),
                    name: "capture_tab".to_string(),
                    arguments: "{}".to_string(),
                    thought_signature: None,
                }],
            },
            MessageIntermediate::ToolResult {
                call_id: "call_1".to_string(),
                content: "Captured.".to_string(),
                name: Some("capture_tab".to_string()),
                image_input: Some(ToolImageInput::Url {
                    mime_type: "image/png".to_string(),
                    url: "https://img.test/a.png".to_string(),
                }),
            },
        ];

        assert_eq!(
            map_input(&messages),
            vec![
                json!({"role": "user", "content": "shot please"}),
                json!({"type": "function_call", "call_id": "call_1", "name": "capture_tab", "arguments": "{}"}),
                json!({
                    "type": "function_call_output",
                    "call_id": "call_1",
                    "output": [
                        {"type": "input_text", "text": "Captured."},
                        {"type": "input_image", "image_url": "https://img.test/a.png"}
                    ]
                }),
            ]
        );
    }

    #[test]
    fn test_body_has_instructions() {
        let input = BodyInput {
            model: "gpt-4.1",
            system_prompt: "You drive a browser.",
            tools: &[],
            messages: &[],
            anthropic_max_tokens: 0,
        };
        let body = build_base_body(&input);
        assert_eq!(body["instructions"], "You drive a browser.");
        assert_eq!(body["tools"], json!([]));
    }

    #[test]
    fn test_accumulator_events() {
        let mut acc: Box<dyn StreamAccumulator> = Box::<ResponsesAccumulator>::default();
        let events = [
            json!({"type": "response.created", "response": {}}),
            json!({"type": "response.output_text.delta", "delta": "Opening"}),
            json!({"type": "response.output_item.added", "output_index": 1, "item": {"type": "function_call", "id": "fc_1", "call_id": "call_1", "name": "open_page", "arguments": ""}}),
            json!({"type": "response.function_call_arguments.delta", "output_index": 1, "item_id": "fc_1", "delta": "{\"url\":"}),
            json!({"type": "response.function_call_arguments.delta", "item_id": "fc_1", "delta": "\"https://a.test\"}"}),
        ];
        let mut text = String::new();
        for event in &events {
            if let Some(delta) = acc.process_chunk(event).unwrap() {
                text.push_str(&delta);
            }
        }
        assert_eq!(text, "Opening");

        let calls = acc.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "fc_1");
        assert_eq!(calls[0].call_id, "call_1");
        assert_eq!(
            calls[0].arguments,
            ToolArguments::Text("{\"url\":\"https://a.test\"}".to_string())
        );
    }

    #[test]
    fn test_accumulator_failed_event() {
        let mut acc = ResponsesAccumulator::default();
        let err = acc
            .process_chunk(&json!({"type": "response.failed", "response": {"error": {"message": "quota"}}}))
            .unwrap_err();
        assert!(err.to_string().contains("quota"));
    }

    #[test]
    fn test_extract_non_stream() {
        let response = json!({
            "output": [
                {"type": "reasoning", "summary": []},
                {"type": "message", "content": [{"type": "output_text", "text": "Done."}]},
                {"type": "function_call", "id": "fc_2", "call_id": "call_2", "name": "close_tab", "arguments": "{\"tabId\":1}"}
            ]
        });
        assert_eq!(extract_reply(&response), "Done.");
        let calls = extract_tool_calls(&response);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].result_id(), "call_2");
    }
}
