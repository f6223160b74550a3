// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Anthropic Messages provider
//!
//! The Messages API rejects consecutive turns with the same role, so mapped
//! messages go through a merge pass before they are placed in the body.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::error::{ApiError, Result};
use crate::llm::body::BodyInput;
use crate::llm::message::{MessageIntermediate, Role, ToolCall, ToolImageInput};
use crate::llm::provider::{ChunkStream, ProviderAdapter, StreamAccumulator, ToolDefinition};
use crate::llm::providers::common::{
    endpoint, error_message, read_json, send_cancellable, sse_chunk_stream,
};
use crate::llm::providers::ApiType;
use crate::tools::normalize::normalize_tool_call;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Map each turn to one Anthropic message, without merging.
pub fn map_messages(messages: &[MessageIntermediate]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| match message {
            MessageIntermediate::Conversation {
                role,
                content,
                tool_call_entries,
            } => {
                let role = match role {
                    Role::Assistant => "assistant",
                    _ => "user",
                };
                if tool_call_entries.is_empty() {
                    return json!({"role": role, "content": content});
                }
                let mut blocks = Vec::with_capacity(tool_call_entries.len() + 1);
                if !content.trim().is_empty() {
                    blocks.push(json!({"type": "text", "text": content}));
                }
                for entry in tool_call_entries {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": entry.call_id,
                        "name": entry.name,
                        "input": entry.arguments_object(),
                    }));
                }
                json!({"role": role, "content": blocks})
            }
            MessageIntermediate::ToolResult {
                call_id,
                content,
                image_input,
                ..
            } => {
                let result_content = match image_input {
                    Some(image) => json!([
                        {"type": "text", "text": content},
                        image_block(image),
                    ]),
                    None => Value::String(content.clone()),
                };
                json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": call_id,
                        "content": result_content,
                    }]
                })
            }
        })
        .collect()
}

fn image_block(image: &ToolImageInput) -> Value {
    match image {
        ToolImageInput::Base64 { mime_type, data } => json!({
            "type": "image",
            "source": {"type": "base64", "media_type": mime_type, "data": data},
        }),
        ToolImageInput::Url { url, .. } => json!({
            "type": "image",
            "source": {"type": "url", "url": url},
        }),
    }
}

/// Merge each message into its predecessor when both share a role.
pub fn merge_consecutive_roles(messages: Vec<Value>) -> Vec<Value> {
    let mut merged: Vec<Value> = Vec::with_capacity(messages.len());

    for message in messages {
        let same_role = merged
            .last()
            .is_some_and(|previous| previous.get("role") == message.get("role"));
        let Some(previous) = merged.last_mut().filter(|_| same_role) else {
            merged.push(message);
            continue;
        };

        let content = match (previous.get("content"), message.get("content")) {
            (Some(Value::String(a)), Some(Value::String(b))) => match (a.is_empty(), b.is_empty()) {
                (true, _) => Value::String(b.clone()),
                (_, true) => Value::String(a.clone()),
                _ => Value::String(format!("{}\n\n{}", a, b)),
            },
            (a, b) => {
                let mut blocks = content_blocks(a);
                blocks.extend(content_blocks(b));
                Value::Array(blocks)
            }
        };
        previous["content"] = content;
    }

    merged
}

fn content_blocks(content: Option<&Value>) -> Vec<Value> {
    match content {
        Some(Value::Array(blocks)) => blocks.clone(),
        Some(Value::String(text)) if !text.is_empty() => {
            vec![json!({"type": "text", "text": text})]
        }
        _ => Vec::new(),
    }
}

/// Tools with `input_schema`
pub fn map_tools(tools: &[ToolDefinition]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "input_schema": tool.input_schema.to_value(),
            })
        })
        .collect()
}

pub fn build_base_body(input: &BodyInput<'_>) -> Value {
    let mut body = json!({
        "model": input.model,
        "messages": merge_consecutive_roles(map_messages(input.messages)),
        "max_tokens": input.anthropic_max_tokens,
    });
    if !input.system_prompt.trim().is_empty() {
        body["system"] = Value::String(input.system_prompt.to_string());
    }
    if !input.tools.is_empty() {
        body["tools"] = Value::Array(map_tools(input.tools));
    }
    body
}

pub fn extract_reply(response: &Value) -> String {
    content_of(response)
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect()
}

pub fn extract_tool_calls(response: &Value) -> Vec<ToolCall> {
    content_of(response)
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("tool_use"))
        .filter_map(normalize_tool_call)
        .collect()
}

fn content_of(response: &Value) -> impl Iterator<Item = &Value> {
    response
        .get("content")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

#[derive(Debug, Default)]
struct ToolUseBlock {
    id: String,
    name: String,
    partial_json: String,
}

/// Accumulates `content_block_*` events
#[derive(Debug, Default)]
pub struct AnthropicAccumulator {
    blocks: BTreeMap<u64, ToolUseBlock>,
}

impl StreamAccumulator for AnthropicAccumulator {
    fn process_chunk(&mut self, chunk: &Value) -> Result<Option<String>> {
        let index = chunk.get("index").and_then(Value::as_u64).unwrap_or(0);

        match chunk.get("type").and_then(Value::as_str).unwrap_or_default() {
            "content_block_start" => {
                let Some(block) = chunk.get("content_block") else {
                    return Ok(None);
                };
                match block.get("type").and_then(Value::as_str) {
                    Some("tool_use") => {
                        self.blocks.insert(
                            index,
                            ToolUseBlock {
                                id: str_field(block, "id"),
                                name: str_field(block, "name"),
                                partial_json: String::new(),
                            },
                        );
                        Ok(None)
                    }
                    Some("text") => Ok(block
                        .get("text")
                        .and_then(Value::as_str)
                        .filter(|text| !text.is_empty())
                        .map(str::to_string)),
                    _ => Ok(None),
                }
            }
            "content_block_delta" => {
                let Some(delta) = chunk.get("delta") else {
                    return Ok(None);
                };
                match delta.get("type").and_then(Value::as_str) {
                    Some("text_delta") => {
                        Ok(delta.get("text").and_then(Value::as_str).map(str::to_string))
                    }
                    Some("input_json_delta") => {
                        if let (Some(block), Some(part)) = (
                            self.blocks.get_mut(&index),
                            delta.get("partial_json").and_then(Value::as_str),
                        ) {
                            block.partial_json.push_str(part);
                        }
                        Ok(None)
                    }
                    _ => Ok(None),
                }
            }
            "error" => {
                let message = error_message(chunk).unwrap_or_else(|| chunk.to_string());
                Err(ApiError::StreamError(message).into())
            }
            _ => Ok(None),
        }
    }

    fn finish(self: Box<Self>) -> Vec<ToolCall> {
        self.blocks
            .into_values()
            .filter_map(|block| {
                let input = if block.partial_json.trim().is_empty() {
                    json!({})
                } else {
                    serde_json::from_str(&block.partial_json)
                        .unwrap_or(Value::String(block.partial_json))
                };
                normalize_tool_call(&json!({
                    "id": block.id,
                    "name": block.name,
                    "input": input,
                }))
            })
            .collect()
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// HTTP adapter for `POST {base}/messages`
pub struct AnthropicAdapter {
    client: Client,
    base_url: String,
    api_key: String,
}

impl AnthropicAdapter {
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
            .post(endpoint(&self.base_url, "messages"))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(body);
        send_cancellable(request, cancel).await
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn api_type(&self) -> ApiType {
        ApiType::Anthropic
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
        Box::<AnthropicAccumulator>::default()
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
    use crate::llm::message::{ToolArguments, ToolCallEntry};
    use pretty_assertions::assert_eq;

    fn tool_result(call_id: &str, content: &str) -> MessageIntermediate {
        MessageIntermediate::ToolResult {
            call_id: call_id.to_string(),
            content: content.to_string(),
            name: None,
            image_input: None,
        }
    }

    #[test]
    fn test_tool_use_input_is_object() {
        let messages = vec![MessageIntermediate::Conversation {
            role: Role::Assistant,
            content: "Let me look.".to_string(),
            tool_call_entries: vec![ToolCallEntry {
                call_id: "toolu_1".to_string(),
                name: "get_page_markdown".to_string(),
                arguments: r#"{"tabId":7}"#.to_string(),
                thought_signature: None,
            }],
        }];
        assert_eq!(
            map_messages(&messages),
            vec![json!({
                "role": "assistant",
                "content": [
                    {"type": "text", "text": "Let me look."},
                    {"type": "tool_use", "id": "toolu_1", "name": "get_page_markdown", "input": {"tabId": 7}}
                ]
            })]
        );
    }

    #[test]
    fn test_non_object_arguments_become_empty_input() {
        let messages = vec![MessageIntermediate::Conversation {
            role: Role::Assistant,
            content: String::new(),
            tool_call_entries: vec![ToolCallEntry {
                call_id: "toolu_2".to_string(),
                name: "list_tabs".to_string(),
                arguments: "[1,2]".to_string(),
                thought_signature: None,
            }],
        }];
        let mapped = map_messages(&messages);
        assert_eq!(mapped[0]["content"][0]["input"], json!({}));
    }

    #[test]
    fn test_consecutive_tool_results_merge_into_one_user_message() {
        let mapped = merge_consecutive_roles(map_messages(&[
            tool_result("a", "one"),
            tool_result("b", "two"),
        ]));
        assert_eq!(mapped.len(), 1);
        assert_eq!(mapped[0]["role"], "user");
        let blocks = mapped[0]["content"].as_array().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0]["tool_use_id"], "a");
        assert_eq!(blocks[1]["tool_use_id"], "b");
    }

    #[test]
    fn test_merge_text_into_blocks() {
        let merged = merge_consecutive_roles(vec![
            json!({"role": "user", "content": [{"type": "tool_result", "tool_use_id": "a", "content": "ok"}]}),
            json!({"role": "user", "content": "next question"}),
            json!({"role": "assistant", "content": "hello"}),
            json!({"role": "assistant", "content": "again"}),
        ]);
        assert_eq!(
            merged,
            vec![
                json!({"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "a", "content": "ok"},
                    {"type": "text", "text": "next question"}
                ]}),
                json!({"role": "assistant", "content": "hello\n\nagain"}),
            ]
        );
    }

    #[test]
    fn test_tool_result_with_base64_image() {
        let mapped = map_messages(&[MessageIntermediate::ToolResult {
            call_id: "toolu_3".to_string(),
            content: "Screenshot taken.".to_string(),
            name: Some("capture_tab".to_string()),
            image_input: Some(ToolImageInput::Base64 {
                mime_type: "image/jpeg".to_string(),
                data: "Zm9v".to_string(),
            }),
        }]);
        let content = &mapped[0]["content"][0]["content"];
        assert_eq!(content[0]["text"], "Screenshot taken.");
        assert_eq!(content[1]["source"]["type"], "base64");
        assert_eq!(content[1]["source"]["media_type"], "image/jpeg");
    }

    #[test]
    fn test_body_fields() {
        let input = BodyInput {
            model: "claude-sonnet-4-20250514",
            system_prompt: "sys",
            tools: &[],
            messages: &[],
            anthropic_max_tokens: 64000,
        };
        let body = build_base_body(&input);
        assert_eq!(body["system"], "sys");
        assert_eq!(body["max_tokens"], 64000);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_accumulator_tool_use() {
        let mut acc: Box<dyn StreamAccumulator> = Box::<AnthropicAccumulator>::default();
        let events = [
            json!({"type": "message_start", "message": {"id": "msg_1"}}),
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Sure"}}),
            json!({"type": "content_block_start", "index": 1, "content_block": {"type": "tool_use", "id": "toolu_9", "name": "close_tab", "input": {}}}),
            json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "{\"tabId\""}}),
            json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": ": 12}"}}),
            json!({"type": "content_block_stop", "index": 1}),
            json!({"type": "message_stop"}),
        ];
        let text: String = events
            .iter()
            .filter_map(|e| acc.process_chunk(e).unwrap())
            .collect();
        assert_eq!(text, "Sure");

        let calls = acc.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "toolu_9");
        assert_eq!(calls[0].arguments, ToolArguments::Structured(json!({"tabId": 12})));
    }

    #[test]
    fn test_accumulator_error_event() {
        let mut acc = AnthropicAccumulator::default();
        let err = acc
            .process_chunk(&json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}))
            .unwrap_err();
        assert!(err.to_string().contains("Overloaded"));
    }

    #[test]
    fn test_extract_non_stream() {
        let response = json!({
            "content": [
                {"type": "text", "text": "Closing it."},
                {"type": "tool_use", "id": "toolu_4", "name": "close_tab", "input": {"tabId": 2}}
            ]
        });
        assert_eq!(extract_reply(&response), "Closing it.");
        assert_eq!(extract_tool_calls(&response)[0].name, "close_tab");
    }
}
