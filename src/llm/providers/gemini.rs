// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Google Gemini provider
//!
//! Bodies are built in the SDK shape `{model, contents, config}` so overrides
//! written against that shape keep working. [`GeminiClient`] flattens them
//! into the REST request. Cancellation rides in [`GeminiCallConfig`] rather
//! than in the transport.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use crate::error::{ApiError, Result, TabwrightError};
use crate::llm::body::BodyInput;
use crate::llm::message::{MessageIntermediate, Role, ToolCall, ToolImageInput};
use crate::llm::provider::{ChunkStream, ProviderAdapter, StreamAccumulator, ToolDefinition};
use crate::llm::providers::common::{
    endpoint, error_message, read_json, send_cancellable, sse_chunk_stream,
};
use crate::llm::providers::ApiType;
use crate::tools::normalize::normalize_tool_call;

/// Config keys that live at the top level of the REST request
const TOP_LEVEL_CONFIG_KEYS: &[&str] = &[
    "systemInstruction",
    "tools",
    "toolConfig",
    "safetySettings",
    "cachedContent",
];

/// Map turns to Gemini `contents`.
///
/// Consecutive tool results share one user content, matching how Gemini
/// returns parallel function calls in a single model turn.
pub fn map_contents(messages: &[MessageIntermediate]) -> Vec<Value> {
    let mut contents: Vec<Value> = Vec::with_capacity(messages.len());
    let mut call_names: HashMap<&str, &str> = HashMap::new();
    let mut last_was_tool_result = false;

    for message in messages {
        match message {
            MessageIntermediate::Conversation {
                role,
                content,
                tool_call_entries,
            } => {
                let role = match role {
                    Role::Assistant => "model",
                    _ => "user",
                };
                let mut parts = Vec::with_capacity(tool_call_entries.len() + 1);
                if !content.is_empty() {
                    parts.push(json!({"text": content}));
                }
                for entry in tool_call_entries {
                    call_names.insert(&entry.call_id, &entry.name);
                    let mut part = json!({
                        "functionCall": {
                            "id": entry.call_id,
                            "name": entry.name,
                            "args": entry.arguments_object(),
                        }
                    });
                    if let Some(signature) = &entry.thought_signature {
                        part["thoughtSignature"] = Value::String(signature.clone());
                    }
                    parts.push(part);
                }
                last_was_tool_result = false;
                if parts.is_empty() {
                    continue;
                }
                contents.push(json!({"role": role, "parts": parts}));
            }
            MessageIntermediate::ToolResult {
                call_id,
                content,
                name,
                image_input,
            } => {
                let name = name
                    .as_deref()
                    .or_else(|| call_names.get(call_id.as_str()).copied())
                    .unwrap_or_default();
                let mut response = json!({
                    "id": call_id,
                    "name": name,
                    "response": {"output": content},
                });
                if let Some(image) = image_input {
                    response["parts"] = json!([image_part(image)]);
                }
                let part = json!({"functionResponse": response});

                let previous_parts = contents
                    .last_mut()
                    .filter(|_| last_was_tool_result)
                    .and_then(|last| last.get_mut("parts"))
                    .and_then(Value::as_array_mut);
                match previous_parts {
                    Some(parts) => parts.push(part),
                    None => contents.push(json!({"role": "user", "parts": [part]})),
                }
                last_was_tool_result = true;
            }
        }
    }

    contents
}

fn image_part(image: &ToolImageInput) -> Value {
    match image {
        ToolImageInput::Base64 { mime_type, data } => {
            json!({"inlineData": {"mimeType": mime_type, "data": data}})
        }
        ToolImageInput::Url { mime_type, url } => {
            json!({"fileData": {"mimeType": mime_type, "fileUri": url}})
        }
    }
}

/// `functionDeclarations` with JSON-schema parameters
pub fn map_tools(tools: &[ToolDefinition]) -> Vec<Value> {
    if tools.is_empty() {
        return Vec::new();
    }
    let declarations: Vec<Value> = tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "parametersJsonSchema": tool.input_schema.to_value(),
            })
        })
        .collect();
    vec![json!({"functionDeclarations": declarations})]
}

pub fn build_base_body(input: &BodyInput<'_>) -> Value {
    let mut config = Map::new();
    let tools = map_tools(input.tools);
    if !tools.is_empty() {
        config.insert("tools".to_string(), Value::Array(tools));
        config.insert(
            "toolConfig".to_string(),
            json!({"functionCallingConfig": {"mode": "AUTO"}}),
        );
    }
    if !input.system_prompt.trim().is_empty() {
        config.insert(
            "systemInstruction".to_string(),
            Value::String(input.system_prompt.to_string()),
        );
    }

    json!({
        "model": input.model,
        "contents": map_contents(input.messages),
        "config": config,
    })
}

/// Flatten an SDK-shaped body into `(model, REST request)`.
pub fn to_rest_request(body: &Value) -> Result<(String, Value)> {
    let model = body
        .get("model")
        .and_then(Value::as_str)
        .filter(|model| !model.is_empty())
        .ok_or_else(|| TabwrightError::InvalidInput("Gemini body has no model".to_string()))?
        .trim_start_matches("models/")
        .to_string();

    let mut request = Map::new();
    request.insert(
        "contents".to_string(),
        body.get("contents").cloned().unwrap_or_else(|| json!([])),
    );

    let mut generation_config = Map::new();
    if let Some(config) = body.get("config").and_then(Value::as_object) {
        for (key, value) in config {
            if key == "systemInstruction" {
                request.insert(key.clone(), system_instruction(value));
            } else if TOP_LEVEL_CONFIG_KEYS.contains(&key.as_str()) {
                request.insert(key.clone(), value.clone());
            } else {
                generation_config.insert(key.clone(), value.clone());
            }
        }
    }
    if !generation_config.is_empty() {
        request.insert(
            "generationConfig".to_string(),
            Value::Object(generation_config),
        );
    }

    Ok((model, Value::Object(request)))
}

fn system_instruction(value: &Value) -> Value {
    match value {
        Value::String(text) => json!({"parts": [{"text": text}]}),
        other => other.clone(),
    }
}

pub fn extract_reply(response: &Value) -> String {
    candidate_parts(response)
        .filter(|part| !is_thought(part))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect()
}

pub fn extract_tool_calls(response: &Value) -> Vec<ToolCall> {
    candidate_parts(response)
        .filter_map(function_call_from_part)
        .collect()
}

fn candidate_parts(response: &Value) -> impl Iterator<Item = &Value> {
    response
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn is_thought(part: &Value) -> bool {
    part.get("thought").and_then(Value::as_bool).unwrap_or(false)
}

fn function_call_from_part(part: &Value) -> Option<ToolCall> {
    let call = part.get("functionCall")?;
    let mut raw = call.clone();
    if let (Some(signature), Value::Object(map)) = (part.get("thoughtSignature"), &mut raw) {
        map.insert("thoughtSignature".to_string(), signature.clone());
    }
    normalize_tool_call(&raw)
}

/// Accumulates `candidates[0].content.parts` across chunks
#[derive(Debug, Default)]
pub struct GeminiAccumulator {
    calls: Vec<ToolCall>,
}

impl StreamAccumulator for GeminiAccumulator {
    fn process_chunk(&mut self, chunk: &Value) -> Result<Option<String>> {
        if chunk.get("error").is_some() {
            let message = error_message(chunk).unwrap_or_else(|| chunk.to_string());
            return Err(ApiError::StreamError(message).into());
        }

        let mut text = String::new();
        for part in candidate_parts(chunk) {
            if let Some(call) = function_call_from_part(part) {
                self.calls.push(call);
            } else if !is_thought(part) {
                if let Some(delta) = part.get("text").and_then(Value::as_str) {
                    text.push_str(delta);
                }
            }
        }
        Ok((!text.is_empty()).then_some(text))
    }

    fn finish(self: Box<Self>) -> Vec<ToolCall> {
        self.calls
    }
}

/// Per-call options for [`GeminiClient`]
#[derive(Debug, Clone, Default)]
pub struct GeminiCallConfig {
    pub abort_signal: CancellationToken,
}

/// Thin REST client for `generateContent`
pub struct GeminiClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    async fn post(
        &self,
        body: &Value,
        method: &str,
        config: &GeminiCallConfig,
    ) -> Result<reqwest::Response> {
        let (model, request) = to_rest_request(body)?;
        let url = endpoint(&self.base_url, &format!("models/{}:{}", model, method));
        let builder = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request);
        send_cancellable(builder, &config.abort_signal).await
    }

    pub async fn generate_content_stream(
        &self,
        body: &Value,
        config: &GeminiCallConfig,
    ) -> Result<ChunkStream> {
        let response = self
            .post(body, "streamGenerateContent?alt=sse", config)
            .await?;
        Ok(sse_chunk_stream(response))
    }

    pub async fn generate_content(&self, body: &Value, config: &GeminiCallConfig) -> Result<Value> {
        let response = self.post(body, "generateContent", config).await?;
        read_json(response, &config.abort_signal).await
    }
}

/// Adapter over [`GeminiClient`]
pub struct GeminiAdapter {
    client: GeminiClient,
}

impl GeminiAdapter {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: GeminiClient::new(client, base_url, api_key),
        }
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn api_type(&self) -> ApiType {
        ApiType::Gemini
    }

    async fn request_stream(
        &self,
        body: &Value,
        cancel: &CancellationToken,
    ) -> Result<ChunkStream> {
        let config = GeminiCallConfig {
            abort_signal: cancel.clone(),
        };
        self.client.generate_content_stream(body, &config).await
    }

    async fn request_non_stream(&self, body: &Value, cancel: &CancellationToken) -> Result<Value> {
        let config = GeminiCallConfig {
            abort_signal: cancel.clone(),
        };
        self.client.generate_content(body, &config).await
    }

    fn stream_accumulator(&self) -> Box<dyn StreamAccumulator> {
        Box::<GeminiAccumulator>::default()
    }

    fn extract_reply(&self, response: &Value) -> String {
        extract_reply(response)
    }

    fn extract_tool_calls(&self, response: &Value) -> Vec<ToolCall> {
        extract_tool_calls(response)
    }
}
