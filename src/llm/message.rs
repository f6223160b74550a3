// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Message types for LLM interactions
//!
//! `MessageRecord` is the caller's stored turn. It is normalized into a
//! `NormalizedMessage`, windowed and deduplicated into provider-agnostic
//! `MessageIntermediate` values, and only then mapped to a wire format.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::tools::normalize::normalize_tool_calls;

/// Role of the message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt
    System,
    /// User message
    User,
    /// Assistant response
    Assistant,
    /// Tool result
    Tool,
}

impl Role {
    /// Parse a role string from a stored record.
    pub fn parse(role: &str) -> Option<Self> {
        match role.trim().to_ascii_lowercase().as_str() {
            "system" | "developer" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" | "model" => Some(Role::Assistant),
            "tool" | "function" => Some(Role::Tool),
            _ => None,
        }
    }

    /// Wire name used by OpenAI-style APIs
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One conversation turn as stored by the caller
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Raw role string
    pub role: String,

    /// Text, null, or a list of content parts
    #[serde(default)]
    pub content: Value,

    /// Raw tool calls in any provider's shape
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<Value>>,

    /// Tool call this record answers (tool role only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Tool name (tool role only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Extra data produced while executing the tool
    #[serde(
        default,
        rename = "toolContext",
        skip_serializing_if = "Option::is_none"
    )]
    pub tool_context: Option<ToolMessageContext>,

    /// Hidden from the UI (still sent to the model)
    #[serde(default)]
    pub hidden: bool,

    /// Still being produced; never sent to the model
    #[serde(default)]
    pub pending: bool,
}

impl MessageRecord {
    /// Create a user record
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: Value::String(content.into()),
            ..Default::default()
        }
    }

    /// Create an assistant record
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: Value::String(content.into()),
            ..Default::default()
        }
    }

    /// Create an assistant record carrying raw tool calls
    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<Value>) -> Self {
        Self {
            tool_calls: Some(tool_calls),
            ..Self::assistant(content)
        }
    }

    /// Create a tool result record
    pub fn tool(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: "tool".to_string(),
            content: Value::String(content.into()),
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Attach a tool context
    pub fn with_tool_context(mut self, context: ToolMessageContext) -> Self {
        self.tool_context = Some(context);
        self
    }
}

/// Extra data attached to a tool result message
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolMessageContext {
    /// Image to show the model alongside the tool result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ToolImageInput>,

    /// Tab whose content this result reproduces after a successful navigation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_tab_id: Option<i64>,
}

/// An image to attach to a tool result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "sourceType", rename_all = "lowercase")]
pub enum ToolImageInput {
    /// Remote image
    Url {
        #[serde(rename = "mimeType")]
        mime_type: String,
        url: String,
    },
    /// Inline base64 image
    Base64 {
        #[serde(rename = "mimeType")]
        mime_type: String,
        data: String,
    },
}

impl ToolImageInput {
    /// MIME type of the image
    pub fn mime_type(&self) -> &str {
        match self {
            ToolImageInput::Url { mime_type, .. } | ToolImageInput::Base64 { mime_type, .. } => {
                mime_type
            }
        }
    }

    /// URL form usable by OpenAI-style APIs (data URI for inline images)
    pub fn as_url(&self) -> String {
        match self {
            ToolImageInput::Url { url, .. } => url.clone(),
            ToolImageInput::Base64 { mime_type, data } => {
                format!("data:{};base64,{}", mime_type, data)
            }
        }
    }

    /// Parse a `data:<mime>;base64,<data>` URI.
    pub fn from_data_url(data_url: &str) -> Option<Self> {
        let rest = data_url.strip_prefix("data:")?;
        let (meta, data) = rest.split_once(',')?;
        let mime_type = meta.strip_suffix(";base64")?;
        if mime_type.is_empty() || data.is_empty() {
            return None;
        }
        Some(ToolImageInput::Base64 {
            mime_type: mime_type.to_string(),
            data: data.to_string(),
        })
    }
}

/// Tool call arguments as received: a JSON string or an already-structured value
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ToolArguments {
    Text(String),
    Structured(Value),
}

impl Default for ToolArguments {
    fn default() -> Self {
        ToolArguments::Text(String::new())
    }
}

impl ToolArguments {
    /// Serialize to the JSON string form sent to OpenAI-style APIs.
    ///
    /// Structured values that are not objects are coerced to `{}`.
    pub fn to_json_string(&self) -> String {
        match self {
            ToolArguments::Text(text) if text.trim().is_empty() => "{}".to_string(),
            ToolArguments::Text(text) => text.clone(),
            ToolArguments::Structured(value @ Value::Object(_)) => value.to_string(),
            ToolArguments::Structured(other) => {
                tracing::warn!(
                    target: "tabwright.llm.message",
                    kind = json_kind(other),
                    "tool call arguments are not an object; sending {{}}"
                );
                "{}".to_string()
            }
        }
    }
}

/// Canonical tool invocation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub call_id: String,
    pub name: String,
    pub arguments: ToolArguments,
    #[serde(
        default,
        rename = "thoughtSignature",
        skip_serializing_if = "Option::is_none"
    )]
    pub thought_signature: Option<String>,
}

impl ToolCall {
    /// Create a call whose id and call_id match
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: ToolArguments) -> Self {
        let id = id.into();
        Self {
            call_id: id.clone(),
            id,
            name: name.into(),
            arguments,
            thought_signature: None,
        }
    }

    /// Identifier a tool result must reference
    pub fn result_id(&self) -> &str {
        if self.call_id.is_empty() {
            &self.id
        } else {
            &self.call_id
        }
    }

    /// Raw function-shaped JSON, suitable for storing in a `MessageRecord`.
    pub fn to_raw(&self) -> Value {
        let mut raw = serde_json::json!({
            "id": self.id,
            "call_id": self.call_id,
            "type": "function",
            "function": {
                "name": self.name,
                "arguments": self.arguments.to_json_string(),
            },
        });
        if let Some(signature) = &self.thought_signature {
            raw["thoughtSignature"] = Value::String(signature.clone());
        }
        raw
    }
}

/// Provider-mapping-ready tool call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallEntry {
    pub call_id: String,
    pub name: String,
    pub arguments: String,
    pub thought_signature: Option<String>,
}

impl ToolCallEntry {
    /// Arguments parsed back into an object for APIs that want structured input.
    ///
    /// Anything that is not a JSON object is logged and replaced by `{}`.
    pub fn arguments_object(&self) -> Map<String, Value> {
        match serde_json::from_str::<Value>(&self.arguments) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                tracing::warn!(
                    target: "tabwright.llm.message",
                    call_id = %self.call_id,
                    kind = json_kind(&other),
                    "tool call arguments are not an object; coercing to {{}}"
                );
                Map::new()
            }
            Err(err) => {
                tracing::warn!(
                    target: "tabwright.llm.message",
                    call_id = %self.call_id,
                    error = %err,
                    "tool call arguments are not valid JSON; coercing to {{}}"
                );
                Map::new()
            }
        }
    }
}

impl From<&ToolCall> for ToolCallEntry {
    fn from(call: &ToolCall) -> Self {
        Self {
            call_id: call.result_id().to_string(),
            name: call.name.clone(),
            arguments: call.arguments.to_json_string(),
            thought_signature: call.thought_signature.clone(),
        }
    }
}

/// Validated projection of a `MessageRecord`
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedMessage {
    pub role: Role,
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub tool_call_id: Option<String>,
    pub name: Option<String>,
    pub tool_context: Option<ToolMessageContext>,
}

impl NormalizedMessage {
    /// Whether the message carries any non-whitespace text
    pub fn has_text(&self) -> bool {
        !self.content.trim().is_empty()
    }
}

/// Provider-agnostic turn
#[derive(Debug, Clone, PartialEq)]
pub enum MessageIntermediate {
    Conversation {
        role: Role,
        content: String,
        tool_call_entries: Vec<ToolCallEntry>,
    },
    ToolResult {
        call_id: String,
        content: String,
        name: Option<String>,
        image_input: Option<ToolImageInput>,
    },
}

/// Normalize one stored record.
///
/// Returns `None` for records that must not reach the model: pending turns,
/// unknown roles, and tool results that do not reference a call.
pub fn normalize_message(record: &MessageRecord) -> Option<NormalizedMessage> {
    if record.pending {
        return None;
    }

    let Some(role) = Role::parse(&record.role) else {
        tracing::warn!(
            target: "tabwright.llm.message",
            role = %record.role,
            "dropping message with unknown role"
        );
        return None;
    };

    let tool_call_id = record
        .tool_call_id
        .as_ref()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty());

    if role == Role::Tool && tool_call_id.is_none() {
        tracing::warn!(
            target: "tabwright.llm.message",
            "dropping tool message without tool_call_id"
        );
        return None;
    }

    let tool_calls = match (&record.tool_calls, role) {
        (Some(raw), Role::Assistant | Role::User) => normalize_tool_calls(raw),
        _ => Vec::new(),
    };

    Some(NormalizedMessage {
        role,
        content: content_text(&record.content),
        tool_calls,
        tool_call_id,
        name: record.name.clone().filter(|name| !name.is_empty()),
        tool_context: record.tool_context.clone(),
    })
}

/// Normalize a full history, skipping records that cannot be sent.
pub fn normalize_messages(records: &[MessageRecord]) -> Vec<NormalizedMessage> {
    records.iter().filter_map(normalize_message).collect()
}

/// Flatten stored content into plain text.
fn content_text(content: &Value) -> String {
    match content {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| match part {
                Value::String(text) => Some(text.as_str()),
                Value::Object(obj) => obj.get("text").and_then(Value::as_str),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Object(obj) => obj
            .get("text")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| content.to_string()),
        other => other.to_string(),
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
