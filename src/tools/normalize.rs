// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tool call normalization
//!
//! Providers disagree on tool call field names. Two shapes are accepted:
//!
//! - function shape: `{id, function: {name, arguments}}` (Chat Completions)
//! - flat shape: `{name, call_id | id, arguments | input | args}` (Responses,
//!   Anthropic `tool_use`, Gemini `functionCall`)

use serde_json::Value;

use crate::llm::message::{ToolArguments, ToolCall};

/// Convert one raw tool call into the canonical form.
///
/// Returns `None` when neither an id nor a name can be resolved; callers treat
/// that as "not a tool call". A call with a name but no id receives a
/// generated id so a result message can still address it.
pub fn normalize_tool_call(raw: &Value) -> Option<ToolCall> {
    let obj = raw.as_object()?;

    let function = obj.get("function").and_then(Value::as_object);

    let name = function
        .and_then(|f| non_empty_str(f.get("name")))
        .or_else(|| non_empty_str(obj.get("name")));

    let id = non_empty_str(obj.get("id"));
    let call_id = non_empty_str(obj.get("call_id")).or_else(|| non_empty_str(obj.get("callId")));

    if name.is_none() && id.is_none() && call_id.is_none() {
        return None;
    }

    let (id, call_id) = match (id, call_id) {
        (Some(id), Some(call_id)) => (id, call_id),
        (Some(id), None) => (id.clone(), id),
        (None, Some(call_id)) => (call_id.clone(), call_id),
        (None, None) => {
            let generated = format!("call_{}", uuid::Uuid::new_v4().simple());
            (generated.clone(), generated)
        }
    };

    let raw_arguments = function
        .and_then(|f| f.get("arguments"))
        .or_else(|| obj.get("arguments"))
        .or_else(|| obj.get("input"))
        .or_else(|| obj.get("args"));

    let arguments = match raw_arguments {
        None | Some(Value::Null) => ToolArguments::Text(String::new()),
        Some(Value::String(text)) => ToolArguments::Text(text.clone()),
        Some(other) => ToolArguments::Structured(other.clone()),
    };

    let thought_signature = non_empty_str(obj.get("thoughtSignature"))
        .or_else(|| non_empty_str(obj.get("thought_signature")));

    Some(ToolCall {
        id,
        call_id,
        name: name.unwrap_or_default(),
        arguments,
        thought_signature,
    })
}

/// Normalize a list of raw tool calls, skipping entries that are not tool calls.
pub fn normalize_tool_calls(raw: &[Value]) -> Vec<ToolCall> {
    raw.iter()
        .filter_map(|value| {
            let call = normalize_tool_call(value);
            if call.is_none() {
                tracing::debug!(
                    target: "tabwright.tools.normalize",
                    raw = %value,
                    "ignoring entry that is not a tool call"
                );
            }
            call
        })
        .collect()
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
