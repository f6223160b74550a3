// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Request body builders
//!
//! Each provider contributes one base-body function. The stream and
//! non-stream bodies are both derived from that single value, so they can
//! only differ in the stream flag and in rules targeted at one variant.

use serde_json::{Map, Value};

use crate::config::settings::merge::deep_merge;
use crate::config::{BodyOverrideRule, OverrideOp};
use crate::llm::message::MessageIntermediate;
use crate::llm::provider::ToolDefinition;
use crate::llm::providers::{anthropic, chat, gemini, responses, ApiType};

/// Everything a provider needs to build a body
#[derive(Debug, Clone, Copy)]
pub struct BodyInput<'a> {
    pub model: &'a str,
    pub system_prompt: &'a str,
    pub tools: &'a [ToolDefinition],
    pub messages: &'a [MessageIntermediate],
    pub anthropic_max_tokens: u32,
}

/// Streaming and non-streaming variants of one request
#[derive(Debug, Clone, PartialEq)]
pub struct RequestBodies {
    pub stream: Value,
    pub non_stream: Value,
}

/// Build both bodies for `api_type`, then apply `overrides`.
pub fn build_request_bodies(
    api_type: ApiType,
    input: &BodyInput<'_>,
    overrides: &[BodyOverrideRule],
) -> RequestBodies {
    let base = match api_type {
        ApiType::Chat => chat::build_base_body(input),
        ApiType::Responses => responses::build_base_body(input),
        ApiType::Anthropic => anthropic::build_base_body(input),
        ApiType::Gemini => gemini::build_base_body(input),
    };

    let (mut stream, mut non_stream) = match api_type {
        // Gemini selects streaming by endpoint, not by a body field.
        ApiType::Gemini => (base.clone(), base),
        _ => (with_stream_flag(base.clone(), true), with_stream_flag(base, false)),
    };

    apply_body_overrides(&mut stream, overrides, true);
    apply_body_overrides(&mut non_stream, overrides, false);

    RequestBodies { stream, non_stream }
}

fn with_stream_flag(mut body: Value, stream: bool) -> Value {
    if let Value::Object(map) = &mut body {
        map.insert("stream".to_string(), Value::Bool(stream));
    }
    body
}

/// Apply override rules in order. Invalid rules are logged and skipped.
pub fn apply_body_overrides(body: &mut Value, rules: &[BodyOverrideRule], stream: bool) {
    for rule in rules.iter().filter(|rule| rule.target.applies_to(stream)) {
        if let Err(reason) = apply_rule(body, rule) {
            tracing::warn!(
                target: "tabwright.llm.body",
                path = %rule.path,
                op = ?rule.op,
                reason = %reason,
                "skipping body override"
            );
        }
    }
}

fn apply_rule(body: &mut Value, rule: &BodyOverrideRule) -> std::result::Result<(), String> {
    let tokens = parse_pointer(&rule.path)?;
    match rule.op {
        OverrideOp::Set => {
            let value = rule.value.clone().ok_or("set requires a value")?;
            set_at(body, &tokens, value)
        }
        OverrideOp::Remove => remove_at(body, &tokens),
        OverrideOp::Merge => {
            let value = rule.value.clone().ok_or("merge requires a value")?;
            if !value.is_object() {
                return Err("merge requires an object value".to_string());
            }
            match body.pointer_mut(&rule.path) {
                Some(target) => {
                    let current = std::mem::take(target);
                    *target = deep_merge(current, value);
                    Ok(())
                }
                None => set_at(body, &tokens, value),
            }
        }
    }
}

fn parse_pointer(path: &str) -> std::result::Result<Vec<String>, String> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = path.strip_prefix('/') else {
        return Err("pointer must start with '/'".to_string());
    };
    Ok(rest
        .split('/')
        .map(|token| token.replace("~1", "/").replace("~0", "~"))
        .collect())
}

fn set_at(body: &mut Value, tokens: &[String], value: Value) -> std::result::Result<(), String> {
    let Some((last, parents)) = tokens.split_last() else {
        *body = value;
        return Ok(());
    };

    let mut current = body;
    for token in parents {
        current = match current {
            Value::Object(map) => map
                .entry(token.clone())
                .or_insert_with(|| Value::Object(Map::new())),
            Value::Array(items) => {
                let index = array_index(token, items.len())?;
                &mut items[index]
            }
            _ => return Err(format!("'{}' is not a container", token)),
        };
    }

    match current {
        Value::Object(map) => {
            map.insert(last.clone(), value);
            Ok(())
        }
        Value::Array(items) if last == "-" || last.parse::<usize>().ok() == Some(items.len()) => {
            items.push(value);
            Ok(())
        }
        Value::Array(items) => {
            let index = array_index(last, items.len())?;
            items[index] = value;
            Ok(())
        }
        _ => Err(format!("parent of '{}' is not a container", last)),
    }
}

fn remove_at(body: &mut Value, tokens: &[String]) -> std::result::Result<(), String> {
    let Some((last, parents)) = tokens.split_last() else {
        return Err("cannot remove the whole body".to_string());
    };

    let mut current = body;
    for token in parents {
        let next = match current {
            Value::Object(map) => map.get_mut(token),
            Value::Array(items) => token.parse::<usize>().ok().and_then(|i| items.get_mut(i)),
            _ => None,
        };
        match next {
            Some(next) => current = next,
            None => return Ok(()),
        }
    }

    match current {
        Value::Object(map) => {
            map.remove(last);
        }
        Value::Array(items) => {
            if let Some(index) = last.parse::<usize>().ok().filter(|i| *i < items.len()) {
                items.remove(index);
            }
        }
        _ => {}
    }
    Ok(())
}

fn array_index(token: &str, len: usize) -> std::result::Result<usize, String> {
    token
        .parse::<usize>()
        .ok()
        .filter(|index| *index < len)
        .ok_or_else(|| format!("array index '{}' out of range", token))
}
