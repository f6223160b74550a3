// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tool execution engine
//!
//! Tool failures never escape as errors: they become error-flagged result
//! messages so the model can correct itself on the next turn. The only
//! exception is a call with neither id nor name, which no message can answer.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TabwrightError};
use crate::llm::message::{ToolArguments, ToolCall};
use crate::llm::provider::ToolDefinition;

use super::{BrowserHost, Tool, ToolContext, ToolError, ToolMessage, ToolRegistry};

/// Tool executor that resolves, validates, and runs tool calls
pub struct ToolExecutor {
    registry: ToolRegistry,
    context: ToolContext,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, context: ToolContext) -> Self {
        Self { registry, context }
    }

    /// Executor with every built-in tool, acting on `host`
    pub fn with_builtins(host: Arc<dyn BrowserHost>) -> Self {
        Self::new(ToolRegistry::with_builtins(), ToolContext::new(host))
    }

    /// Get tool definitions for the LLM
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }

    /// Get mutable access to the tool registry for registration of additional tools
    pub fn registry_mut(&mut self) -> &mut ToolRegistry {
        &mut self.registry
    }

    /// Run one call and format its outcome as a result message.
    pub async fn execute(&self, call: &ToolCall) -> Result<ToolMessage> {
        let name = call.name.trim();
        let call_id = call.result_id().trim();

        if name.is_empty() && call_id.is_empty() {
            return Err(TabwrightError::MalformedToolCall(
                "tool call has neither an id nor a name".to_string(),
            ));
        }

        let call_id = if call_id.is_empty() {
            format!("call_{}", uuid::Uuid::new_v4().simple())
        } else {
            call_id.to_string()
        };

        let Some(tool) = self.registry.get(name).cloned() else {
            tracing::warn!(
                target: "tabwright.tools.executor",
                tool = name,
                call_id = %call_id,
                "unknown tool requested"
            );
            let content = if name.is_empty() {
                "Tool call is missing a tool name.".to_string()
            } else {
                format!("Unknown tool: {}", name)
            };
            return Ok(ToolMessage {
                tool_call_id: call_id,
                name: name.to_string(),
                content,
                tool_context: None,
                is_error: true,
            });
        };

        let message = match self.run(tool.as_ref(), &call.arguments).await {
            Ok((output, args)) => ToolMessage {
                tool_call_id: call_id,
                name: tool.name().to_string(),
                content: format_output(tool.as_ref(), &output),
                tool_context: tool.build_message_context(&output, &args),
                is_error: false,
            },
            Err(err) => {
                tracing::warn!(
                    target: "tabwright.tools.executor",
                    tool = tool.name(),
                    call_id = %call_id,
                    error = %err,
                    kind = error_kind(&err),
                    "tool failed"
                );
                ToolMessage {
                    tool_call_id: call_id,
                    name: tool.name().to_string(),
                    content: tool.error_message(&err),
                    tool_context: None,
                    is_error: true,
                }
            }
        };

        Ok(message)
    }

    async fn run(
        &self,
        tool: &dyn Tool,
        arguments: &ToolArguments,
    ) -> std::result::Result<(Value, Value), ToolError> {
        let args = parse_arguments(arguments)?;
        tool.validate_args(&args)?;
        let output = tool.execute(args.clone(), &self.context).await?;
        Ok((output, args))
    }

    /// Run calls one after another, stopping once `cancel` fires.
    ///
    /// A call that is already running when cancellation arrives finishes and
    /// its result is kept.
    pub async fn handle_tool_calls(
        &self,
        calls: &[ToolCall],
        cancel: &CancellationToken,
    ) -> Result<Vec<ToolMessage>> {
        let mut messages = Vec::with_capacity(calls.len());

        for call in calls {
            if cancel.is_cancelled() {
                tracing::debug!(
                    target: "tabwright.tools.executor",
                    completed = messages.len(),
                    remaining = calls.len() - messages.len(),
                    "cancelled; skipping remaining tool calls"
                );
                break;
            }
            messages.push(self.execute(call).await?);
        }

        Ok(messages)
    }
}

fn parse_arguments(arguments: &ToolArguments) -> std::result::Result<Value, ToolError> {
    let value = match arguments {
        ToolArguments::Text(text) if text.trim().is_empty() => {
            Value::Object(serde_json::Map::new())
        }
        ToolArguments::Text(text) => serde_json::from_str(text)
            .map_err(|e| ToolError::Input(format!("arguments are not valid JSON: {}", e)))?,
        ToolArguments::Structured(value) => value.clone(),
    };

    if !value.is_object() {
        return Err(ToolError::Input(
            "arguments must be a JSON object".to_string(),
        ));
    }
    Ok(value)
}

fn format_output(tool: &dyn Tool, output: &Value) -> String {
    if let Some(custom) = tool.format_result(output) {
        return custom;
    }
    match output {
        Value::String(text) => text.clone(),
        Value::Object(map) => match map.get("content").and_then(Value::as_str) {
            Some(content) => content.to_string(),
            None => output.to_string(),
        },
        other => other.to_string(),
    }
}

fn error_kind(err: &ToolError) -> &'static str {
    match err {
        ToolError::Input(_) => "input",
        ToolError::Host(_) => "host",
        ToolError::Internal(_) => "internal",
    }
}
