// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! HTML preview and sandboxed script tools

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::string_arg;
use crate::llm::provider::ToolDefinition;
use crate::tools::{HostError, SchemaBuilder, Tool, ToolContext, ToolError};

const DEFAULT_SCRIPT_TIMEOUT_MS: u64 = 10_000;
const MAX_SCRIPT_TIMEOUT_MS: u64 = 60_000;

/// Renders model-written HTML in a new preview tab
pub struct RenderHtmlTool;

#[async_trait]
impl Tool for RenderHtmlTool {
    fn name(&self) -> &str {
        "render_html"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "render_html".to_string(),
            description: "Render an HTML document in a new preview tab.".to_string(),
            input_schema: SchemaBuilder::new()
                .string("html", "Complete HTML document", true)
                .string("title", "Title for the preview", false)
                .build(),
        }
    }

    async fn execute(&self, args: Value, context: &ToolContext) -> Result<Value, ToolError> {
        string_arg(&args, "html")?;

        let host = context.host();
        let path = host.save_html_preview(args).await?;
        let url = host.get_runtime_url(path).await;
        let tab = host.create_tab(url.clone(), true).await?;

        Ok(json!({
            "tabId": tab.id,
            "content": format!("Rendered preview in tab {} ({}).", tab.id, url),
        }))
    }
}

/// Runs JavaScript in the isolated sandbox page
pub struct RunSandboxScriptTool;

#[async_trait]
impl Tool for RunSandboxScriptTool {
    fn name(&self) -> &str {
        "run_sandbox_script"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "run_sandbox_script".to_string(),
            description: "Run JavaScript in an isolated sandbox and return its result. The sandbox has no access to open tabs.".to_string(),
            input_schema: SchemaBuilder::new()
                .string("code", "JavaScript to evaluate", true)
                .integer("timeoutMs", "Timeout in milliseconds (default: 10000, max: 60000)", false)
                .build(),
        }
    }

    async fn execute(&self, args: Value, context: &ToolContext) -> Result<Value, ToolError> {
        let code = string_arg(&args, "code")?;
        let timeout_ms = args["timeoutMs"]
            .as_u64()
            .unwrap_or(DEFAULT_SCRIPT_TIMEOUT_MS)
            .clamp(1, MAX_SCRIPT_TIMEOUT_MS);

        let reply = context
            .host()
            .send_message_to_sandbox(
                json!({ "type": "run", "code": code }),
                Duration::from_millis(timeout_ms),
            )
            .await
            .map_err(|err| match err {
                HostError::Timeout(after) => {
                    ToolError::Input(format!("script did not finish within {:?}", after))
                }
                other => other.into(),
            })?;

        if let Some(error) = reply["error"].as_str() {
            return Err(ToolError::Input(format!("script threw: {}", error)));
        }
        Ok(reply.get("result").cloned().unwrap_or(Value::Null))
    }

    fn format_result(&self, output: &Value) -> Option<String> {
        match output {
            Value::Null => Some("Script finished with no result.".to_string()),
            Value::String(text) => Some(text.clone()),
            other => serde_json::to_string_pretty(other).ok(),
        }
    }
}
