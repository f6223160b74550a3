// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tab management tools

use async_trait::async_trait;
use serde_json::{json, Value};

use super::tab_id_arg;
use crate::llm::provider::ToolDefinition;
use crate::tools::{HostError, SchemaBuilder, Tool, ToolContext, ToolError};

/// Lists every open tab
pub struct ListTabsTool;

#[async_trait]
impl Tool for ListTabsTool {
    fn name(&self) -> &str {
        "list_tabs"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "list_tabs".to_string(),
            description: "List all open browser tabs with their ids, titles, and URLs.".to_string(),
            input_schema: SchemaBuilder::new().build(),
        }
    }

    async fn execute(&self, _args: Value, context: &ToolContext) -> Result<Value, ToolError> {
        let tabs = context.host().get_all_tabs().await?;
        Ok(json!({ "tabs": tabs }))
    }

    fn format_result(&self, output: &Value) -> Option<String> {
        let tabs = output["tabs"].as_array()?;
        if tabs.is_empty() {
            return Some("No tabs are open.".to_string());
        }
        let lines: Vec<String> = tabs
            .iter()
            .map(|tab| {
                let marker = if tab["active"].as_bool().unwrap_or(false) {
                    " (active)"
                } else {
                    ""
                };
                format!(
                    "[{}] {} - {}{}",
                    tab["id"],
                    tab["title"].as_str().unwrap_or(""),
                    tab["url"].as_str().unwrap_or(""),
                    marker
                )
            })
            .collect();
        Some(lines.join("\n"))
    }
}

/// Closes a tab
pub struct CloseTabTool;

#[async_trait]
impl Tool for CloseTabTool {
    fn name(&self) -> &str {
        "close_tab"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "close_tab".to_string(),
            description: "Close a browser tab by id.".to_string(),
            input_schema: SchemaBuilder::new()
                .integer("tabId", "Id of the tab to close", true)
                .build(),
        }
    }

    async fn execute(&self, args: Value, context: &ToolContext) -> Result<Value, ToolError> {
        let tab_id = tab_id_arg(&args, "tabId")?;
        context.host().close_tab(tab_id).await.map_err(|err| match err {
            HostError::TabNotFound(id) => ToolError::Input(format!("tab {} does not exist", id)),
            other => other.into(),
        })?;
        Ok(Value::String(format!("Closed tab {}.", tab_id)))
    }

    fn error_message(&self, error: &ToolError) -> String {
        match error {
            ToolError::Input(message) => format!(
                "Could not close the tab: {}. Call list_tabs to see valid tab ids.",
                message
            ),
            _ => "Could not close the tab. It may already be closed.".to_string(),
        }
    }
}

/// Brings a tab to the foreground
pub struct FocusTabTool;

#[async_trait]
impl Tool for FocusTabTool {
    fn name(&self) -> &str {
        "focus_tab"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "focus_tab".to_string(),
            description: "Switch to a browser tab so the user can see it.".to_string(),
            input_schema: SchemaBuilder::new()
                .integer("tabId", "Id of the tab to focus", true)
                .build(),
        }
    }

    async fn execute(&self, args: Value, context: &ToolContext) -> Result<Value, ToolError> {
        let tab_id = tab_id_arg(&args, "tabId")?;
        let host = context.host();
        host.focus_tab(tab_id).await?;
        // A focused tab inside a collapsed group is still hidden.
        host.set_tab_group_collapsed(tab_id, false).await?;
        Ok(Value::String(format!("Focused tab {}.", tab_id)))
    }
}
