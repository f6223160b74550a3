// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Screenshot tool

use async_trait::async_trait;
use serde_json::{json, Value};

use super::tab_id_arg;
use crate::llm::message::{ToolImageInput, ToolMessageContext};
use crate::llm::provider::ToolDefinition;
use crate::tools::{SchemaBuilder, Tool, ToolContext, ToolError};

/// Captures the visible area of a tab as an image
pub struct CaptureTabTool;

#[async_trait]
impl Tool for CaptureTabTool {
    fn name(&self) -> &str {
        "capture_tab"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "capture_tab".to_string(),
            description: "Take a screenshot of the visible part of a tab.".to_string(),
            input_schema: SchemaBuilder::new()
                .integer("tabId", "Id of the tab to capture", true)
                .string_enum("format", "Image format (default: png)", &["png", "jpeg"], false)
                .build(),
        }
    }

    async fn execute(&self, args: Value, context: &ToolContext) -> Result<Value, ToolError> {
        let tab_id = tab_id_arg(&args, "tabId")?;
        let format = args["format"].as_str().unwrap_or("png");

        let reply = context
            .host()
            .send_message_to_tab(tab_id, json!({ "type": "capture", "format": format }))
            .await?;

        let data_url = reply["dataUrl"]
            .as_str()
            .ok_or_else(|| ToolError::Host("capture returned no image".to_string()))?;
        if ToolImageInput::from_data_url(data_url).is_none() {
            return Err(ToolError::Host("capture returned an invalid data URL".to_string()));
        }

        Ok(json!({
            "content": format!("Captured tab {}.", tab_id),
            "dataUrl": data_url,
        }))
    }

    fn build_message_context(&self, output: &Value, _args: &Value) -> Option<ToolMessageContext> {
        let image = ToolImageInput::from_data_url(output["dataUrl"].as_str()?)?;
        Some(ToolMessageContext {
            image: Some(image),
            page_tab_id: None,
        })
    }
}
