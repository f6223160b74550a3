// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Page content tools
//!
//! `get_page_markdown` and `open_page` both return a full page dump. The
//! context builder keeps only the latest dump per tab, so `open_page` marks
//! its result with the tab it produced.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{string_arg, tab_id_arg, GET_PAGE_MARKDOWN_TOOL, OPEN_PAGE_TOOL};
use crate::llm::context::OBSOLETE_PAGE_MARKER;
use crate::llm::message::ToolMessageContext;
use crate::llm::provider::ToolDefinition;
use crate::tools::{PageMarkdownData, SchemaBuilder, Tool, ToolContext, ToolError};

fn render_page(tab_id: i64, page: &PageMarkdownData) -> String {
    let mut text = format!(
        "Tab {}: {}\nURL: {}\nPage {} of {}\n\n{}",
        tab_id, page.title, page.url, page.page_number, page.total_pages, page.markdown
    );
    if page.page_number < page.total_pages {
        text.push_str(&format!(
            "\n\n(More content available: call {} with pageNumber {}.)",
            GET_PAGE_MARKDOWN_TOOL,
            page.page_number + 1
        ));
    }
    text
}

/// Reads a tab's content as markdown, one page at a time
pub struct GetPageMarkdownTool;

#[async_trait]
impl Tool for GetPageMarkdownTool {
    fn name(&self) -> &str {
        GET_PAGE_MARKDOWN_TOOL
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: GET_PAGE_MARKDOWN_TOOL.to_string(),
            description: "Read the content of a tab as markdown. Long pages are split into numbered pages.".to_string(),
            input_schema: SchemaBuilder::new()
                .integer("tabId", "Id of the tab to read", true)
                .integer("pageNumber", "1-based page to read (default: 1)", false)
                .build(),
        }
    }

    async fn execute(&self, args: Value, context: &ToolContext) -> Result<Value, ToolError> {
        let tab_id = tab_id_arg(&args, "tabId")?;
        let page_number = match args["pageNumber"].as_u64() {
            Some(0) => {
                return Err(ToolError::Input("pageNumber starts at 1".to_string()));
            }
            Some(n) => Some(u32::try_from(n).map_err(|_| {
                ToolError::Input("pageNumber is out of range".to_string())
            })?),
            None => None,
        };

        let host = context.host();
        let page = host.fetch_page_markdown_data(tab_id, page_number).await?;
        let content = render_page(tab_id, &page);
        host.sync_page_hash(tab_id, page).await?;

        Ok(json!({ "tabId": tab_id, "content": content }))
    }
}

/// Opens a URL in a new tab and returns its content
pub struct OpenPageTool;

#[async_trait]
impl Tool for OpenPageTool {
    fn name(&self) -> &str {
        OPEN_PAGE_TOOL
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: OPEN_PAGE_TOOL.to_string(),
            description: "Open a URL in a new tab and return the page content as markdown.".to_string(),
            input_schema: SchemaBuilder::new()
                .string("url", "Absolute URL to open", true)
                .boolean("active", "Bring the new tab to the foreground", false)
                .build(),
        }
    }

    async fn execute(&self, args: Value, context: &ToolContext) -> Result<Value, ToolError> {
        let url = string_arg(&args, "url")?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ToolError::Input(format!(
                "url must start with http:// or https://, got {}",
                url
            )));
        }

        let host = context.host();
        let follow = host.should_follow_mode().await;
        let active = args["active"].as_bool().unwrap_or(follow);

        let tab = host.create_tab(url.to_string(), active).await?;
        if follow {
            host.focus_tab(tab.id).await?;
        }

        let page = host.fetch_page_markdown_data(tab.id, None).await?;
        let content = format!("{}\n{}", OBSOLETE_PAGE_MARKER, render_page(tab.id, &page));
        host.sync_page_hash(tab.id, page).await?;

        Ok(json!({ "tabId": tab.id, "content": content }))
    }

    fn build_message_context(&self, output: &Value, _args: &Value) -> Option<ToolMessageContext> {
        output["tabId"].as_i64().map(|tab_id| ToolMessageContext {
            image: None,
            page_tab_id: Some(tab_id),
        })
    }

    fn error_message(&self, error: &ToolError) -> String {
        match error {
            ToolError::Input(message) => format!("Could not open the page: {}", message),
            _ => "Could not open the page. The site may be unreachable; try another URL.".to_string(),
        }
    }
}

/// Searches a tab for text
pub struct FindTool;

#[async_trait]
impl Tool for FindTool {
    fn name(&self) -> &str {
        "find"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "find".to_string(),
            description: "Find occurrences of text in a tab and return the surrounding snippets.".to_string(),
            input_schema: SchemaBuilder::new()
                .integer("tabId", "Id of the tab to search", true)
                .string("query", "Text to search for", true)
                .build(),
        }
    }

    async fn execute(&self, args: Value, context: &ToolContext) -> Result<Value, ToolError> {
        let tab_id = tab_id_arg(&args, "tabId")?;
        let query = string_arg(&args, "query")?;

        let reply = context
            .host()
            .send_message_to_tab(tab_id, json!({ "type": "find", "query": query }))
            .await?;

        if let Some(error) = reply["error"].as_str() {
            return Err(ToolError::Host(error.to_string()));
        }
        Ok(json!({ "query": query, "matches": reply["matches"].clone() }))
    }

    fn format_result(&self, output: &Value) -> Option<String> {
        let query = output["query"].as_str().unwrap_or_default();
        let matches = output["matches"].as_array().map(Vec::as_slice).unwrap_or(&[]);
        if matches.is_empty() {
            return Some(format!("No matches for \"{}\".", query));
        }

        let mut text = format!("{} match(es) for \"{}\":", matches.len(), query);
        for (i, m) in matches.iter().enumerate() {
            let snippet = m
                .as_str()
                .or_else(|| m["text"].as_str())
                .unwrap_or_default();
            text.push_str(&format!("\n{}. {}", i + 1, snippet));
        }
        Some(text)
    }

    fn error_message(&self, error: &ToolError) -> String {
        match error {
            ToolError::Input(message) => format!("Invalid find request: {}", message),
            _ => "Search failed on this tab. The page may not allow scripts; try get_page_markdown instead.".to_string(),
        }
    }
}
