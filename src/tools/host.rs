// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Browser host interface
//!
//! Everything a tool needs from the browser: tabs, page content, previews,
//! and the script sandbox. The embedding runtime implements it.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::llm::providers::ApiType;

/// Failure reported by the browser host
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("tab {0} not found")]
    TabNotFound(i64),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Other(String),
}

pub type HostResult<T> = std::result::Result<T, HostError>;

/// An open browser tab
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_id: Option<i64>,
}

/// One page of a tab's content rendered as markdown
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMarkdownData {
    pub url: String,
    #[serde(default)]
    pub title: String,
    pub markdown: String,
    /// 1-based page index
    #[serde(default = "first_page")]
    pub page_number: u32,
    #[serde(default = "first_page")]
    pub total_pages: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

fn first_page() -> u32 {
    1
}

/// Browser operations available to tools
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrowserHost: Send + Sync {
    async fn get_all_tabs(&self) -> HostResult<Vec<TabInfo>>;

    /// Deliver a message to a tab's content script and return its reply.
    async fn send_message_to_tab(&self, tab_id: i64, payload: Value) -> HostResult<Value>;

    async fn fetch_page_markdown_data(
        &self,
        tab_id: i64,
        page_number: Option<u32>,
    ) -> HostResult<PageMarkdownData>;

    /// Whether newly opened tabs should take focus
    async fn should_follow_mode(&self) -> bool;

    async fn focus_tab(&self, tab_id: i64) -> HostResult<()>;

    async fn create_tab(&self, url: String, active: bool) -> HostResult<TabInfo>;

    async fn close_tab(&self, tab_id: i64) -> HostResult<()>;

    async fn set_tab_group_collapsed(&self, tab_id: i64, collapsed: bool) -> HostResult<()>;

    /// Store an HTML document and return the runtime path that serves it.
    async fn save_html_preview(&self, args: Value) -> HostResult<String>;

    async fn send_message_to_sandbox(&self, payload: Value, timeout: Duration)
        -> HostResult<Value>;

    async fn get_api_type(&self) -> ApiType;

    async fn get_runtime_url(&self, path: String) -> String;

    /// Record the content hash of the page last shown to the model.
    async fn sync_page_hash(&self, tab_id: i64, page: PageMarkdownData) -> HostResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_page_markdown_defaults() {
        let page: PageMarkdownData = serde_json::from_value(json!({
            "url": "https://a.test",
            "markdown": "# A"
        }))
        .unwrap();
        assert_eq!(page.page_number, 1);
        assert_eq!(page.total_pages, 1);
        assert!(page.hash.is_none());
    }

    #[test]
    fn test_tab_info_camel_case() {
        let tab = TabInfo {
            id: 1,
            title: "A".into(),
            url: "https://a.test".into(),
            active: true,
            window_id: Some(2),
        };
        assert_eq!(serde_json::to_value(&tab).unwrap()["windowId"], 2);
    }

    #[test]
    fn test_host_error_display() {
        assert_eq!(HostError::TabNotFound(4).to_string(), "tab 4 not found");
    }
}
