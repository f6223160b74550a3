// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Built-in browser tools

mod capture;
mod page;
mod render;
mod tabs;

pub use capture::CaptureTabTool;
pub use page::{FindTool, GetPageMarkdownTool, OpenPageTool};
pub use render::{RenderHtmlTool, RunSandboxScriptTool};
pub use tabs::{CloseTabTool, FocusTabTool, ListTabsTool};

use serde_json::Value;

use super::ToolError;

/// Tool that reads a tab's content as markdown
pub const GET_PAGE_MARKDOWN_TOOL: &str = "get_page_markdown";

/// Tool that opens a URL and returns the loaded page's content
pub const OPEN_PAGE_TOOL: &str = "open_page";

/// Read a required integer tab id.
pub(crate) fn tab_id_arg(args: &Value, key: &str) -> Result<i64, ToolError> {
    match &args[key] {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| ToolError::Input(format!("{} must be an integer", key))),
        Value::Null => Err(ToolError::Input(format!("{} is required", key))),
        _ => Err(ToolError::Input(format!("{} must be an integer", key))),
    }
}

pub(crate) fn string_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args[key]
        .as_str()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ToolError::Input(format!("{} is required", key)))
}
