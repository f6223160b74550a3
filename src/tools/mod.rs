// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tool system for Tabwright
//!
//! Tools act on browser tabs through a [`BrowserHost`] supplied by the
//! embedding runtime. The [`ToolExecutor`] resolves a tool by name,
//! validates its arguments, runs it, and turns the outcome (success or
//! failure) into a [`ToolMessage`] that re-enters the conversation.

pub mod builtin;
pub mod definition;
pub mod executor;
pub mod host;
pub mod normalize;

pub use definition::*;
pub use executor::*;
pub use host::*;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::llm::message::{MessageRecord, ToolMessageContext};
use crate::llm::provider::ToolDefinition;

/// Failure raised by a tool body
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// Arguments are wrong; the model can fix them
    #[error("{0}")]
    Input(String),

    /// The browser host refused or failed the operation
    #[error("{0}")]
    Host(String),

    /// Anything else
    #[error("{0}")]
    Internal(String),
}

impl From<HostError> for ToolError {
    fn from(err: HostError) -> Self {
        ToolError::Host(err.to_string())
    }
}

/// Context provided to tools during execution
#[derive(Clone)]
pub struct ToolContext {
    host: Arc<dyn BrowserHost>,
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext").finish_non_exhaustive()
    }
}

impl ToolContext {
    pub fn new(host: Arc<dyn BrowserHost>) -> Self {
        Self { host }
    }

    /// The browser host
    pub fn host(&self) -> &dyn BrowserHost {
        self.host.as_ref()
    }
}

/// Trait for implementing tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool name
    fn name(&self) -> &str;

    /// Get the tool definition for the LLM
    fn definition(&self) -> ToolDefinition;

    /// Check arguments before execution.
    ///
    /// Defaults to validating against the declared input schema.
    fn validate_args(&self, args: &Value) -> Result<(), ToolError> {
        let schema = self.definition().input_schema.to_value();
        jsonschema::validate(&schema, args).map_err(|err| ToolError::Input(err.to_string()))
    }

    /// Execute the tool with validated arguments
    async fn execute(&self, args: Value, context: &ToolContext) -> Result<Value, ToolError>;

    /// Custom rendering of a successful result
    fn format_result(&self, _output: &Value) -> Option<String> {
        None
    }

    /// Extra data to attach to the result message (an image, a page tab)
    fn build_message_context(&self, _output: &Value, _args: &Value) -> Option<ToolMessageContext> {
        None
    }

    /// Text the model sees when this tool fails
    fn error_message(&self, error: &ToolError) -> String {
        match error {
            ToolError::Input(message) => {
                format!("Invalid arguments for {}: {}", self.name(), message)
            }
            ToolError::Host(_) | ToolError::Internal(_) => format!(
                "The {} tool hit an internal error. Try a different approach.",
                self.name()
            ),
        }
    }
}

/// A tool result ready to append to the conversation
#[derive(Debug, Clone, PartialEq)]
pub struct ToolMessage {
    pub tool_call_id: String,
    pub name: String,
    pub content: String,
    pub tool_context: Option<ToolMessageContext>,
    pub is_error: bool,
}

impl ToolMessage {
    /// Stored form of this result
    pub fn into_record(self) -> MessageRecord {
        let record = MessageRecord::tool(self.tool_call_id, self.name, self.content);
        match self.tool_context {
            Some(context) => record.with_tool_context(context),
            None => record,
        }
    }
}

/// Registry of available tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    /// Aliases mapping alternate names to canonical tool names
    aliases: HashMap<String, String>,
}

impl ToolRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            aliases: HashMap::new(),
        }
    }

    /// Build the default tool aliases
    fn default_aliases() -> HashMap<String, String> {
        [
            ("read_page", builtin::GET_PAGE_MARKDOWN_TOOL),
            ("get_page", builtin::GET_PAGE_MARKDOWN_TOOL),
            ("open_url", builtin::OPEN_PAGE_TOOL),
            ("navigate", builtin::OPEN_PAGE_TOOL),
            ("tabs", "list_tabs"),
            ("screenshot", "capture_tab"),
            ("search_page", "find"),
        ]
        .into_iter()
        .map(|(alias, name)| (alias.to_string(), name.to_string()))
        .collect()
    }

    /// Create a registry with all built-in tools
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry.register(Arc::new(builtin::ListTabsTool));
        registry.register(Arc::new(builtin::GetPageMarkdownTool));
        registry.register(Arc::new(builtin::OpenPageTool));
        registry.register(Arc::new(builtin::CloseTabTool));
        registry.register(Arc::new(builtin::FocusTabTool));
        registry.register(Arc::new(builtin::FindTool));
        registry.register(Arc::new(builtin::CaptureTabTool));
        registry.register(Arc::new(builtin::RenderHtmlTool));
        registry.register(Arc::new(builtin::RunSandboxScriptTool));

        registry.aliases = Self::default_aliases();
        registry
    }

    /// Register a tool
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Get a tool by name, resolving aliases if needed
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        if let Some(tool) = self.tools.get(name) {
            return Some(tool);
        }
        self.aliases
            .get(name)
            .and_then(|canonical| self.tools.get(canonical))
    }

    /// Get all tool definitions, sorted by name
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.definition()).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// List all tool names
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registry_with_builtins() {
        let registry = ToolRegistry::with_builtins();
        assert_eq!(registry.len(), 9);
        assert!(registry.get("open_page").is_some());
        assert_eq!(
            registry.get("navigate").map(|t| t.name().to_string()),
            Some("open_page".to_string())
        );
        assert!(registry.get("shell").is_none());
    }

    #[test]
    fn test_definitions_sorted() {
        let registry = ToolRegistry::with_builtins();
        let names: Vec<String> = registry.definitions().into_iter().map(|d| d.name).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert_eq!(registry.names().len(), names.len());
    }

    #[test]
    fn test_default_validate_args_uses_schema() {
        let tool = builtin::CloseTabTool;
        assert!(tool.validate_args(&json!({"tabId": 3})).is_ok());
        assert!(matches!(
            tool.validate_args(&json!({})),
            Err(ToolError::Input(_))
        ));
        assert!(matches!(
            tool.validate_args(&json!({"tabId": "three"})),
            Err(ToolError::Input(_))
        ));
    }

    #[test]
    fn test_default_error_message() {
        let tool = builtin::ListTabsTool;
        assert_eq!(
            tool.error_message(&ToolError::Input("bad".into())),
            "Invalid arguments for list_tabs: bad"
        );
        assert!(tool
            .error_message(&ToolError::Internal("boom".into()))
            .contains("internal error"));
    }

    #[test]
    fn test_tool_message_into_record() {
        let message = ToolMessage {
            tool_call_id: "c1".to_string(),
            name: "open_page".to_string(),
            content: "Opened".to_string(),
            tool_context: Some(ToolMessageContext {
                image: None,
                page_tab_id: Some(5),
            }),
            is_error: false,
        };
        let record = message.into_record();
        assert_eq!(record.role, "tool");
        assert_eq!(record.tool_call_id.as_deref(), Some("c1"));
        assert_eq!(record.tool_context.unwrap().page_tab_id, Some(5));
    }
}
