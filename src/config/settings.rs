// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Settings management for Tabwright
//!
//! Handles loading and saving settings from ~/.tabwright/settings.json

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::providers::ApiType;

mod io;
pub(crate) mod merge;
mod validation;

/// Main settings structure, stored in ~/.tabwright/settings.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Which wire protocol to speak
    #[serde(default)]
    pub api_type: ApiType,

    /// LLM provider configurations
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Retry budget for model requests
    #[serde(default)]
    pub resilience: ResilienceConfig,

    /// `max_tokens` sent with Anthropic Messages requests
    #[serde(default = "default_anthropic_max_tokens")]
    pub anthropic_max_tokens: u32,

    /// User rules applied to request bodies after they are built
    #[serde(default)]
    pub body_overrides: Vec<BodyOverrideRule>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_type: ApiType::default(),
            providers: ProvidersConfig::default(),
            resilience: ResilienceConfig::default(),
            anthropic_max_tokens: default_anthropic_max_tokens(),
            body_overrides: Vec::new(),
        }
    }
}

/// Configuration for LLM providers, one entry per wire protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// OpenAI-compatible Chat Completions
    #[serde(default = "default_chat_config")]
    pub chat: ProviderConfig,

    /// OpenAI Responses API
    #[serde(default = "default_responses_config")]
    pub responses: ProviderConfig,

    /// Anthropic Messages API
    #[serde(default = "default_anthropic_config")]
    pub anthropic: ProviderConfig,

    /// Google Gemini API
    #[serde(default = "default_gemini_config")]
    pub gemini: ProviderConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            chat: default_chat_config(),
            responses: default_responses_config(),
            anthropic: default_anthropic_config(),
            gemini: default_gemini_config(),
        }
    }
}

/// Connection settings for a single provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    /// API key (if stored in config); written as `null` when cleared
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable name for the API key
    pub api_key_env: String,

    /// Base URL, without the endpoint path
    pub base_url: String,

    /// Model identifier
    pub model: String,
}

impl ProviderConfig {
    fn new(api_key_env: &str, base_url: &str, model: &str) -> Self {
        Self {
            api_key: None,
            api_key_env: api_key_env.to_string(),
            base_url: base_url.to_string(),
            model: model.to_string(),
        }
    }
}

/// Retry and resilience settings for API calls
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResilienceConfig {
    /// Base delay in milliseconds for exponential backoff
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Total wall-clock budget in milliseconds across all attempts
    #[serde(default = "default_budget_ms")]
    pub budget_ms: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            budget_ms: default_budget_ms(),
        }
    }
}

/// A declarative edit applied to a built request body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BodyOverrideRule {
    /// What to do at `path`
    pub op: OverrideOp,

    /// JSON Pointer into the body (e.g. `/generationConfig/temperature`)
    pub path: String,

    /// Value for `set` and `merge`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    /// Which body variant the rule applies to
    #[serde(default)]
    pub target: OverrideTarget,
}

/// Override operations
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverrideOp {
    /// Write the value, creating intermediate objects
    Set,
    /// Delete the key or array element
    Remove,
    /// Deep-merge an object into the existing value
    Merge,
}

/// Body variants an override rule targets
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverrideTarget {
    #[default]
    Both,
    Stream,
    NonStream,
}

impl OverrideTarget {
    /// Whether the rule applies to the stream (`true`) or non-stream body.
    pub fn applies_to(&self, stream: bool) -> bool {
        match self {
            OverrideTarget::Both => true,
            OverrideTarget::Stream => stream,
            OverrideTarget::NonStream => !stream,
        }
    }
}

// Default value functions
fn default_chat_config() -> ProviderConfig {
    ProviderConfig::new("OPENAI_API_KEY", "https://api.openai.com/v1", "gpt-4.1")
}

fn default_responses_config() -> ProviderConfig {
    ProviderConfig::new("OPENAI_API_KEY", "https://api.openai.com/v1", "gpt-4.1")
}

fn default_anthropic_config() -> ProviderConfig {
    ProviderConfig::new(
        "ANTHROPIC_API_KEY",
        "https://api.anthropic.com/v1",
        "claude-sonnet-4-20250514",
    )
}

fn default_gemini_config() -> ProviderConfig {
    ProviderConfig::new(
        "GEMINI_API_KEY",
        "https://generativelanguage.googleapis.com/v1beta",
        "gemini-2.5-flash",
    )
}

fn default_anthropic_max_tokens() -> u32 {
    64_000
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_budget_ms() -> u64 {
    60_000
}
