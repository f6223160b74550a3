// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! LLM provider implementations
//!
//! One module per wire protocol. Dispatch goes through [`ProviderTable`],
//! keyed by the closed [`ApiType`] enum and resolved once per request.

pub mod anthropic;
pub mod chat;
pub mod common;
pub mod gemini;
pub mod responses;

pub use anthropic::AnthropicAdapter;
pub use chat::ChatAdapter;
pub use gemini::GeminiAdapter;
pub use responses::ResponsesAdapter;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::error::{Result, TabwrightError};
use crate::llm::provider::ProviderAdapter;

/// Wire protocol spoken by a provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiType {
    /// OpenAI Chat Completions
    #[default]
    Chat,
    /// OpenAI Responses
    Responses,
    /// Anthropic Messages
    Anthropic,
    /// Google Gemini
    Gemini,
}

impl ApiType {
    pub const ALL: [ApiType; 4] = [
        ApiType::Chat,
        ApiType::Responses,
        ApiType::Anthropic,
        ApiType::Gemini,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiType::Chat => "chat",
            ApiType::Responses => "responses",
            ApiType::Anthropic => "anthropic",
            ApiType::Gemini => "gemini",
        }
    }
}

impl fmt::Display for ApiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiType {
    type Err = TabwrightError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chat" | "openai" => Ok(ApiType::Chat),
            "responses" => Ok(ApiType::Responses),
            "anthropic" | "claude" => Ok(ApiType::Anthropic),
            "gemini" | "google" => Ok(ApiType::Gemini),
            other => Err(TabwrightError::InvalidInput(format!(
                "unknown api type '{}'",
                other
            ))),
        }
    }
}

/// Strategy table mapping each wire protocol to its adapter
#[derive(Default, Clone)]
pub struct ProviderTable {
    adapters: HashMap<ApiType, Arc<dyn ProviderAdapter>>,
}

impl ProviderTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build HTTP adapters for every provider that has an API key.
    pub fn from_settings(settings: &Settings, client: reqwest::Client) -> Self {
        let mut table = Self::new();
        for api_type in ApiType::ALL {
            let config = settings.provider(api_type);
            let Some(api_key) = config.resolve_api_key() else {
                tracing::debug!(
                    target: "tabwright.llm.providers",
                    api_type = %api_type,
                    env = %config.api_key_env,
                    "no API key; provider not registered"
                );
                continue;
            };
            let base_url = config.base_url.clone();
            let adapter: Arc<dyn ProviderAdapter> = match api_type {
                ApiType::Chat => Arc::new(ChatAdapter::new(client.clone(), base_url, api_key)),
                ApiType::Responses => {
                    Arc::new(ResponsesAdapter::new(client.clone(), base_url, api_key))
                }
                ApiType::Anthropic => {
                    Arc::new(AnthropicAdapter::new(client.clone(), base_url, api_key))
                }
                ApiType::Gemini => Arc::new(GeminiAdapter::new(client.clone(), base_url, api_key)),
            };
            table.register(adapter);
        }
        table
    }

    /// Register an adapter under its own api type, replacing any previous one.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.api_type(), adapter);
    }

    pub fn get(&self, api_type: ApiType) -> Result<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&api_type).cloned().ok_or_else(|| {
            TabwrightError::Config(format!(
                "no provider registered for '{}' (is its API key set?)",
                api_type
            ))
        })
    }

    pub fn contains(&self, api_type: ApiType) -> bool {
        self.adapters.contains_key(&api_type)
    }
}
