// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use crate::error::{Result, TabwrightError};
use crate::llm::providers::ApiType;

use super::{ProviderConfig, Settings};

impl Settings {
    /// Connection settings for the given wire protocol.
    pub fn provider(&self, api_type: ApiType) -> &ProviderConfig {
        match api_type {
            ApiType::Chat => &self.providers.chat,
            ApiType::Responses => &self.providers.responses,
            ApiType::Anthropic => &self.providers.anthropic,
            ApiType::Gemini => &self.providers.gemini,
        }
    }

    /// Mutable connection settings for the given wire protocol.
    pub fn provider_mut(&mut self, api_type: ApiType) -> &mut ProviderConfig {
        match api_type {
            ApiType::Chat => &mut self.providers.chat,
            ApiType::Responses => &mut self.providers.responses,
            ApiType::Anthropic => &mut self.providers.anthropic,
            ApiType::Gemini => &mut self.providers.gemini,
        }
    }

    /// Model for the active wire protocol.
    pub fn active_model(&self) -> &str {
        &self.provider(self.api_type).model
    }

    /// Check that settings are usable before issuing requests.
    pub fn validate(&self) -> Result<()> {
        if self.resilience.budget_ms == 0 {
            return Err(TabwrightError::Config(
                "resilience.budget_ms must be greater than zero".to_string(),
            ));
        }
        let provider = self.provider(self.api_type);
        if provider.model.trim().is_empty() {
            return Err(TabwrightError::Config(format!(
                "no model configured for {}",
                self.api_type
            )));
        }
        if provider.base_url.trim().is_empty() {
            return Err(TabwrightError::Config(format!(
                "no base_url configured for {}",
                self.api_type
            )));
        }
        for rule in &self.body_overrides {
            if !rule.path.is_empty() && !rule.path.starts_with('/') {
                return Err(TabwrightError::Config(format!(
                    "body override path must be a JSON Pointer: {}",
                    rule.path
                )));
            }
        }
        Ok(())
    }
}

impl ProviderConfig {
    /// Get the API key, checking the env var first.
    pub fn resolve_api_key(&self) -> Option<String> {
        // Priority: env var > config file.
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.is_empty())
            .or_else(|| self.api_key.clone())
    }
}
