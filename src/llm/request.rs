// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Stream-fallback request executor
//!
//! One model turn: normalize, window, map, build bodies, then try the stream
//! body under the retry loop. If streaming fails for any reason other than
//! cancellation, the non-stream body is sent under a fresh retry loop.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::error::{Result, TabwrightError};
use crate::llm::body::{build_request_bodies, BodyInput, RequestBodies};
use crate::llm::context::build_message_intermediates;
use crate::llm::message::{normalize_messages, MessageRecord, ToolCall};
use crate::llm::provider::{NoopObserver, RequestObserver, StreamSink, ToolDefinition};
use crate::llm::providers::ProviderTable;
use crate::llm::retry::{request_with_retry, RetryOptions, RetryPolicy};

/// Input for one model turn
pub struct RequestModelPayload<'a> {
    pub settings: &'a Settings,
    pub system_prompt: &'a str,
    pub tools: &'a [ToolDefinition],
    /// Full history; never mutated
    pub messages: &'a [MessageRecord],
    pub observer: Arc<dyn RequestObserver>,
    pub cancel: CancellationToken,
}

impl<'a> RequestModelPayload<'a> {
    pub fn new(settings: &'a Settings, messages: &'a [MessageRecord]) -> Self {
        Self {
            settings,
            system_prompt: "",
            tools: &[],
            messages,
            observer: Arc::new(NoopObserver),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: &'a str) -> Self {
        self.system_prompt = system_prompt;
        self
    }

    pub fn with_tools(mut self, tools: &'a [ToolDefinition]) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RequestObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Outcome of one model turn
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestModelResult {
    pub tool_calls: Vec<ToolCall>,
    pub reply: String,
    /// False when the reply came from the non-stream fallback
    pub streamed: bool,
}

/// Build the stream and non-stream bodies for a turn without sending them.
pub fn build_model_request_bodies(
    settings: &Settings,
    system_prompt: &str,
    tools: &[ToolDefinition],
    messages: &[MessageRecord],
) -> RequestBodies {
    let normalized = normalize_messages(messages);
    let intermediates = build_message_intermediates(&normalized);
    let input = BodyInput {
        model: settings.active_model(),
        system_prompt,
        tools,
        messages: &intermediates,
        anthropic_max_tokens: settings.anthropic_max_tokens,
    };
    build_request_bodies(settings.api_type, &input, &settings.body_overrides)
}

/// Entry point for model requests
pub struct RequestEngine {
    providers: ProviderTable,
}

impl RequestEngine {
    pub fn new(providers: ProviderTable) -> Self {
        Self { providers }
    }

    /// Engine with HTTP adapters for every configured provider
    pub fn from_settings(settings: &Settings, client: reqwest::Client) -> Self {
        Self::new(ProviderTable::from_settings(settings, client))
    }

    pub fn providers(&self) -> &ProviderTable {
        &self.providers
    }

    /// Run one model turn.
    pub async fn request_model(
        &self,
        payload: RequestModelPayload<'_>,
    ) -> Result<RequestModelResult> {
        let RequestModelPayload {
            settings,
            system_prompt,
            tools,
            messages,
            observer,
            cancel,
        } = payload;

        if cancel.is_cancelled() {
            return Err(TabwrightError::Aborted);
        }

        let api_type = settings.api_type;
        let adapter = self.providers.get(api_type)?;
        let bodies = build_model_request_bodies(settings, system_prompt, tools, messages);
        let policy = RetryPolicy::from(&settings.resilience);
        let sink = StreamSink::new(observer);

        tracing::debug!(
            target: "tabwright.llm.request",
            api_type = %api_type,
            model = settings.active_model(),
            messages = messages.len(),
            tools = tools.len(),
            "requesting model"
        );

        let adapter_ref = adapter.as_ref();
        let stream_body = &bodies.stream;
        let sink_ref = &sink;
        let cancel_ref = &cancel;

        let streamed = request_with_retry(
            move || async move {
                let stream = adapter_ref.request_stream(stream_body, cancel_ref).await?;
                adapter_ref.consume_stream(stream, sink_ref, cancel_ref).await
            },
            RetryOptions::new("stream", cancel_ref, policy),
        )
        .await;

        let error = match streamed {
            Ok(outcome) => {
                tracing::debug!(
                    target: "tabwright.llm.request",
                    chunks = outcome.chunks,
                    tool_calls = outcome.tool_calls.len(),
                    "stream completed"
                );
                return Ok(RequestModelResult {
                    tool_calls: outcome.tool_calls,
                    reply: outcome.reply,
                    streamed: true,
                });
            }
            Err(error) => error,
        };

        if error.is_abort() || cancel.is_cancelled() {
            return Err(TabwrightError::Aborted);
        }

        tracing::warn!(
            target: "tabwright.llm.request",
            api_type = %api_type,
            error = %error,
            stream_started = sink.started(),
            "streaming failed; falling back to non-streaming request"
        );

        let non_stream_body = &bodies.non_stream;
        let response = request_with_retry(
            move || async move {
                adapter_ref
                    .request_non_stream(non_stream_body, cancel_ref)
                    .await
            },
            RetryOptions::new("non_stream", cancel_ref, policy),
        )
        .await?;

        Ok(RequestModelResult {
            tool_calls: adapter.extract_tool_calls(&response),
            reply: adapter.extract_reply(&response),
            streamed: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::providers::ApiType;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_build_bodies_for_active_api_type() {
        let mut settings = Settings::default();
        settings.api_type = ApiType::Anthropic;
        let messages = vec![MessageRecord::user("hi")];

        let bodies = build_model_request_bodies(&settings, "sys", &[], &messages);
        assert_eq!(bodies.stream["model"], "claude-sonnet-4-20250514");
        assert_eq!(bodies.stream["system"], "sys");
        assert_eq!(bodies.stream["max_tokens"], 64000);
        assert_eq!(
            bodies.non_stream["messages"],
            serde_json::json!([{"role": "user", "content": "hi"}])
        );
    }

    #[tokio::test]
    async fn test_missing_provider_is_config_error() {
        let engine = RequestEngine::new(ProviderTable::new());
        let settings = Settings::default();
        let messages = vec![MessageRecord::user("hi")];
        let err = engine
            .request_model(RequestModelPayload::new(&settings, &messages))
            .await
            .unwrap_err();
        assert!(matches!(err, TabwrightError::Config(_)));
    }

    #[tokio::test]
    async fn test_pre_cancelled_request_is_aborted() {
        let engine = RequestEngine::new(ProviderTable::new());
        let settings = Settings::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = engine
            .request_model(RequestModelPayload::new(&settings, &[]).with_cancel(cancel))
            .await
            .unwrap_err();
        assert!(err.is_abort());
    }
}
