// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! HTTP adapters against a local mock server.

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tabwright::config::Settings;
use tabwright::error::{ApiError, TabwrightError};
use tabwright::llm::providers::{AnthropicAdapter, GeminiAdapter};
use tabwright::llm::{
    build_model_request_bodies, ApiType, MessageRecord, NoopObserver, ProviderAdapter,
    RequestEngine, RequestModelPayload, StreamSink, ToolArguments,
};

const UNSET_KEY_ENV: &str = "TABWRIGHT_TEST_UNSET_KEY_8d1f";

fn sse(events: &[Value]) -> String {
    let mut body: String = events
        .iter()
        .map(|event| format!("data: {}\n\n", event))
        .collect();
    body.push_str("data: [DONE]\n\n");
    body
}

fn sse_response(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

fn settings_for(api_type: ApiType, base_url: &str) -> Settings {
    let mut settings = Settings::default();
    settings.api_type = api_type;
    settings.resilience.base_delay_ms = 10;
    settings.resilience.budget_ms = 100;
    let provider = settings.provider_mut(api_type);
    provider.base_url = base_url.to_string();
    provider.api_key = Some("test-key".to_string());
    provider.api_key_env = UNSET_KEY_ENV.to_string();
    settings
}

#[tokio::test]
async fn test_chat_stream_through_engine() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({"stream": true, "model": "gpt-4.1"})))
        .respond_with(sse_response(sse(&[
            json!({"choices": [{"delta": {"content": "Hel"}}]}),
            json!({"choices": [{"delta": {"content": "lo"}}]}),
            json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_1", "function": {"name": "list_tabs", "arguments": ""}}
            ]}}]}),
            json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "{}"}}
            ]}}]}),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let settings = settings_for(ApiType::Chat, &server.uri());
    let records = vec![MessageRecord::user("hi")];
    let engine = RequestEngine::from_settings(&settings, reqwest::Client::new());

    let result = engine
        .request_model(RequestModelPayload::new(&settings, &records))
        .await
        .unwrap();

    assert!(result.streamed);
    assert_eq!(result.reply, "Hello");
    assert_eq!(result.tool_calls.len(), 1);
    assert_eq!(result.tool_calls[0].id, "call_1");
    assert_eq!(result.tool_calls[0].arguments, ToolArguments::Text("{}".into()));
}

#[tokio::test]
async fn test_chat_empty_stream_falls_back_to_non_stream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(sse_response("data: [DONE]\n\n".to_string()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "fallback reply"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let settings = settings_for(ApiType::Chat, &server.uri());
    let records = vec![MessageRecord::user("hi")];
    let engine = RequestEngine::from_settings(&settings, reqwest::Client::new());

    let result = engine
        .request_model(RequestModelPayload::new(&settings, &records))
        .await
        .unwrap();

    assert!(!result.streamed);
    assert_eq!(result.reply, "fallback reply");
    assert!(result.tool_calls.is_empty());
}

#[tokio::test]
async fn test_http_error_surfaces_status_after_budget() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"error": {"message": "bad key", "type": "auth"}})),
        )
        .mount(&server)
        .await;

    let settings = settings_for(ApiType::Chat, &server.uri());
    let records = vec![MessageRecord::user("hi")];
    let engine = RequestEngine::from_settings(&settings, reqwest::Client::new());

    let err = engine
        .request_model(RequestModelPayload::new(&settings, &records))
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), Some(401));
    match err {
        TabwrightError::Api(ApiError::HttpStatus { message, .. }) => {
            assert_eq!(message, "bad key")
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_anthropic_non_stream_headers_and_extraction() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(header("x-api-key", "test-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({"max_tokens": 64000, "stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [
                {"type": "text", "text": "Opening it."},
                {"type": "tool_use", "id": "tu_1", "name": "open_page", "input": {"url": "https://a.test"}}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let settings = settings_for(ApiType::Anthropic, &server.uri());
    let bodies = build_model_request_bodies(&settings, "", &[], &[MessageRecord::user("open a")]);
    let adapter = AnthropicAdapter::new(reqwest::Client::new(), server.uri(), "test-key");

    let response = adapter
        .request_non_stream(&bodies.non_stream, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(adapter.extract_reply(&response), "Opening it.");
    let calls = adapter.extract_tool_calls(&response);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].id, "tu_1");
    assert_eq!(
        calls[0].arguments,
        ToolArguments::Structured(json!({"url": "https://a.test"}))
    );
}

#[tokio::test]
async fn test_anthropic_stream_events() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(sse_response(sse(&[
            json!({"type": "message_start", "message": {"id": "m1"}}),
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Sure"}}),
            json!({"type": "content_block_start", "index": 1, "content_block": {"type": "tool_use", "id": "tu_2", "name": "close_tab"}}),
            json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "{\"tabId\":"}}),
            json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "4}"}}),
            json!({"type": "content_block_stop", "index": 1}),
            json!({"type": "message_stop"}),
        ])))
        .mount(&server)
        .await;

    let adapter = AnthropicAdapter::new(reqwest::Client::new(), server.uri(), "test-key");
    let cancel = CancellationToken::new();
    let stream = adapter
        .request_stream(&json!({"stream": true}), &cancel)
        .await
        .unwrap();
    let sink = StreamSink::new(std::sync::Arc::new(NoopObserver));
    let outcome = adapter.consume_stream(stream, &sink, &cancel).await.unwrap();

    assert_eq!(outcome.reply, "Sure");
    assert_eq!(outcome.chunks, 8);
    assert_eq!(outcome.tool_calls[0].name, "close_tab");
    assert_eq!(
        outcome.tool_calls[0].arguments,
        ToolArguments::Structured(json!({"tabId": 4}))
    );
    assert!(sink.started());
}

#[tokio::test]
async fn test_gemini_stream_uses_rest_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-test:streamGenerateContent"))
        .and(query_param("alt", "sse"))
        .and(header("x-goog-api-key", "test-key"))
        .and(body_partial_json(json!({
            "systemInstruction": {"parts": [{"text": "sys"}]},
            "contents": [{"role": "user", "parts": [{"text": "hi"}]}]
        })))
        .respond_with(sse_response(sse(&[
            json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "Thinking", "thought": true}]}}]}),
            json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "Hi there"}]}}]}),
            json!({"candidates": [{"content": {"role": "model", "parts": [
                {"functionCall": {"name": "list_tabs", "args": {}}, "thoughtSignature": "sig-1"}
            ]}}]}),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let mut settings = settings_for(ApiType::Gemini, &server.uri());
    settings.provider_mut(ApiType::Gemini).model = "gemini-test".to_string();
    let bodies = build_model_request_bodies(&settings, "sys", &[], &[MessageRecord::user("hi")]);

    let adapter = GeminiAdapter::new(reqwest::Client::new(), server.uri(), "test-key");
    let cancel = CancellationToken::new();
    let stream = adapter.request_stream(&bodies.stream, &cancel).await.unwrap();
    let sink = StreamSink::new(std::sync::Arc::new(NoopObserver));
    let outcome = adapter.consume_stream(stream, &sink, &cancel).await.unwrap();

    assert_eq!(outcome.reply, "Hi there");
    assert_eq!(outcome.tool_calls.len(), 1);
    assert!(outcome.tool_calls[0].id.starts_with("call_"));
    assert_eq!(outcome.tool_calls[0].thought_signature.as_deref(), Some("sig-1"));
}

#[tokio::test]
async fn test_cancel_before_send_aborts() {
    let server = MockServer::start().await;
    let adapter = AnthropicAdapter::new(reqwest::Client::new(), server.uri(), "test-key");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = adapter
        .request_non_stream(&json!({}), &cancel)
        .await
        .unwrap_err();
    assert!(err.is_abort());
}
