// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use futures::StreamExt;
use reqwest::{RequestBuilder, Response};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{ApiError, Result, TabwrightError};
use crate::llm::provider::ChunkStream;

const MAX_ERROR_BODY_CHARS: usize = 500;

/// One decoded Server-Sent Event payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SseEvent {
    Data(String),
    Done,
}

/// Incremental SSE decoder.
///
/// Works on raw bytes so a multi-byte character split across network chunks
/// is reassembled before decoding.
#[derive(Debug, Default)]
pub(crate) struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    /// Feed bytes and return every complete event.
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend(bytes.iter().copied().filter(|b| *b != b'\r'));

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let raw: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            if let Some(event) = parse_event(&raw[..pos]) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing event that was not terminated by a blank line.
    pub(crate) fn finish(&mut self) -> Option<SseEvent> {
        let raw = std::mem::take(&mut self.buffer);
        parse_event(&raw)
    }
}

fn parse_event(raw: &[u8]) -> Option<SseEvent> {
    let text = String::from_utf8_lossy(raw);
    let data: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|line| line.strip_prefix(' ').unwrap_or(line))
        .collect();

    if data.is_empty() {
        return None;
    }
    let payload = data.join("\n");
    if payload.trim().is_empty() {
        return None;
    }
    if payload.trim() == "[DONE]" {
        return Some(SseEvent::Done);
    }
    Some(SseEvent::Data(payload))
}

/// Decode an SSE response body into JSON chunks.
pub(crate) fn sse_chunk_stream(response: Response) -> ChunkStream {
    let mut bytes = response.bytes_stream();

    Box::pin(async_stream::stream! {
        let mut parser = SseParser::default();
        let mut done = false;

        while let Some(next) = bytes.next().await {
            let chunk = match next {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(TabwrightError::Api(ApiError::StreamError(e.to_string())));
                    done = true;
                    break;
                }
            };
            for event in parser.push(&chunk) {
                match event {
                    SseEvent::Done => {
                        done = true;
                        break;
                    }
                    SseEvent::Data(payload) => {
                        yield decode_chunk(&payload);
                    }
                }
            }
            if done {
                break;
            }
        }

        if !done {
            if let Some(SseEvent::Data(payload)) = parser.finish() {
                yield decode_chunk(&payload);
            }
        }
    })
}

fn decode_chunk(payload: &str) -> Result<Value> {
    serde_json::from_str(payload).map_err(|e| {
        TabwrightError::Api(ApiError::InvalidResponse(format!(
            "undecodable stream chunk: {}",
            e
        )))
    })
}

/// Send a request, giving up as soon as `cancel` fires.
///
/// Non-2xx responses become [`ApiError::HttpStatus`].
pub(crate) async fn send_cancellable(
    builder: RequestBuilder,
    cancel: &CancellationToken,
) -> Result<Response> {
    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(TabwrightError::Aborted),
        sent = builder.send() => sent.map_err(network_error)?,
    };

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(TabwrightError::Aborted),
        body = response.text() => body.unwrap_or_default(),
    };
    Err(http_status_error(status.as_u16(), &body))
}

/// Read a JSON response body, giving up as soon as `cancel` fires.
pub(crate) async fn read_json(response: Response, cancel: &CancellationToken) -> Result<Value> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TabwrightError::Aborted),
        body = response.json::<Value>() => body.map_err(|e| {
            TabwrightError::Api(ApiError::InvalidResponse(e.to_string()))
        }),
    }
}

/// Construct a standardized status error, pulling the provider's message out
/// of the common `{"error": {"message": ...}}` envelope when present.
pub(crate) fn http_status_error(status: u16, body: &str) -> TabwrightError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| error_message(&value))
        .unwrap_or_else(|| body.chars().take(MAX_ERROR_BODY_CHARS).collect());

    TabwrightError::Api(ApiError::HttpStatus { status, message })
}

/// Provider error message from an error payload or stream event.
pub(crate) fn error_message(value: &Value) -> Option<String> {
    let error = value.get("error").unwrap_or(value);
    error
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| error.as_str())
        .map(str::to_string)
}

pub(crate) fn network_error(err: reqwest::Error) -> TabwrightError {
    if let Some(status) = err.status() {
        return TabwrightError::Api(ApiError::HttpStatus {
            status: status.as_u16(),
            message: err.to_string(),
        });
    }
    TabwrightError::Api(ApiError::Network(err.to_string()))
}

/// Join a base URL and a path without doubling the slash.
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
