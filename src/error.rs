// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Error types for Tabwright
//!
//! This module defines the error taxonomy shared by the request engine and
//! the tool layer. Cancellation and empty streams are explicit variants so
//! the retry and fallback decisions can match on them.

use thiserror::Error;

/// Main error type for Tabwright operations
#[derive(Error, Debug)]
pub enum TabwrightError {
    /// API-related errors
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// The caller cancelled the request
    #[error("Request aborted")]
    Aborted,

    /// A tool call that cannot be addressed by a result message
    #[error("Malformed tool call: {0}")]
    MalformedToolCall(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// API-specific error types
#[derive(Error, Debug)]
pub enum ApiError {
    /// A stream finished without producing a single chunk
    #[error("Stream completed without any chunks")]
    EmptyStream,

    /// A stream failed after at least one chunk was delivered
    #[error("Stream interrupted after {chunks} chunks: {message}")]
    PartialStream { chunks: usize, message: String },

    /// API returned a non-success status
    #[error("API error ({status}): {message}")]
    HttpStatus { status: u16, message: String },

    /// Network connectivity error
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid response from API
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// Streaming error reported by the provider
    #[error("Streaming error: {0}")]
    StreamError(String),
}

impl TabwrightError {
    /// Whether this error represents caller cancellation.
    pub fn is_abort(&self) -> bool {
        matches!(self, TabwrightError::Aborted)
    }

    /// HTTP status code carried by the error, if any.
    ///
    /// Advisory only: used for diagnostics, never to short-circuit retries.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            TabwrightError::Api(ApiError::HttpStatus { status, .. }) => Some(*status),
            TabwrightError::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Result type alias for Tabwright operations
pub type Result<T> = std::result::Result<T, TabwrightError>;
