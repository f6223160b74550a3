// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Model request engine
//!
//! Provides one abstraction over four LLM wire protocols, with retry,
//! stream-to-non-stream fallback, and context windowing.

pub mod body;
pub mod context;
pub mod message;
pub mod provider;
pub mod providers;
pub mod request;
pub mod retry;

pub use body::{build_request_bodies, BodyInput, RequestBodies};
pub use context::build_message_intermediates;
pub use message::*;
pub use provider::*;
pub use providers::{ApiType, ProviderTable};
pub use request::{
    build_model_request_bodies, RequestEngine, RequestModelPayload, RequestModelResult,
};
pub use retry::{request_with_retry, RetryOptions, RetryPolicy};
