// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tabwright - model request engine for browser-resident AI agents.
//!
//! Architecture highlights:
//! - `llm`: message normalization, context windowing and page dedup, payload
//!   mappers for four wire protocols, and the retrying stream/non-stream executor
//! - `tools`: tool call normalization, the browser tool registry, and the executor
//!   that turns tool outcomes into result messages
//! - `config`: JSON settings with per-provider configuration and body overrides

pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod tools;

pub use error::{Result, TabwrightError};
