// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tabwright - model request engine for browser agents
//!
//! Entry point for the Tabwright CLI.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use clap::Parser;
use tokio_util::sync::CancellationToken;

use tabwright::cli::{AskArgs, BodyArgs, Cli, Commands};
use tabwright::config::Settings;
use tabwright::error::{Result, TabwrightError};
use tabwright::llm::{
    build_model_request_bodies, MessageRecord, RequestEngine, RequestModelPayload,
    RequestObserver,
};

/// Prints streamed text as it arrives and remembers what was shown
#[derive(Default)]
struct StdoutObserver {
    shown: Mutex<String>,
}

impl StdoutObserver {
    fn shown(&self) -> String {
        self.shown.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl RequestObserver for StdoutObserver {
    fn on_delta(&self, delta: &str) {
        if let Ok(mut shown) = self.shown.lock() {
            shown.push_str(delta);
        }
        let mut stdout = io::stdout();
        let _ = stdout.write_all(delta.as_bytes());
        let _ = stdout.flush();
    }
}

/// Text still to print once a fallback reply replaces a partial stream.
fn remaining_output(shown: &str, reply: &str) -> String {
    if shown.is_empty() {
        return reply.to_string();
    }
    match reply.strip_prefix(shown) {
        Some(rest) => rest.to_string(),
        None => format!("\n{}", reply),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    if cli.verbose > 0 {
        let level = if cli.verbose > 1 { "trace" } else { "debug" };
        for target in ["tabwright.llm", "tabwright.tools"] {
            if let Ok(parsed) = format!("{}={}", target, level).parse() {
                env_filter = env_filter.add_directive(parsed);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .init();

    let settings = match &cli.settings {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };

    match cli.command {
        Commands::Ask(args) => run_ask(args, settings).await,
        Commands::Body(args) => run_body(args, settings),
    }
}

async fn run_ask(args: AskArgs, mut settings: Settings) -> Result<()> {
    if let Some(api_type) = args.api_type {
        settings.api_type = api_type;
    }
    if let Some(model) = args.model {
        settings.provider_mut(settings.api_type).model = model;
    }
    settings.validate()?;

    let engine = RequestEngine::from_settings(&settings, reqwest::Client::new());
    let messages = vec![MessageRecord::user(args.prompt)];
    let system_prompt = args.system.unwrap_or_default();

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    if args.no_stream {
        let adapter = engine.providers().get(settings.api_type)?;
        let bodies = build_model_request_bodies(&settings, &system_prompt, &[], &messages);
        let response = adapter.request_non_stream(&bodies.non_stream, &cancel).await?;
        println!("{}", adapter.extract_reply(&response));
        return Ok(());
    }

    let observer = Arc::new(StdoutObserver::default());
    let payload = RequestModelPayload::new(&settings, &messages)
        .with_system_prompt(&system_prompt)
        .with_observer(observer.clone())
        .with_cancel(cancel);

    match engine.request_model(payload).await {
        Ok(result) => {
            if result.streamed {
                println!();
            } else {
                println!("{}", remaining_output(&observer.shown(), &result.reply));
            }
            Ok(())
        }
        Err(TabwrightError::Aborted) => {
            eprintln!("\nInterrupted.");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

fn run_body(args: BodyArgs, mut settings: Settings) -> Result<()> {
    if let Some(api_type) = args.api_type {
        settings.api_type = api_type;
    }

    let messages = vec![MessageRecord::user(args.prompt)];
    let system_prompt = args.system.unwrap_or_default();
    let bodies = build_model_request_bodies(&settings, &system_prompt, &[], &messages);

    let body = if args.stream {
        bodies.stream
    } else {
        bodies.non_stream
    };
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_output_without_partial_stream() {
        assert_eq!(remaining_output("", "full reply"), "full reply");
    }

    #[test]
    fn test_remaining_output_skips_shown_prefix() {
        assert_eq!(remaining_output("Hel", "Hello"), "lo");
    }

    #[test]
    fn test_remaining_output_starts_new_line_when_reply_differs() {
        assert_eq!(remaining_output("Draft", "Final answer"), "\nFinal answer");
    }

    #[test]
    fn test_observer_records_deltas() {
        let observer = StdoutObserver::default();
        observer.on_delta("a");
        observer.on_delta("b");
        assert_eq!(observer.shown(), "ab");
    }
}
