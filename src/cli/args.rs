// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! CLI argument definitions using Clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::llm::providers::ApiType;

/// Tabwright - model request engine for browser agents
#[derive(Parser, Debug)]
#[command(name = "tabwright")]
#[command(version, about = "Send one turn through the model request engine")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Settings file path (defaults to ~/.tabwright/settings.json)
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ask a single question and print the reply
    Ask(AskArgs),

    /// Print the request body that would be sent, without sending it
    Body(BodyArgs),
}

/// Arguments for the ask command
#[derive(clap::Args, Debug)]
pub struct AskArgs {
    /// The prompt to send
    pub prompt: String,

    /// Wire protocol to use (overrides settings)
    #[arg(long)]
    pub api_type: Option<ApiType>,

    /// Model to use (overrides settings)
    #[arg(short, long)]
    pub model: Option<String>,

    /// System prompt
    #[arg(short, long)]
    pub system: Option<String>,

    /// Skip streaming and wait for the complete reply
    #[arg(long)]
    pub no_stream: bool,
}

/// Arguments for the body command
#[derive(clap::Args, Debug)]
pub struct BodyArgs {
    /// The prompt to place in the conversation
    pub prompt: String,

    /// Wire protocol to use (overrides settings)
    #[arg(long)]
    pub api_type: Option<ApiType>,

    /// System prompt
    #[arg(short, long)]
    pub system: Option<String>,

    /// Print the streaming body instead of the non-streaming one
    #[arg(long)]
    pub stream: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ask() {
        let cli = Cli::try_parse_from([
            "tabwright",
            "ask",
            "hello",
            "--api-type",
            "anthropic",
            "--model",
            "claude-x",
            "--no-stream",
        ])
        .unwrap();

        match cli.command {
            Commands::Ask(args) => {
                assert_eq!(args.prompt, "hello");
                assert_eq!(args.api_type, Some(ApiType::Anthropic));
                assert_eq!(args.model.as_deref(), Some("claude-x"));
                assert!(args.no_stream);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_body_with_global_settings() {
        let cli = Cli::try_parse_from([
            "tabwright",
            "body",
            "hi",
            "--stream",
            "--settings",
            "/tmp/s.json",
        ])
        .unwrap();

        assert_eq!(cli.settings, Some(PathBuf::from("/tmp/s.json")));
        assert!(matches!(cli.command, Commands::Body(BodyArgs { stream: true, .. })));
    }

    #[test]
    fn test_unknown_api_type_rejected() {
        assert!(Cli::try_parse_from(["tabwright", "ask", "hi", "--api-type", "palm"]).is_err());
    }

    #[test]
    fn test_command_required() {
        assert!(Cli::try_parse_from(["tabwright"]).is_err());
    }
}
