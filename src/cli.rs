// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{Parser, Subcommand};

/// Chat-app bridge that drives a local coding agent from Telegram.
///
/// All runtime configuration comes from `GOFER_*` environment variables;
/// `GOFER_BOT_TOKEN` and `GOFER_ALLOWED_USERS` are required.
#[derive(Parser, Debug)]
#[command(name = "gofer", version, about)]
pub struct Cli {
    /// Verbose logging to stderr (same as GOFER_LOG=debug)
    #[arg(long, short = 'v')]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the resolved configuration (token redacted) and exit.
    ShowConfig,
    /// Validate `<working_dir>/cron.yaml` and exit.
    CheckCron,
}
