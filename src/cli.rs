// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "norn",
    version,
    about = "Wake-driven scheduler runtime for long-lived LLM agent threads"
)]
pub struct Cli {
    /// Explicit config file (merged over the discovered layers).
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Log to stderr at debug level (overrides NORN_LOG).
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the long-lived scheduler until interrupted.
    ///
    /// Channel adapters deliver wakes into the running manager; every
    /// session key gets its own serially-executed thread.
    Serve,

    /// One-shot wake: deliver a message to a session and print the reply.
    Chat {
        /// Target session key (e.g. "alice" or "telegram:chat:42").
        session_key: String,
        /// The message to deliver.
        message: String,
        /// Agent template to bind for this turn.
        #[arg(long, short = 'a')]
        agent: Option<String>,
        /// How long to wait for the reply.
        #[arg(long, default_value_t = 600)]
        timeout_secs: u64,
    },

    /// Print the effective merged configuration and exit.
    ShowConfig,
}
