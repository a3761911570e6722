// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "quorum",
    about = "A concurrent multi-model consensus agent runtime",
    version
)]
pub struct Cli {
    /// Explicit config file (merged over the discovered layers).
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging on stderr (or set QUORUM_LOG).
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the runtime, spawn the root agent, and bridge stdin to it.
    ///
    /// Each line read from stdin is delivered to the root agent as a user
    /// message; runtime activity (decisions, actions, costs) streams to
    /// stdout. EOF terminates the root agent and exits.
    Run {
        /// Agent id for the root agent.
        #[arg(long, default_value = "root")]
        agent_id: String,
        /// Task id recorded with the root agent and its costs.
        #[arg(long, default_value = "interactive")]
        task_id: String,
    },

    /// Print the merged configuration and exit.
    ShowConfig,

    /// List the models known to the static catalog.
    ListModels,
}
