//! CLI command definitions for the `duraflow` binary.
//!
//! Uses clap derive macros for argument parsing. Every command honours the
//! global `--json` flag.

pub mod execution;
pub mod worker;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

/// Run and inspect durable workflows.
#[derive(Parser)]
#[command(name = "duraflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the scheduler loop until Ctrl-C.
    Worker,

    /// Run a single scheduler tick and print what it did.
    Tick,

    /// Submit a new execution of a registered workflow method.
    Submit {
        /// Registered service name (e.g. demo.greeter).
        service: String,

        /// Method on the service (e.g. greet).
        method: String,

        /// Positional argument as name=type:value (repeatable, in order).
        #[arg(long = "arg", value_name = "NAME=TYPE:VALUE")]
        args: Vec<String>,

        /// Put the replay context in the first parameter slot.
        #[arg(long)]
        with_context: bool,
    },

    /// Submit a workflow definition read from a JSON file.
    SubmitFile {
        /// Path to the definition JSON.
        path: PathBuf,
    },

    /// Cancel a queued or running execution.
    Cancel {
        /// Execution ID.
        id: Uuid,
    },

    /// Show an execution and its recorded actions.
    Status {
        /// Execution ID.
        id: Uuid,
    },

    /// List executions, newest first.
    #[command(alias = "ls")]
    List {
        /// Only show executions in this status (queued, running, completed, failed, cancelled).
        #[arg(long)]
        status: Option<String>,

        /// Maximum number of executions to show.
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },

    /// List registered workflow services and their methods.
    Workflows,
}
