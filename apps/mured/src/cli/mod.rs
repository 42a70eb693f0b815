//! # mured CLI Module
//!
//! This module implements the CLI interface for mured.
//!
//! ## Available Commands
//!
//! - `verify` - Load a seed and report what it contains
//! - `seal` - Compute a seed's checksum and write it into the seed
//! - `step` - Apply one step to a value
//! - `run` - Step a value until it stalls or a budget runs out
//! - `classify` - Report the shape of a value
//! - `hash` - Print the content hash of a value
//!
//! Values are given inline as JSON or as `@path` to a JSON file.

mod commands;

use crate::config::MuredConfig;
use clap::{Parser, Subcommand, ValueEnum};
use mured_core::MuredError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// mured - deterministic structural rewriting
///
/// Values rewrite under an ordered set of projections until nothing applies.
/// A stall is an answer, not an error.
#[derive(Parser, Debug)]
#[command(name = "mured")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to a mured.toml configuration file
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Encoding of a written trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TraceFormat {
    /// One canonical JSON object per line
    Jsonl,
    /// Checksummed postcard stream
    Binary,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load a seed and report its name, version, checksum and projections
    Verify {
        /// Path to the seed file
        #[arg(short, long)]
        seed: PathBuf,
    },

    /// Compute the checksum of a seed and write the sealed seed
    Seal {
        /// Path to the seed file
        #[arg(short, long)]
        seed: PathBuf,

        /// Output path (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Apply one step to a value
    Step {
        /// Path to the seed file
        #[arg(short, long)]
        seed: PathBuf,

        /// Value as JSON, or @path to a JSON file
        #[arg(short = 'i', long)]
        value: String,
    },

    /// Step a value until it stalls or a budget runs out
    Run {
        /// Path to the seed file
        #[arg(short, long)]
        seed: PathBuf,

        /// Value as JSON, or @path to a JSON file
        #[arg(short = 'i', long)]
        value: String,

        /// Step budget (defaults to the configured one)
        #[arg(short, long)]
        max_steps: Option<usize>,

        /// Write the trace to this file
        #[arg(short, long)]
        trace_out: Option<PathBuf>,

        /// Trace encoding
        #[arg(short = 'f', long, value_enum, default_value = "jsonl")]
        trace_format: TraceFormat,
    },

    /// Report the shape of a value
    Classify {
        /// Value as JSON, or @path to a JSON file
        #[arg(short = 'i', long)]
        value: String,

        /// Also print the linked-list encoding of the value
        #[arg(short, long)]
        normalize: bool,
    },

    /// Print the content hash of a value
    Hash {
        /// Value as JSON, or @path to a JSON file
        #[arg(short = 'i', long)]
        value: String,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), MuredError> {
    let config = MuredConfig::load(cli.config.as_deref())?;
    let json_mode = cli.json_mode;

    match cli.command {
        Commands::Verify { seed } => cmd_verify(&config, json_mode, &seed),
        Commands::Seal { seed, output } => cmd_seal(&config, &seed, output.as_deref()),
        Commands::Step { seed, value } => cmd_step(&config, json_mode, &seed, &value),
        Commands::Run {
            seed,
            value,
            max_steps,
            trace_out,
            trace_format,
        } => cmd_run(
            &config,
            json_mode,
            &seed,
            &value,
            max_steps,
            trace_out.as_deref(),
            trace_format,
        ),
        Commands::Classify { value, normalize } => {
            cmd_classify(&config, json_mode, &value, normalize)
        }
        Commands::Hash { value } => cmd_hash(&config, json_mode, &value),
    }
}
