//! # mured - Structural Rewriting CLI
//!
//! The main binary for the mured rewriting engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              apps/mured (THE BINARY)          │
//! │                                              │
//! │   ┌─────────────┐        ┌──────────────┐    │
//! │   │    CLI      │        │   Config     │    │
//! │   │   (clap)    │        │ (mured.toml) │    │
//! │   └──────┬──────┘        └──────┬───────┘    │
//! │          └────────────┬─────────┘            │
//! │                       ▼                      │
//! │               ┌───────────────┐              │
//! │               │  mured-core   │              │
//! │               │ (THE LOGIC)   │              │
//! │               └───────────────┘              │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! mured seal --seed peano.json --output peano.sealed.json
//! mured verify --seed peano.sealed.json
//! mured run --seed peano.sealed.json --value '{"succ": {"succ": "zero"}}'
//! mured hash --value @value.json
//! ```

use clap::Parser;
use mured::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let cli = cli::Cli::parse();

    // MURED_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("MURED_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let default_filter = if cli.verbose {
        "mured=debug,mured_core=debug"
    } else {
        "mured=info,mured_core=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the startup banner on stderr, leaving stdout to command output.
fn print_banner() {
    eprintln!(
        r#"
  ┌┬┐┬ ┬┬─┐┌─┐┌┬┐
  ││││ │├┬┘├┤  ││
  ┴ ┴└─┘┴└─└─┘─┴┘

  Structural Rewriting v{}

  Deterministic • Iterative • Verifiable
"#,
        env!("CARGO_PKG_VERSION")
    );
}
