//! # mured
//!
//! Command-line front end for `mured-core`: configuration and commands.
//! The binary in `main.rs` only sets up logging and dispatches here.

pub mod cli;
pub mod config;
