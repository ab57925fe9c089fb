//! Command Line Interface (CLI) layer for satgrab.
//!
//! This module defines argument parsing (`args`), error types (`errors`),
//! and the orchestration logic (`runner`) for the `pull`, `pull-id` and
//! `search` subcommands. It wires user-provided options to the library's
//! `satgrab::api` entrypoints.
//!
//! If you are embedding satgrab into another application, prefer using
//! the high-level `satgrab::api` module instead of calling the CLI code.
pub mod args;
pub mod errors;
pub mod runner;

pub use args::CliArgs;
pub use runner::run;
