//! CLI command handlers

pub mod commands;

pub use commands::{plan, process, run, Backend, PathPrompt, RunOptions, RunReport, StdinPrompt};
