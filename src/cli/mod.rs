//! Command-line interface for replayq.

pub mod args;
pub mod commands;
