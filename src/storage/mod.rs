//! Storage layer for replayq.
//!
//! This module provides the SQLite database that backs the mutation queue.

mod database;
mod migrations;

pub use database::Database;
