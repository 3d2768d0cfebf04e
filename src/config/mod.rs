//! Configuration management for replayq.
//!
//! This module handles loading configuration from `~/.replayq/`.

mod paths;
mod settings;

pub use paths::Paths;
pub use settings::{Config, RemoteConfig, SyncConfig};
