//! Path resolution for replayq configuration and data files.
//!
//! All replayq data is stored in `~/.replayq/`:
//! - `config.yaml` - Entity types, sync and remote settings
//! - `queue.db` - `SQLite` database holding the mutation queue

use std::path::PathBuf;

use crate::error::QueueError;

/// Paths to replayq configuration and data.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Root directory: `~/.replayq/`
    pub root: PathBuf,
    /// Config file: `~/.replayq/config.yaml`
    pub config_file: PathBuf,
    /// Database file: `~/.replayq/queue.db`
    pub database: PathBuf,
}

impl Paths {
    /// Create paths based on the user's home directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn new() -> Result<Self, QueueError> {
        let home = std::env::var("HOME")
            .map_err(|_| QueueError::Config("Could not determine home directory".to_string()))?;

        Ok(Self::with_root(PathBuf::from(home).join(".replayq")))
    }

    /// Create paths with a custom root directory.
    #[must_use]
    pub fn with_root(root: PathBuf) -> Self {
        Self {
            config_file: root.join("config.yaml"),
            database: root.join("queue.db"),
            root,
        }
    }

    /// Ensure the root directory exists.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation fails.
    pub fn ensure_dirs(&self) -> Result<(), QueueError> {
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root).map_err(|e| {
                QueueError::Config(format!(
                    "Failed to create directory {}: {e}",
                    self.root.display()
                ))
            })?;
        }
        Ok(())
    }
}
