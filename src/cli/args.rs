use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "replayq")]
#[command(about = "Durable offline mutation queue with background replay")]
#[command(long_about = "replayq - an offline-first mutation queue

Records create/update/delete intents in a local SQLite queue and replays
them against an HTTP backend, in the order they were queued, once the
backend is reachable. Failed replays are retried a bounded number of times
and then parked as 'failed' for manual action.

QUICK START:
  replayq enqueue student create '{\"name\": \"Ada\"}'   Queue a mutation
  replayq status                                      Show queue counts
  replayq sync                                        Replay pending entries once
  replayq watch                                       Replay whenever online

OUTPUT FORMATS:
  --output pretty    Human-readable colored output (default)
  --output json      Machine-readable JSON for scripting

For more information on a specific command, run:
  replayq <command> --help")]
#[command(version, propagate_version = true)]
pub struct Cli {
    /// Output format for command results
    ///
    /// Use 'pretty' for human-readable colored output (default),
    /// or 'json' for machine-readable output suitable for scripting.
    #[arg(short, long, value_enum, default_value = "pretty", global = true)]
    pub output: OutputFormat,

    /// Config file (default: ~/.replayq/config.yaml)
    #[arg(long, global = true, env = "REPLAYQ_CONFIG")]
    pub config: Option<PathBuf>,

    /// Queue database (default: ~/.replayq/queue.db)
    #[arg(long, global = true, env = "REPLAYQ_DB")]
    pub db: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for command results.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable colored output.
    #[default]
    Pretty,
    /// Machine-readable JSON output.
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Queue a mutation for later replay
    ///
    /// The entity type must be listed under `entity_types` in the config
    /// file and the operation must be one of create, update or delete.
    /// Prints the id of the new entry.
    ///
    /// # Examples
    ///
    ///   replayq enqueue student create '{"name": "Ada"}'
    ///   replayq enqueue course delete '{"id": 42}'
    ///   echo '{"id": 7}' | replayq enqueue student update -
    #[command(alias = "e")]
    Enqueue {
        /// Resource kind, e.g. student
        entity_type: String,

        /// create, update or delete
        operation: String,

        /// JSON payload; '-' reads it from stdin
        #[arg(default_value = "{}")]
        payload: String,
    },

    /// Show queue counts, or the status of one entry
    ///
    /// With an ID, prints pending, synced, failed or unknown.
    #[command(alias = "s")]
    Status {
        /// Entry ID
        id: Option<String>,
    },

    /// Show one entry in full
    Show {
        /// Entry ID
        id: String,
    },

    /// List queued entries in replay order
    #[command(alias = "ls")]
    List {
        /// Filter by status (pending, synced, failed)
        #[arg(long, short = 's')]
        status: Option<String>,

        /// Maximum entries to show
        #[arg(long, short = 'n', default_value = "20")]
        limit: usize,
    },

    /// Run one drain cycle against the configured remote
    Sync,

    /// Replay continuously until interrupted
    ///
    /// Probes the remote's health endpoint, drains whenever it comes back
    /// online and on the configured interval while it stays online.
    Watch,

    /// Give failed entries a fresh retry budget
    ///
    /// The entry is replaced by a new pending copy with a new ID at the
    /// end of the queue.
    Requeue {
        /// Entry ID
        #[arg(required_unless_present = "all")]
        id: Option<String>,

        /// Requeue every failed entry
        #[arg(long, conflicts_with = "id")]
        all: bool,
    },

    /// Delete a synced or failed entry
    #[command(alias = "rm")]
    Remove {
        /// Entry ID
        id: String,
    },

    /// Delete synced entries older than the given age
    Prune {
        /// Age in hours
        #[arg(long, default_value = "168")]
        older_than: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_enqueue_default_payload() {
        let cli = Cli::parse_from(["replayq", "enqueue", "student", "create"]);
        match cli.command {
            Commands::Enqueue { payload, .. } => assert_eq!(payload, "{}"),
            _ => panic!("expected enqueue"),
        }
    }

    #[test]
    fn test_requeue_requires_id_or_all() {
        assert!(Cli::try_parse_from(["replayq", "requeue"]).is_err());
        assert!(Cli::try_parse_from(["replayq", "requeue", "--all"]).is_ok());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from(["replayq", "status", "-vv", "--output", "json"]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.output, OutputFormat::Json);
    }
}
