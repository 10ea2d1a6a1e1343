use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Offline-first todo list backed by a REST API")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Base URL of the todo API (e.g. <http://localhost:4000/api>)
    #[arg(long, global = true, value_name = "URL")]
    pub api_url: Option<String>,

    /// Use an unreachable in-process server; every change stays pending
    #[arg(long, global = true)]
    pub offline_demo: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new todo
    #[command(alias = "new")]
    Add {
        /// Todo title
        title: Vec<String>,
        /// Longer description
        #[arg(short, long)]
        description: Option<String>,
        /// Due date (ISO-8601)
        #[arg(long, value_name = "DATE")]
        date: Option<String>,
    },
    /// List todos, refreshed from the server
    List {
        /// Only todos whose title contains this text
        #[arg(long)]
        title: Option<String>,
        /// Skip the server and read the local copy only
        #[arg(long)]
        local: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one todo
    Show {
        /// Todo ID (negative while unconfirmed)
        #[arg(allow_negative_numbers = true)]
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit an existing todo
    Edit {
        /// Todo ID (negative while unconfirmed)
        #[arg(allow_negative_numbers = true)]
        id: i64,
        /// New title
        #[arg(long)]
        title: Option<String>,
        /// New description
        #[arg(short, long)]
        description: Option<String>,
        /// Mark as done
        #[arg(long, conflicts_with = "open")]
        completed: bool,
        /// Mark as not done
        #[arg(long)]
        open: bool,
    },
    /// Delete a todo
    Delete {
        /// Todo ID (negative while unconfirmed)
        #[arg(allow_negative_numbers = true)]
        id: i64,
    },
    /// Push pending changes and pull server deletions
    Sync {
        /// Keep retrying in the background until interrupted
        #[arg(long)]
        watch: bool,
    },
    /// Show pending changes and sync bookkeeping
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show or update the CLI configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Update values in the configuration file
    Set {
        /// Base URL of the todo API
        #[arg(long, value_name = "URL")]
        api_url: Option<String>,
        /// Resource path under the API (defaults to `todo`)
        #[arg(long, value_name = "NAME")]
        resource: Option<String>,
        /// Background retry interval in milliseconds
        #[arg(long, value_name = "MS")]
        poll_interval_ms: Option<u64>,
        /// Local database file
        #[arg(long, value_name = "PATH")]
        db_path: Option<PathBuf>,
    },
}
