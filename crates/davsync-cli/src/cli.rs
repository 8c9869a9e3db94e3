//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// davsync - keep a local event store in step with CalDAV calendars
#[derive(Debug, Parser)]
#[command(name = "davsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "DAVSYNC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Path to the state file (overrides the config)
    #[arg(long, env = "DAVSYNC_STATE", global = true)]
    pub state: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v', global = true)]
    pub debug: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Top-level subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Add a CalDAV account and discover its calendars
    Connect {
        /// Name used to refer to this connection
        id: String,

        /// Server URL (principal, home set or calendar)
        #[arg(long)]
        url: String,

        #[arg(long, short)]
        username: String,

        /// Password; read from stdin when omitted
        #[arg(long, env = "DAVSYNC_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Replace an existing connection with the same name
        #[arg(long)]
        force: bool,
    },

    /// Remove a connection and its stored events
    Disconnect { id: String },

    /// Sync one connection, or all of them
    Sync {
        id: Option<String>,

        /// Refetch everything instead of asking for changes
        #[arg(long)]
        full: bool,
    },

    /// List, refresh or toggle the calendars of a connection
    Calendars {
        id: String,

        #[command(subcommand)]
        action: Option<CalendarAction>,
    },

    /// List stored events of a calendar
    Events {
        id: String,

        /// Calendar id; defaults to the connection's default calendar
        #[arg(long)]
        calendar: Option<String>,
    },

    /// Create or update a remote event from a JSON file ("-" for stdin)
    Push {
        id: String,

        file: PathBuf,

        #[arg(long)]
        calendar: Option<String>,
    },

    /// Delete a remote event
    Delete {
        id: String,

        /// Provider event id (the iCalendar UID)
        event_id: String,

        #[arg(long)]
        calendar: Option<String>,
    },

    /// Show connections, calendars and cursors
    Status { id: Option<String> },

    /// Master key management
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum CalendarAction {
    /// Show stored calendars (default)
    List,
    /// Ask the server for its current calendar list
    Refresh,
    /// Include a calendar in sync
    Enable { calendar: String },
    /// Exclude a calendar from sync
    Disable { calendar: String },
}

#[derive(Debug, Subcommand)]
pub enum KeyAction {
    /// Print a fresh random master key
    Generate,
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration
    Dump,
    /// Print the configuration and state file paths
    Path,
}
