use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "grimoire")]
#[command(about = "Offline-first character sheets from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalArgs,
}

#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Owner to act as (falls back to GRIMOIRE_OWNER)
    #[arg(long, global = true, value_name = "OWNER")]
    pub owner: Option<String>,

    /// Work against the local store only; changes stay queued
    #[arg(long, global = true)]
    pub offline: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List characters
    #[command(alias = "ls")]
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one character
    Show {
        /// Character ID or unique ID prefix
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create a new character
    #[command(alias = "new")]
    Create {
        #[arg(long)]
        name: Option<String>,
        #[arg(long = "class", value_name = "CLASS")]
        class_name: Option<String>,
        #[arg(long)]
        level: Option<u8>,
    },
    /// Update basic character fields
    Update {
        /// Character ID or unique ID prefix
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long = "class", value_name = "CLASS")]
        class_name: Option<String>,
        #[arg(long)]
        level: Option<u8>,
        #[arg(long)]
        armor_class: Option<i32>,
        #[arg(long)]
        speed: Option<i32>,
    },
    /// Set one ability score
    Ability {
        /// Character ID or unique ID prefix
        id: String,
        /// Ability name, e.g. `strength` or `str`
        ability: String,
        score: i32,
    },
    /// Change hit points
    Hp {
        /// Character ID or unique ID prefix
        id: String,
        #[arg(long, allow_negative_numbers = true)]
        current: Option<i32>,
        #[arg(long)]
        maximum: Option<i32>,
        #[arg(long)]
        temporary: Option<i32>,
    },
    /// Add or remove an active condition
    Condition {
        /// Character ID or unique ID prefix
        id: String,
        #[arg(value_enum)]
        action: ConditionAction,
        /// Condition name, e.g. `prone`
        condition: String,
        /// Remaining rounds
        #[arg(long)]
        duration: Option<u32>,
    },
    /// Delete a character
    Delete {
        /// Character ID or unique ID prefix
        id: String,
    },
    /// Push a character to the remote store right away
    Save {
        /// Character ID or unique ID prefix
        id: String,
    },
    /// Drain queued changes to the remote store
    Sync,
    /// Show connectivity and pending changes
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ConditionAction {
    Add,
    Remove,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
