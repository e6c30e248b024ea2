use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "arena")]
#[command(author, version, about = "Multi-agent decision arena inspection", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(short, long, global = true, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// Path to the arena database (default: arena.db)
    #[arg(long, global = true, env = "ARENA_DB")]
    pub db: Option<PathBuf>,
}

/// Output format for CLI results.
#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show lifetime scores per agent, best net first
    Leaderboard,

    /// Show every agent's Phase 1 result for a context
    Results {
        /// Context ID
        context_id: String,
    },

    /// Show recorded votes for a context
    Votes {
        /// Context ID
        context_id: String,
    },

    /// Show the adoption log for a context
    Log {
        /// Context ID
        context_id: String,
    },

    /// Validate a roster configuration file
    Validate {
        /// Path to the TOML config
        config: PathBuf,
    },
}
