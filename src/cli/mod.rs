pub mod classify;
pub mod export;
pub mod import;
pub mod init;
pub mod rules;
pub mod status;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "tally",
    version,
    about = "Review and classify bank transactions from the terminal."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Choose a data directory and initialize the database.
    Init {
        /// Path for tally data (default: ~/Documents/tally)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },
    /// Import a CSV statement (date, description, amount, optional merchant).
    Import {
        /// Path to the CSV file
        file: String,
    },
    /// Manage categorization rules.
    Rules {
        #[command(subcommand)]
        command: RulesCommands,
    },
    /// Classify pending transactions interactively (the default).
    Classify,
    /// Show the data directory and classification progress.
    #[command(alias = "stats")]
    Status,
    /// Export stored classifications to CSV.
    Export {
        /// Output path (default: <data_dir>/exports/classifications-YYYYMMDD-HHMMSS.csv)
        #[arg(long)]
        output: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum RulesCommands {
    /// Add a categorization rule.
    Add {
        /// Pattern to match against descriptions and merchants
        pattern: String,
        /// Category name to suggest
        #[arg(long)]
        category: String,
        /// Match type: contains, starts_with, regex
        #[arg(long = "match-type", default_value = "contains")]
        match_type: String,
        /// Rule priority (higher scores slightly better)
        #[arg(long, default_value = "0")]
        priority: i64,
    },
    /// List active categorization rules.
    List,
}
