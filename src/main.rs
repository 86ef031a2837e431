mod categorizer;
mod cli;
mod db;
mod engine;
mod error;
mod export;
mod fmt;
mod importer;
mod logging;
mod models;
mod review;
mod settings;
mod storage;
mod tui;

use clap::Parser;

use cli::{Cli, Commands, RulesCommands};

fn main() {
    let cli = Cli::parse();

    let result = match cli.command.unwrap_or(Commands::Classify) {
        Commands::Init { data_dir } => cli::init::run(data_dir),
        Commands::Import { file } => cli::import::run(&file),
        Commands::Rules { command } => match command {
            RulesCommands::Add {
                pattern,
                category,
                match_type,
                priority,
            } => cli::rules::add(&pattern, &category, &match_type, priority),
            RulesCommands::List => cli::rules::list(),
        },
        Commands::Classify => cli::classify::run(),
        Commands::Status => cli::status::run(),
        Commands::Export { output } => cli::export::run(output),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
