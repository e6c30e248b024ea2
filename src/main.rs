use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use decision_arena::cli::{Cli, Commands, Display, OutputFormat};
use decision_arena::config::ArenaConfig;
use decision_arena::error::Result;
use decision_arena::store::ArenaStore;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            Display::new().print_error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("decision_arena=debug")
    } else {
        EnvFilter::new("decision_arena=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let display = Display::new();
    let db_path = cli.db.unwrap_or_else(|| PathBuf::from("arena.db"));

    match cli.command {
        Commands::Leaderboard => {
            let store = ArenaStore::open(&db_path)?;
            let scores = store.all_historical_scores().await?;
            match cli.output {
                OutputFormat::Text => display.print_leaderboard(&scores),
                OutputFormat::Json => print_json(&scores)?,
            }
            Ok(())
        }
        Commands::Results { context_id } => {
            let store = ArenaStore::open(&db_path)?;
            let results = store.agent_results(&context_id).await?;
            match cli.output {
                OutputFormat::Text => {
                    display.print_header(&format!("Results: {context_id}"));
                    for result in &results {
                        display.print_result_summary(result);
                    }
                }
                OutputFormat::Json => print_json(&results)?,
            }
            Ok(())
        }
        Commands::Votes { context_id } => {
            let store = ArenaStore::open(&db_path)?;
            let edges = store.vote_edges(&context_id).await?;
            match cli.output {
                OutputFormat::Text => {
                    display.print_header(&format!("Votes: {context_id}"));
                    for edge in &edges {
                        display.print_vote(edge);
                    }
                }
                OutputFormat::Json => print_json(&edges)?,
            }
            Ok(())
        }
        Commands::Log { context_id } => {
            let store = ArenaStore::open(&db_path)?;
            let logs = store.adoption_logs(&context_id).await?;
            match cli.output {
                OutputFormat::Text => {
                    for log in &logs {
                        display.print_adoption(log);
                    }
                    if logs.is_empty() {
                        println!("No adoption recorded for {context_id}.");
                    }
                }
                OutputFormat::Json => print_json(&logs)?,
            }
            Ok(())
        }
        Commands::Validate { config } => {
            let loaded = ArenaConfig::load(&config).await?;
            loaded.validate()?;
            println!("{} agents configured, config is valid.", loaded.agents.len());
            Ok(())
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
