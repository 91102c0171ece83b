use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use episodic_backend::memory::status::ActionStatus;
use episodic_backend::{EpisodeDatabase, HistoryFilter, MemoryConfig};

/// Inspect an agent's episodic memory log.
#[derive(Parser, Debug)]
#[command(name = "episodic", version)]
struct Cli {
    /// Database path; defaults to the configured one.
    #[arg(long, env = "EPISODIC_DB_PATH")]
    db: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print recent actions, newest first.
    History {
        #[arg(long, default_value_t = 300)]
        limit: usize,
        /// Only this quest.
        #[arg(long)]
        quest: Option<String>,
        /// Result substring, e.g. SUCCESS, FAILURE, pending.
        #[arg(long)]
        status: Option<String>,
        /// Only this action name, e.g. move_in_direction.
        #[arg(long = "action-type")]
        action: Option<String>,
    },
    /// Print row counts and result statistics.
    Stats,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,episodic=debug")),
        )
        .init();

    let cli = Cli::parse();
    let path = cli.db.unwrap_or_else(|| MemoryConfig::load().database_path);
    tracing::debug!("Inspecting {:?} with {:?}", path, cli.command);
    let db = EpisodeDatabase::new(&path)
        .with_context(|| format!("failed to open episode database '{}'", path))?;

    match cli.command {
        Command::History {
            limit,
            quest,
            status,
            action,
        } => print_history(
            &db,
            &HistoryFilter {
                quest,
                result_contains: status.filter(|s| !s.eq_ignore_ascii_case("all")),
                action,
                limit,
            },
        )?,
        Command::Stats => print_stats(&db)?,
    }

    db.close()
}

fn print_history(db: &EpisodeDatabase, filter: &HistoryFilter) -> Result<()> {
    let actions = db.query_actions(filter)?;

    println!("# History Action Log");
    println!("<<<");
    for action in &actions {
        println!("{}", action.history_line());
    }
    println!(">>>");
    println!("Listed {} action(s)", actions.len());
    Ok(())
}

fn print_stats(db: &EpisodeDatabase) -> Result<()> {
    println!("Actions: {}", db.count_actions()?);
    println!("Reflections: {}", db.count_reflections()?);
    println!("Inventory: {}", db.inventory_state()?.as_db_str());

    println!("\nStored results:");
    for (result, count) in db.result_counts()? {
        println!("  {:>5}  {}", count, result);
    }

    println!("\nInferred feedback status:");
    let counts = db.feedback_status_counts()?;
    for status in [
        ActionStatus::Success,
        ActionStatus::Failure,
        ActionStatus::Pending,
        ActionStatus::Unknown,
    ] {
        println!(
            "  {:>5}  {}",
            counts.get(&status).copied().unwrap_or(0),
            status.label()
        );
    }
    Ok(())
}
