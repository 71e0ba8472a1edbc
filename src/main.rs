// ABOUTME: CLI entry point for table-sync
// ABOUTME: Parses commands and routes to the templates, copy and apply handlers

use std::io::BufReader;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use table_sync::commands;
use table_sync::config::SyncConfig;
use table_sync::ChangeOperation;

#[derive(Parser)]
#[command(name = "table-sync")]
#[command(about = "Replicate records into a target table through precompiled CRUD statements", long_about = None)]
#[command(version)]
struct Cli {
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    /// Path to the sync configuration file
    #[arg(long, global = true, default_value = "table-sync.toml", env = "TABLE_SYNC_CONFIG")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the generated statements for every configured table
    Templates,
    /// Replay every row of a source SQLite table into the target
    Copy {
        /// Source SQLite database
        #[arg(long)]
        source: PathBuf,
        /// Copy only this table (defaults to every configured table)
        #[arg(long)]
        table: Option<String>,
        /// Operation applied to each source row
        #[arg(long, value_enum, default_value_t = ChangeOperation::Upsert)]
        mode: ChangeOperation,
    },
    /// Apply JSON change messages, one per line
    Apply {
        /// Input file, or - for stdin
        #[arg(long, default_value = "-")]
        input: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG takes precedence over --log
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config = SyncConfig::load(&cli.config)?;

    match cli.command {
        Commands::Templates => commands::templates(&config),
        Commands::Copy {
            source,
            table,
            mode,
        } => {
            let summary = commands::copy(&config, &source, table.as_deref(), mode)?;
            println!("{}", summary);
            Ok(())
        }
        Commands::Apply { input } => {
            let summary = if input == "-" {
                commands::apply(&config, std::io::stdin().lock())?
            } else {
                let file = std::fs::File::open(&input)
                    .with_context(|| format!("Failed to open input file {}", input))?;
                commands::apply(&config, BufReader::new(file))?
            };
            println!("{}", summary);
            Ok(())
        }
    }
}
