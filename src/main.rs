use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{AccountCommand, AddressCommand, ConfigCommand, SyncCommand};
use replisync::config::Config;
use replisync::db::{init_db, SqliteRepository};

#[derive(Parser)]
#[command(name = "replisync")]
#[command(version)]
#[command(about = "Local replica of accounts and addresses, synced with a Replisync server", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage accounts
    Account(AccountCommand),

    /// Manage addresses
    Address(AddressCommand),

    /// Sync with the server
    Sync(SyncCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    // Logs go to stderr so command output stays clean
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "replisync=warn,replisync_core=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;

    match cli.command {
        Some(Commands::Account(cmd)) => {
            let pool = init_db(&config.database_path.value).await?;
            cmd.run(&SqliteRepository::new(pool)).await?;
        }
        Some(Commands::Address(cmd)) => {
            let pool = init_db(&config.database_path.value).await?;
            cmd.run(&SqliteRepository::new(pool)).await?;
        }
        Some(Commands::Sync(cmd)) => {
            let pool = init_db(&config.database_path.value).await?;
            cmd.run(&pool, &config).await?;
        }
        Some(Commands::Config(cmd)) => {
            cmd.run(&config)?;
        }
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}
