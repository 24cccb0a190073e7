use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{
    BackupCommand, CacheCommand, ConfigCommand, DownloadCommand, StatsCommand, SyncCommand,
};
use hikma_offline::{Config, Engine};

#[derive(Parser)]
#[command(name = "hikma")]
#[command(version)]
#[command(about = "Offline content cache and progress sync", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Download content into the local cache
    Download(DownloadCommand),

    /// Sync progress with the server
    Sync(SyncCommand),

    /// Back up or restore local progress
    Backup(BackupCommand),

    /// Show storage usage per table
    Stats(StatsCommand),

    /// Manage cached content
    Cache(CacheCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hikma_offline=info".into()),
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

    let Some(command) = cli.command else {
        println!("Use --help to see available commands");
        return Ok(());
    };

    if let Commands::Config(cmd) = &command {
        return cmd.run(&config);
    }

    let engine = Engine::open(config).await?;

    // Ctrl-C stops long jobs between items; the partial result is still reported.
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling...");
            on_signal.cancel();
        }
    });

    match command {
        Commands::Download(cmd) => cmd.run(&engine, &cancel).await?,
        Commands::Sync(cmd) => cmd.run(&engine, &cancel).await?,
        Commands::Backup(cmd) => cmd.run(&engine).await?,
        Commands::Stats(cmd) => cmd.run(&engine).await?,
        Commands::Cache(cmd) => cmd.run(&engine).await?,
        Commands::Config(_) => {}
    }

    Ok(())
}
