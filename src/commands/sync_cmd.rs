//! Sync CLI commands for synchronizing with the server.

use clap::{Args, Subcommand};
use tokio_util::sync::CancellationToken;

use hikma_offline::sync::{SyncClient, SyncError};
use hikma_offline::Engine;

/// Sync with remote server
#[derive(Debug, Args)]
pub struct SyncCommand {
    #[command(subcommand)]
    command: Option<SyncSubcommand>,
}

#[derive(Debug, Subcommand)]
enum SyncSubcommand {
    /// Show sync configuration and server status
    Status,
}

impl SyncCommand {
    pub async fn run(
        &self,
        engine: &Engine,
        cancel: &CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            None => self.sync(engine, cancel).await,
            Some(SyncSubcommand::Status) => self.status(engine).await,
        }
    }

    async fn sync(
        &self,
        engine: &Engine,
        cancel: &CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error>> {
        println!("Syncing with server...");
        println!();

        let report = engine.sync(cancel).await?;

        println!("  ✓ pushed {} row(s)", report.pushed);
        println!("  ✓ pulled {} row(s)", report.pulled);
        for rejection in &report.rejected {
            println!(
                "  ✗ rejected {} {}: {}",
                rejection.table, rejection.key, rejection.reason
            );
        }

        println!();
        if report.cancelled {
            println!("Sync cancelled; run again to finish.");
        } else {
            println!("Sync complete.");
        }

        Ok(())
    }

    async fn status(&self, engine: &Engine) -> Result<(), Box<dyn std::error::Error>> {
        let config = engine.config();

        println!("Sync Configuration");
        println!("==================");
        println!();

        let (Some(server_url), Some(token)) = (&config.sync.server_url, &config.sync.api_token)
        else {
            println!("Status: Not configured");
            println!();
            println!("To enable sync, add to your config file:");
            println!();
            println!("  parent_id: \"your-family-id\"");
            println!("  sync:");
            println!("    server_url: \"http://localhost:8080\"");
            println!("    api_token: \"your-api-key\"");
            println!();
            println!("Or set environment variables:");
            println!("  HIKMA_SYNC_URL");
            println!("  HIKMA_SYNC_TOKEN");
            return Ok(());
        };

        println!("Server:    {}", server_url);
        println!("Token:     {}...", token.chars().take(8).collect::<String>());
        println!(
            "Parent ID: {}",
            config.parent_id.value.as_deref().unwrap_or("(not set)")
        );
        println!();

        print!("Server status: ");
        let client = SyncClient::from_config(&config.sync)?;
        match client.health().await {
            Ok(()) => println!("✓ reachable"),
            Err(SyncError::NetworkUnavailable(_)) => println!("✗ unreachable"),
            Err(e) => println!("✗ error: {}", e),
        }

        Ok(())
    }
}
