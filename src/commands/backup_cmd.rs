use clap::{Args, Subcommand};

use hikma_offline::Engine;

/// Local progress backup
#[derive(Args)]
pub struct BackupCommand {
    #[command(subcommand)]
    command: Option<BackupSubcommand>,
}

#[derive(Subcommand)]
enum BackupSubcommand {
    /// Write a fresh snapshot (default)
    Create,
    /// Show the backup slot
    Status,
    /// Merge the backup into the local store
    Restore,
}

impl BackupCommand {
    pub async fn run(&self, engine: &Engine) -> Result<(), Box<dyn std::error::Error>> {
        match self.command.as_ref().unwrap_or(&BackupSubcommand::Create) {
            BackupSubcommand::Create => {
                let snapshot = engine.backup().await?;
                println!(
                    "Backed up {} row(s) at {}",
                    snapshot.data.row_count(),
                    snapshot.created_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
                println!("  {}", engine.config().backup_path().display());
            }
            BackupSubcommand::Status => {
                let meta = engine.backup_meta().await?;
                if !meta.exists {
                    println!("No backup yet.");
                    return Ok(());
                }
                println!("Path:    {}", engine.config().backup_path().display());
                println!("Size:    {} bytes", meta.size_bytes);
                match meta.created_at {
                    Some(at) => println!("Created: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
                    None => println!("Created: unknown (unreadable header)"),
                }
                if let Some(version) = meta.version {
                    println!("Version: {}", version);
                }
            }
            BackupSubcommand::Restore => {
                let report = engine.restore().await?;
                println!("Restored {} row(s).", report.applied);
                for rejection in &report.rejected {
                    println!(
                        "  ✗ skipped {} {}: {}",
                        rejection.table, rejection.key, rejection.reason
                    );
                }
            }
        }
        Ok(())
    }
}
