use clap::{Args, Subcommand};

use hikma_offline::{Engine, Table};

use super::OutputFormat;

/// Show what is stored locally
#[derive(Args)]
pub struct StatsCommand {
    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

impl StatsCommand {
    pub async fn run(&self, engine: &Engine) -> Result<(), Box<dyn std::error::Error>> {
        let stats = engine.stats().await?;

        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
            OutputFormat::Text => {
                println!("{:<18} {:>8} {:>14}", "TABLE", "ROWS", "BYTES");
                println!("{}", "-".repeat(42));
                for table in &stats.tables {
                    println!(
                        "{:<18} {:>8} {:>14}",
                        table.table.name(),
                        table.count,
                        table.approximate_bytes
                    );
                }
                println!("{}", "-".repeat(42));
                println!("{:<18} {:>8} {:>14}", "total", "", stats.total_bytes());
                if let Some(quota) = engine.config().quota_bytes.value {
                    println!("Quota: {} bytes", quota);
                }
            }
        }
        Ok(())
    }
}

/// Manage cached content
#[derive(Args)]
pub struct CacheCommand {
    #[command(subcommand)]
    command: CacheSubcommand,
}

#[derive(Subcommand)]
enum CacheSubcommand {
    /// Delete cached content (progress is never deleted)
    Clear {
        /// Table to clear (repeatable): surahs, audio, stories, assets.
        /// Clears every content table when omitted.
        #[arg(long = "table", short)]
        tables: Vec<Table>,
    },
}

impl CacheCommand {
    pub async fn run(&self, engine: &Engine) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            CacheSubcommand::Clear { tables } => {
                let tables: Vec<Table> = if tables.is_empty() {
                    Table::ALL.into_iter().filter(Table::is_content).collect()
                } else {
                    tables.clone()
                };
                let removed = engine.clear_cache(&tables).await?;
                println!("Removed {} cached row(s).", removed);
            }
        }
        Ok(())
    }
}
