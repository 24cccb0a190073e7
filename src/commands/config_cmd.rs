use clap::{Args, Subcommand, ValueEnum};

use hikma_offline::config::Config;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &config.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!(
                                "Config file: {} (not found)",
                                Config::default_config_path().display()
                            );
                        }
                        println!();

                        println!("data_dir: {}", config.data_dir.value.display());
                        println!("  source: {}", config.data_dir.source);
                        println!();

                        println!(
                            "parent_id: {}",
                            config.parent_id.value.as_deref().unwrap_or("(not set)")
                        );
                        println!("  source: {}", config.parent_id.source);
                        println!();

                        match config.quota_bytes.value {
                            Some(quota) => println!("quota_bytes: {}", quota),
                            None => println!("quota_bytes: unlimited"),
                        }
                        println!("  source: {}", config.quota_bytes.source);
                        println!();

                        println!(
                            "sync.server_url: {}",
                            config.sync.server_url.as_deref().unwrap_or("(not set)")
                        );
                        println!("download.edition: {}", config.download.edition);
                        println!("download.reciter: {}", config.download.reciter);
                        println!(
                            "download.asset_manifest: {} url(s)",
                            config.download.asset_manifest.len()
                        );
                    }
                }
                Ok(())
            }
        }
    }
}
