//! Hikma Admin CLI
//!
//! Manages the API keys the sync server accepts.
//!
//! # Usage
//!
//! ```bash
//! hikma-admin key add family-1
//! hikma-admin key list
//! hikma-admin key revoke <key>
//! ```
//!
//! # Environment Variables
//!
//! - `HIKMA_SERVER_CONFIG`: Path to the key file (default: ~/.config/hikma-server/config.yaml)
//!
//! The server reads the key file at startup; restart it after changes.

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use hikma_offline::server::{generate_key, ApiKeyEntry, ApiKeyFile};

#[derive(Parser)]
#[command(name = "hikma-admin")]
#[command(version)]
#[command(about = "Hikma sync server administration tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage API keys
    Key(KeyCommand),
}

#[derive(Args)]
struct KeyCommand {
    #[command(subcommand)]
    command: KeySubcommand,
}

#[derive(Subcommand)]
enum KeySubcommand {
    /// Issue a new key for a family
    Add {
        /// Family the key grants access to
        parent_id: String,
    },
    /// List all keys
    List,
    /// Revoke a key
    Revoke {
        /// The key to revoke
        key: String,
    },
}

fn key_file_path() -> PathBuf {
    std::env::var("HIKMA_SERVER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("hikma-server")
                .join("config.yaml")
        })
}

type AdminResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

fn add_key(parent_id: String) -> AdminResult {
    let trimmed = parent_id.trim();
    if trimmed.is_empty() || trimmed.contains('/') {
        return Err(format!("invalid parent id '{}'", parent_id).into());
    }

    let path = key_file_path();
    let mut file = ApiKeyFile::read(&path)?;

    let key = generate_key();
    file.api_keys.push(ApiKeyEntry {
        key: key.clone(),
        parent_id: trimmed.to_string(),
        created_at: Some(Utc::now().to_rfc3339()),
    });
    file.write(&path)?;

    println!("Added key for {}", trimmed);
    println!("  Key: {}", key);
    println!();
    println!("Give this key to the device as sync.api_token.");

    Ok(())
}

fn list_keys() -> AdminResult {
    let file = ApiKeyFile::read(&key_file_path())?;

    if file.api_keys.is_empty() {
        println!("No keys issued.");
        return Ok(());
    }

    println!("{:<16} {:<24} {:<30}", "KEY", "PARENT", "CREATED");
    println!("{}", "-".repeat(70));

    for entry in &file.api_keys {
        let prefix: String = entry.key.chars().take(8).collect();
        println!(
            "{:<16} {:<24} {:<30}",
            format!("{}...", prefix),
            entry.parent_id,
            entry.created_at.as_deref().unwrap_or("-")
        );
    }

    println!();
    println!("Total: {} key(s)", file.api_keys.len());

    Ok(())
}

fn revoke_key(key: String) -> AdminResult {
    let path = key_file_path();
    let mut file = ApiKeyFile::read(&path)?;

    let before = file.api_keys.len();
    file.api_keys.retain(|entry| entry.key != key);
    if file.api_keys.len() == before {
        return Err("key not found".into());
    }

    file.write(&path)?;
    println!("Revoked key.");

    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Key(key_cmd) => match key_cmd.command {
            KeySubcommand::Add { parent_id } => add_key(parent_id),
            KeySubcommand::List => list_keys(),
            KeySubcommand::Revoke { key } => revoke_key(key),
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
