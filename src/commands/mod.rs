mod backup_cmd;
mod config_cmd;
mod download;
mod stats;
mod sync_cmd;

pub use backup_cmd::BackupCommand;
pub use config_cmd::{ConfigCommand, OutputFormat};
pub use download::DownloadCommand;
pub use stats::{CacheCommand, StatsCommand};
pub use sync_cmd::SyncCommand;
