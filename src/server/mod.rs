//! Server-side modules for the progress sync server.

pub mod auth;
pub mod routes;
pub mod storage;

pub use auth::{generate_key, ApiKeyEntry, ApiKeyFile, ApiKeyStore, AuthUser, Authenticator};
pub use routes::router;
pub use storage::{MergeOutcome, ServerStorageError, SyncServer};
