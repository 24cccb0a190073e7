//! Bearer-credential authentication for the sync server.
//!
//! Credentials are API keys listed in a YAML file:
//! ```yaml
//! api_keys:
//!   - key: "your-secret-key-here"
//!     parent_id: "family-1"
//! ```

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Owner identity attached to a request after authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub parent_id: String,
}

/// Resolves a bearer credential to its owner.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, credential: &str) -> Option<AuthUser>;
}

/// One line of the key file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyEntry {
    pub key: String,
    pub parent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// The key file as stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiKeyFile {
    #[serde(default)]
    pub api_keys: Vec<ApiKeyEntry>,
}

impl ApiKeyFile {
    /// Reads the key file. A missing file is an empty key list.
    pub fn read(path: &Path) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(serde_yaml::from_str(&contents)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes atomically using temp file + rename.
    pub fn write(&self, path: &Path) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_yaml::to_string(self)?;
        let temp_path = path.with_extension("yaml.tmp");
        let mut file = std::fs::File::create(&temp_path)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }
}

/// API key store - maps key -> AuthUser
#[derive(Debug, Clone, Default)]
pub struct ApiKeyStore {
    keys: HashMap<String, AuthUser>,
}

impl ApiKeyStore {
    pub fn from_entries(entries: impl IntoIterator<Item = ApiKeyEntry>) -> Self {
        let keys = entries
            .into_iter()
            .map(|entry| {
                (
                    entry.key,
                    AuthUser {
                        parent_id: entry.parent_id,
                    },
                )
            })
            .collect();
        Self { keys }
    }

    /// Load API keys from the key file. Failures leave the store empty so
    /// every authenticated request is refused.
    pub fn load(config_path: &PathBuf) -> Self {
        match ApiKeyFile::read(config_path) {
            Ok(file) => {
                let store = Self::from_entries(file.api_keys);
                tracing::info!("Loaded {} API key(s)", store.len());
                if store.is_empty() {
                    tracing::warn!("No API keys loaded - all authenticated requests will fail");
                }
                store
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to read key file {}: {}",
                    config_path.display(),
                    e
                );
                tracing::warn!("No API keys loaded - all authenticated requests will fail");
                Self::default()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl Authenticator for ApiKeyStore {
    fn authenticate(&self, credential: &str) -> Option<AuthUser> {
        self.keys.get(credential).cloned()
    }
}

/// Returns a new random key (32 bytes, base64url encoded).
pub fn generate_key() -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Auth error response
#[derive(Serialize)]
struct AuthError {
    error: &'static str,
    message: &'static str,
}

fn unauthorized(error: &'static str, message: &'static str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(AuthError { error, message })).into_response()
}

/// Authentication middleware
pub async fn auth_middleware(
    State(auth): State<Arc<dyn Authenticator>>,
    mut request: Request,
    next: Next,
) -> Response {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let credential = match auth_header {
        Some(h) => match h.strip_prefix("Bearer ") {
            Some(token) => token.trim(),
            None => {
                return unauthorized(
                    "invalid_auth",
                    "Authorization header must use Bearer scheme",
                )
            }
        },
        None => return unauthorized("missing_auth", "Authorization header required"),
    };

    match auth.authenticate(credential) {
        Some(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        None => {
            tracing::debug!("Rejected request with unknown API key");
            unauthorized("invalid_key", "Invalid API key")
        }
    }
}
