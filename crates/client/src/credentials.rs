//! Access-token lookup for hub connections.
//!
//! The token is read again on every connect and reconnect attempt, so a
//! refreshed token takes effect on the next reconnect without restarting the
//! manager. Stored tokens live as JSON files in the platform config directory:
//!   - Linux: `~/.config/clinicsync/`
//!   - macOS: `~/Library/Application Support/clinicsync/`
//!   - Windows: `%APPDATA%\clinicsync\`

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Default storage key of the access token.
pub const ACCESS_TOKEN_KEY: &str = "accessToken";

/// Source of the bearer credential attached to each connection attempt.
pub trait TokenSource: Send + Sync + 'static {
    /// Current access token, or `None` when the user is not signed in.
    fn access_token(&self) -> Option<String>;
}

impl<F> TokenSource for F
where
    F: Fn() -> Option<String> + Send + Sync + 'static,
{
    fn access_token(&self) -> Option<String> {
        self()
    }
}

/// A fixed token.
#[derive(Debug, Clone)]
pub struct StaticTokenSource(Option<String>);

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    /// A source that never yields a token.
    pub fn none() -> Self {
        Self(None)
    }
}

impl TokenSource for StaticTokenSource {
    fn access_token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Reads the token from a JSON file on every call.
///
/// The file holds either a JSON string or an object with an `accessToken`
/// field.
#[derive(Debug, Clone)]
pub struct StoredTokenSource {
    dir: Option<PathBuf>,
    key: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredToken {
    Plain(String),
    #[serde(rename_all = "camelCase")]
    Object { access_token: String },
}

impl StoredTokenSource {
    /// Token stored under [`ACCESS_TOKEN_KEY`] in the platform config directory.
    pub fn new() -> Self {
        Self {
            dir: get_config_dir(),
            key: ACCESS_TOKEN_KEY.to_string(),
        }
    }

    /// Token stored under `key` in `dir`.
    pub fn in_dir(dir: impl Into<PathBuf>, key: impl Into<String>) -> Self {
        Self {
            dir: Some(dir.into()),
            key: key.into(),
        }
    }

    /// Path of the backing file, if a config directory is available.
    pub fn path(&self) -> Option<PathBuf> {
        self.dir.as_deref().map(|dir| file_path(dir, &self.key))
    }
}

impl Default for StoredTokenSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenSource for StoredTokenSource {
    fn access_token(&self) -> Option<String> {
        let path = self.path()?;
        let json = std::fs::read_to_string(&path).ok()?;
        let token = match serde_json::from_str::<StoredToken>(&json) {
            Ok(StoredToken::Plain(token)) => token,
            Ok(StoredToken::Object { access_token }) => access_token,
            Err(e) => {
                crate::log_warn!("Ignoring unreadable token file {}: {}", path.display(), e);
                return None;
            }
        };
        let token = token.trim().to_string();
        (!token.is_empty()).then_some(token)
    }
}

fn get_config_dir() -> Option<PathBuf> {
    Some(dirs::config_dir()?.join("clinicsync"))
}

fn file_path(dir: &Path, key: &str) -> PathBuf {
    // Sanitize key to be a valid filename
    let safe_key = key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
    dir.join(format!("{}.json", safe_key))
}
