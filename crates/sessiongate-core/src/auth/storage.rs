//! Persisted access token storage.
//!
//! The session store takes one `TokenStorage` strategy: `NoStorage`
//! (nothing survives the process), `MemoryStorage` (survives within the
//! process only), `FileStorage` (JSON file in the cache directory) or
//! `KeyringStorage` (OS keychain).
//!
//! Every strategy stores the raw token together with cookie-style
//! attributes. A record read back after its max-age is treated as absent.

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Key the token is stored under
pub const TOKEN_KEY: &str = "auth-token";

/// Keychain service name
const SERVICE_NAME: &str = "sessiongate";

/// Persisted tokens live for 7 days
pub const TOKEN_MAX_AGE_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAttributes {
    pub max_age_secs: i64,
    pub secure: bool,
    pub same_site: SameSite,
}

impl TokenAttributes {
    /// Attributes used when persisting a freshly issued access token
    pub fn for_session(production: bool) -> Self {
        Self {
            max_age_secs: Duration::days(TOKEN_MAX_AGE_DAYS).num_seconds(),
            secure: production,
            same_site: SameSite::Strict,
        }
    }
}

/// A stored record exists but does not parse. Returned (inside the
/// `anyhow::Error`) by `load`, so callers can tell it apart from I/O failures.
#[derive(Error, Debug)]
#[error("stored token record is corrupt: {0}")]
pub struct CorruptRecord(#[from] serde_json::Error);

/// One persisted token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    pub value: String,
    pub attributes: TokenAttributes,
    pub written_at: DateTime<Utc>,
}

impl StoredToken {
    pub fn new(value: String, attributes: TokenAttributes) -> Self {
        Self {
            value,
            attributes,
            written_at: Utc::now(),
        }
    }

    pub fn is_past_max_age(&self, now: DateTime<Utc>) -> bool {
        now >= self.written_at + Duration::seconds(self.attributes.max_age_secs)
    }
}

/// Where the session store keeps its access token between runs
pub trait TokenStorage: Send + Sync {
    /// Read the stored record, or `None` if nothing is stored.
    fn load(&self) -> Result<Option<StoredToken>>;

    fn save(&self, token: &StoredToken) -> Result<()>;

    /// Remove the stored token. Removing when nothing is stored is not an error.
    fn clear(&self) -> Result<()>;

    /// Read the token value, dropping a record that outlived its max-age
    fn read_token(&self) -> Result<Option<String>> {
        match self.load()? {
            Some(stored) if stored.is_past_max_age(Utc::now()) => {
                debug!("Stored token past its max-age, discarding");
                self.clear()?;
                Ok(None)
            }
            Some(stored) => Ok(Some(stored.value)),
            None => Ok(None),
        }
    }

    /// Persist `token` with `attributes`
    fn write_token(&self, token: &str, attributes: TokenAttributes) -> Result<()> {
        self.save(&StoredToken::new(token.to_string(), attributes))
    }
}

// ============================================================================
// Strategies
// ============================================================================

/// Persists nothing
#[derive(Debug, Default)]
pub struct NoStorage;

impl TokenStorage for NoStorage {
    fn load(&self) -> Result<Option<StoredToken>> {
        Ok(None)
    }

    fn save(&self, _token: &StoredToken) -> Result<()> {
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        Ok(())
    }
}

/// Keeps the token for the lifetime of the process
#[derive(Debug, Default)]
pub struct MemoryStorage {
    slot: Mutex<Option<StoredToken>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<StoredToken>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TokenStorage for MemoryStorage {
    fn load(&self) -> Result<Option<StoredToken>> {
        Ok(self.slot().clone())
    }

    fn save(&self, token: &StoredToken) -> Result<()> {
        *self.slot() = Some(token.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot() = None;
        Ok(())
    }
}

/// JSON file under the cache directory
pub struct FileStorage {
    cache_dir: PathBuf,
}

impl FileStorage {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    fn token_path(&self) -> PathBuf {
        self.cache_dir.join(format!("{}.json", TOKEN_KEY))
    }
}

impl TokenStorage for FileStorage {
    fn load(&self) -> Result<Option<StoredToken>> {
        let path = self.token_path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path).context("Failed to read token file")?;
        let stored = serde_json::from_str(&contents)
            .map_err(CorruptRecord::from)
            .context("Failed to parse token file")?;
        Ok(Some(stored))
    }

    fn save(&self, token: &StoredToken) -> Result<()> {
        let path = self.token_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create cache directory")?;
        }
        let contents = serde_json::to_string_pretty(token)?;
        std::fs::write(&path, contents).context("Failed to write token file")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let path = self.token_path();
        if path.exists() {
            std::fs::remove_file(path).context("Failed to remove token file")?;
        }
        Ok(())
    }
}

/// OS keychain entry holding the serialized record
pub struct KeyringStorage {
    account: String,
}

impl KeyringStorage {
    pub fn new() -> Self {
        Self {
            account: TOKEN_KEY.to_string(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(SERVICE_NAME, &self.account).context("Failed to create keyring entry")
    }
}

impl Default for KeyringStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStorage for KeyringStorage {
    fn load(&self) -> Result<Option<StoredToken>> {
        match self.entry()?.get_password() {
            Ok(contents) => {
                let stored = serde_json::from_str(&contents)
                    .map_err(CorruptRecord::from)
                    .context("Failed to parse keychain token")?;
                Ok(Some(stored))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to read token from keychain"),
        }
    }

    fn save(&self, token: &StoredToken) -> Result<()> {
        let contents = serde_json::to_string(token)?;
        self.entry()?
            .set_password(&contents)
            .context("Failed to store token in keychain")
    }

    fn clear(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete token from keychain"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
