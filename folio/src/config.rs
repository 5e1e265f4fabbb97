//! Process configuration.
//!
//! Values come from environment variables prefixed with `FOLIO_`:
//!
//! | variable              | default        |
//! |-----------------------|----------------|
//! | `FOLIO_ROOT_SECRET`   | **required**   |
//! | `FOLIO_CIPHER_MODE`   | `aes-256-gcm`  |
//! | `FOLIO_DATABASE_PATH` | `folio.db`     |
//! | `FOLIO_LOG_LEVEL`     | `info`         |
//!
//! A missing root secret is reported when the settings are loaded, before a
//! codec can be built.

use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;
use tracing::warn;
use zeroize::Zeroize;

use crate::codec::{CipherMode, FieldCodec};
use crate::error::Error;
use crate::secret::RootSecret;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "FOLIO";

/// Root secrets shorter than this are accepted but logged.
pub const RECOMMENDED_SECRET_LEN: usize = 32;

#[derive(Deserialize)]
struct RawSettings {
    root_secret: Option<String>,
    #[serde(default)]
    cipher_mode: CipherMode,
    #[serde(default = "default_database_path")]
    database_path: PathBuf,
    #[serde(default = "default_log_level")]
    log_level: String,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("folio.db")
}

fn default_log_level() -> String {
    "info".into()
}

/// Validated configuration.
pub struct Settings {
    /// Root secret for record key derivation.
    pub root_secret: RootSecret,
    /// AEAD cipher for sealing fields.
    pub cipher_mode: CipherMode,
    /// SQLite database path used by the storage backend.
    pub database_path: PathBuf,
    /// Tracing filter directive (e.g. `"info"`, `"folio=debug"`).
    pub log_level: String,
}

impl Settings {
    /// Loads settings from `FOLIO_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the root secret is missing or empty,
    /// or a value cannot be parsed.
    pub fn from_env() -> Result<Self, Error> {
        Self::load(config::Environment::with_prefix(ENV_PREFIX))
    }

    /// Loads settings from an explicit variable map instead of the process
    /// environment. Keys use the same `FOLIO_*` names.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let source: config::Map<String, String> =
            vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Self::load(config::Environment::with_prefix(ENV_PREFIX).source(Some(source)))
    }

    /// Builds a codec from these settings, consuming the root secret.
    #[must_use]
    pub fn into_codec(self) -> FieldCodec {
        FieldCodec::new(self.root_secret, self.cipher_mode)
    }

    fn load(env: config::Environment) -> Result<Self, Error> {
        let raw = RawSettings::load(env)?;

        let Some(mut secret) = raw.root_secret else {
            return Err(Error::Configuration(format!("{ENV_PREFIX}_ROOT_SECRET is not set")));
        };
        let root_secret = RootSecret::new(secret.as_bytes().to_vec())?;
        secret.zeroize();

        if root_secret.len() < RECOMMENDED_SECRET_LEN {
            warn!(
                len = root_secret.len(),
                recommended = RECOMMENDED_SECRET_LEN,
                "root secret is shorter than recommended"
            );
        }

        Ok(Self {
            root_secret,
            cipher_mode: raw.cipher_mode,
            database_path: raw.database_path,
            log_level: raw.log_level,
        })
    }
}

/// Settings for storage-only work, such as sibling ordering, that never
/// touches encrypted fields. The root secret is not required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    /// SQLite database path used by the storage backend.
    pub database_path: PathBuf,
    /// Tracing filter directive.
    pub log_level: String,
}

impl StoreSettings {
    /// Loads storage settings from `FOLIO_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if a value cannot be parsed.
    pub fn from_env() -> Result<Self, Error> {
        Self::load(config::Environment::with_prefix(ENV_PREFIX))
    }

    /// Loads storage settings from an explicit variable map.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let source: config::Map<String, String> =
            vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Self::load(config::Environment::with_prefix(ENV_PREFIX).source(Some(source)))
    }

    fn load(env: config::Environment) -> Result<Self, Error> {
        let mut raw = RawSettings::load(env)?;
        if let Some(secret) = raw.root_secret.as_mut() {
            secret.zeroize();
        }
        Ok(Self { database_path: raw.database_path, log_level: raw.log_level })
    }
}

impl RawSettings {
    fn load(env: config::Environment) -> Result<Self, Error> {
        config::Config::builder()
            .add_source(env)
            .build()
            .and_then(|cfg| cfg.try_deserialize())
            .map_err(|e| Error::Configuration(format!("failed to load configuration: {e}")))
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("root_secret", &self.root_secret)
            .field("cipher_mode", &self.cipher_mode)
            .field("database_path", &self.database_path)
            .field("log_level", &self.log_level)
            .finish()
    }
}
