//! The process-wide root secret every record key is derived from.

use std::fmt;

use chacha20poly1305::aead::{rand_core::RngCore, OsRng};
use secrecy::{ExposeSecret, SecretString, SecretVec};
use zeroize::Zeroizing;

use crate::error::Error;

/// Size of a freshly generated root secret in bytes.
pub const GENERATED_SECRET_SIZE: usize = 32;

/// Root secret for record key derivation.
///
/// Loaded once from configuration and read-only afterwards. The bytes are
/// zeroized when the secret is dropped and never printed.
pub struct RootSecret {
    bytes: SecretVec<u8>,
}

impl RootSecret {
    /// Wraps raw secret bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if `bytes` is empty.
    pub fn new(bytes: Vec<u8>) -> Result<Self, Error> {
        if bytes.is_empty() {
            return Err(Error::Configuration("root secret is empty".to_string()));
        }
        Ok(Self { bytes: SecretVec::new(bytes) })
    }

    /// Reads the secret from the environment variable `var`.
    ///
    /// The variable's UTF-8 bytes are used as-is.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the variable is unset, not valid
    /// Unicode, or empty.
    pub fn from_env(var: &str) -> Result<Self, Error> {
        let value = std::env::var(var)
            .map_err(|e| Error::Configuration(format!("{var} is not usable: {e}")))?;
        Self::new(value.into_bytes())
    }

    /// Generates a random secret of [`GENERATED_SECRET_SIZE`] bytes.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; GENERATED_SECRET_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes: SecretVec::new(bytes) }
    }

    /// Generates [`GENERATED_SECRET_SIZE`] random bytes and hex-encodes them,
    /// for storing in `FOLIO_ROOT_SECRET`.
    ///
    /// The configured secret is the text of the variable, so the hex string
    /// itself (not the decoded bytes) becomes the root secret when loaded.
    #[must_use]
    pub fn generate_encoded() -> SecretString {
        let mut bytes = Zeroizing::new([0u8; GENERATED_SECRET_SIZE]);
        OsRng.fill_bytes(&mut bytes[..]);
        SecretString::new(hex::encode(&bytes[..]))
    }

    /// Returns the secret length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.expose_secret().len()
    }

    /// Always `false`; empty secrets are rejected at construction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.expose_secret().is_empty()
    }

    pub(crate) fn expose(&self) -> &[u8] {
        self.bytes.expose_secret()
    }
}

impl fmt::Debug for RootSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RootSecret([REDACTED])")
    }
}
