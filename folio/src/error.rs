//! Error types for `Folio` operations.

use std::fmt;

/// Main error type for `Folio` operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Process configuration is missing or invalid (e.g. no root secret)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// IV/tag segment counts do not match the number of encrypted fields
    #[error("cipher bundle misaligned: {fields} fields, {ivs} iv segments, {tags} tag segments")]
    Alignment {
        /// Number of entries in the ciphertext map
        fields: usize,
        /// Number of `:`-separated IV segments
        ivs: usize,
        /// Number of `:`-separated tag segments
        tags: usize,
    },

    /// Authentication failed for a field (tampered data, wrong key or wrong record id)
    #[error("integrity check failed for field `{field}`")]
    Integrity {
        /// Name of the field that failed to authenticate
        field: String,
    },

    /// AEAD encryption of a field failed
    #[error("encryption failed for field `{field}`")]
    Encryption {
        /// Name of the field being encrypted
        field: String,
    },

    /// Key derivation failed
    #[error("key derivation failed")]
    KeyDerivation,

    /// The same field name was supplied twice
    #[error("duplicate field name: {0}")]
    DuplicateField(String),

    /// Sibling positions start at 1
    #[error("invalid sibling position: {0} (positions start at 1)")]
    InvalidPosition(u32),

    /// No sibling occupies the requested position
    #[error("no sibling at position {0}")]
    PositionNotFound(u32),

    /// The storage transaction failed and was rolled back
    #[error("transaction failed: {0}")]
    Transaction(#[from] StoreError),
}

impl Error {
    /// Returns a generic message that is safe to show to API clients.
    ///
    /// Never includes field names, record ids or any cryptographic detail.
    #[must_use]
    pub const fn public_message(&self) -> &'static str {
        match self {
            Self::Configuration(_) | Self::KeyDerivation | Self::Encryption { .. } => {
                "internal server error"
            }
            Self::Alignment { .. } | Self::Integrity { .. } => "stored record could not be read",
            Self::DuplicateField(_) | Self::InvalidPosition(_) => "invalid request",
            Self::PositionNotFound(_) => "not found",
            Self::Transaction(_) => "request could not be completed",
        }
    }
}

/// Errors raised by a sibling store backend.
#[derive(Debug)]
pub enum StoreError {
    /// Target order is already taken by another sibling in the scope
    Conflict {
        /// The occupied order value
        order: i64,
    },

    /// A sibling with this record id already exists
    DuplicateRecord(String),

    /// No sibling holds the given order
    MissingOrder(i64),

    /// Backend-specific failure (I/O, SQL, ...)
    Backend(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conflict { order } => write!(f, "order {order} already taken in scope"),
            Self::DuplicateRecord(id) => write!(f, "record already present: {id}"),
            Self::MissingOrder(order) => write!(f, "no sibling holds order {order}"),
            Self::Backend(msg) => write!(f, "storage backend error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}
