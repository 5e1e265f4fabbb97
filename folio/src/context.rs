//! Record identifiers and per-field encryption context.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of a stored record.
///
/// The id is both the storage key and an input to key derivation: changing
/// it invalidates every encrypted field of the record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Creates a record id from an existing identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random (v4) UUID record id.
    #[must_use]
    pub fn generate() -> Self {
        Uuid::new_v4().into()
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<Uuid> for RecordId {
    fn from(id: Uuid) -> Self {
        Self(id.to_string())
    }
}

/// Context binding one field of one record, used as AEAD associated data.
///
/// Binding both the record id and the field name means a ciphertext cannot be
/// replayed into another field or another record's slot.
///
/// # Example
///
/// ```
/// use folio::context::{FieldContext, RecordId};
///
/// let id = RecordId::from("uuid-1");
/// let ctx = FieldContext::new(&id, "email");
/// assert_eq!(ctx.to_string(), "field:uuid-1:email");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldContext<'a> {
    record_id: &'a RecordId,
    field_name: &'a str,
}

impl<'a> FieldContext<'a> {
    /// Creates a context for `field_name` of the record `record_id`.
    #[must_use]
    pub const fn new(record_id: &'a RecordId, field_name: &'a str) -> Self {
        Self { record_id, field_name }
    }

    /// Returns the record id.
    #[must_use]
    pub const fn record_id(&self) -> &RecordId {
        self.record_id
    }

    /// Returns the field name.
    #[must_use]
    pub const fn field_name(&self) -> &str {
        self.field_name
    }

    /// Returns the associated data bytes for this context.
    #[must_use]
    pub fn aad(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for FieldContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "field:{}:{}", self.record_id, self.field_name)
    }
}
