//! Cipher bundle format.
//!
//! A bundle is what gets persisted for the sensitive fields of one record:
//!
//! ```text
//! cipher_by_field: { "email": "<hex>", "nom": "<hex>" }
//! iv_joined:       "<hex iv email>:<hex iv nom>"
//! tag_joined:      "<hex tag email>:<hex tag nom>"
//! ```
//!
//! IV and tag segments follow the lexicographic order of the field names.
//! All three parts are plain strings so they can be stored as opaque columns.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Separator between hex segments in the joined IV and tag strings.
pub const SEGMENT_SEPARATOR: char = ':';

/// Encrypted fields of one record, with their nonces and tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CipherBundle {
    /// Hex ciphertext per field name. `BTreeMap` iterates in byte order.
    pub cipher_by_field: BTreeMap<String, String>,
    /// `:`-joined hex nonces, one per field in name order.
    pub iv_joined: String,
    /// `:`-joined hex tags, one per field in name order.
    pub tag_joined: String,
}

impl CipherBundle {
    /// Returns the number of encrypted fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cipher_by_field.len()
    }

    /// Returns `true` if the bundle carries no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cipher_by_field.is_empty()
    }

    /// Returns the IV and tag segments, checked against the field count.
    ///
    /// # Errors
    ///
    /// Returns `Error::Alignment` if either segment count differs from the
    /// number of fields.
    pub fn aligned_segments(&self) -> Result<(Vec<&str>, Vec<&str>), Error> {
        aligned_segments(self.cipher_by_field.len(), &self.iv_joined, &self.tag_joined)
    }
}

/// Splits `iv_joined` and `tag_joined` and checks both against `fields`.
///
/// # Errors
///
/// Returns `Error::Alignment` on any count mismatch.
pub fn aligned_segments<'a>(
    fields: usize,
    iv_joined: &'a str,
    tag_joined: &'a str,
) -> Result<(Vec<&'a str>, Vec<&'a str>), Error> {
    let ivs = split_segments(iv_joined);
    let tags = split_segments(tag_joined);

    if ivs.len() != fields || tags.len() != fields {
        return Err(Error::Alignment { fields, ivs: ivs.len(), tags: tags.len() });
    }

    Ok((ivs, tags))
}

/// Splits a joined segment string. The empty string has zero segments.
#[must_use]
pub fn split_segments(joined: &str) -> Vec<&str> {
    if joined.is_empty() {
        return Vec::new();
    }
    joined.split(SEGMENT_SEPARATOR).collect()
}

/// Joins hex segments with [`SEGMENT_SEPARATOR`].
#[must_use]
pub fn join_segments<S: AsRef<str>>(segments: &[S]) -> String {
    let mut joined = String::new();
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            joined.push(SEGMENT_SEPARATOR);
        }
        joined.push_str(segment.as_ref());
    }
    joined
}
