//! Field codec for record encryption and decryption.
//!
//! Every sensitive field of a record is sealed under its own key, derived
//! from the root secret, the record id and the field name, with a fresh
//! random nonce and the field context as associated data.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use aes_gcm::aead::{self, rand_core::RngCore, AeadInPlace, KeyInit, OsRng};
use aes_gcm::Aes256Gcm;
use chacha20poly1305::ChaCha20Poly1305;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bundle::{aligned_segments, join_segments, CipherBundle};
use crate::context::{FieldContext, RecordId};
use crate::error::Error;
use crate::fields::FieldMap;
use crate::kdf::{derive_entity_key, derive_field_key};
use crate::secret::RootSecret;

/// Nonce size for both supported AEAD ciphers (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size for both supported AEAD ciphers (128 bits).
pub const TAG_SIZE: usize = 16;

/// AEAD cipher used to seal fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CipherMode {
    /// AES-256-GCM (default).
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
    /// ChaCha20-Poly1305.
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
}

impl Default for CipherMode {
    fn default() -> Self {
        Self::Aes256Gcm
    }
}

impl fmt::Display for CipherMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aes256Gcm => f.write_str("aes-256-gcm"),
            Self::ChaCha20Poly1305 => f.write_str("chacha20-poly1305"),
        }
    }
}

impl FromStr for CipherMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aes-256-gcm" => Ok(Self::Aes256Gcm),
            "chacha20-poly1305" => Ok(Self::ChaCha20Poly1305),
            other => Err(Error::Configuration(format!("unknown cipher mode: {other}"))),
        }
    }
}

/// Outcome of decrypting many records independently.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Records that decrypted and authenticated successfully.
    pub decrypted: Vec<(RecordId, FieldMap)>,
    /// Records that were skipped, with the reason.
    pub failed: Vec<(RecordId, Error)>,
}

/// Encrypts and decrypts the sensitive fields of records.
///
/// The codec holds nothing but the root secret and the cipher mode, so it is
/// cheap to clone and safe to share across threads.
///
/// # Example
///
/// ```
/// use folio::prelude::*;
///
/// # fn main() -> Result<(), folio::error::Error> {
/// let secret = RootSecret::new(b"correct horse battery staple".to_vec())?;
/// let codec = FieldCodec::new(secret, CipherMode::default());
///
/// let id = RecordId::from("uuid-1");
/// let fields = FieldMap::from_pairs([("email", "a@b.com"), ("nom", "Alice")])?;
///
/// let bundle = codec.encrypt_record(&fields, &id)?;
/// assert_eq!(codec.decrypt_record(&bundle, &id)?, fields);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct FieldCodec {
    root: Arc<RootSecret>,
    cipher_mode: CipherMode,
}

impl FieldCodec {
    /// Creates a codec over the given root secret.
    #[must_use]
    pub fn new(root: RootSecret, cipher_mode: CipherMode) -> Self {
        Self { root: Arc::new(root), cipher_mode }
    }

    /// Returns the cipher mode.
    #[must_use]
    pub const fn cipher_mode(&self) -> CipherMode {
        self.cipher_mode
    }

    /// Encrypts every field of `fields` for the record `record_id`.
    ///
    /// Fields are processed in name order; the IV and tag of each field are
    /// joined in that same order.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyDerivation` or `Error::Encryption` if a field
    /// cannot be sealed.
    pub fn encrypt_record(
        &self,
        fields: &FieldMap,
        record_id: &RecordId,
    ) -> Result<CipherBundle, Error> {
        let entity = derive_entity_key(&self.root, record_id);

        let mut cipher_by_field = BTreeMap::new();
        let mut ivs = Vec::with_capacity(fields.len());
        let mut tags = Vec::with_capacity(fields.len());

        for (name, plaintext) in fields.iter() {
            let key = derive_field_key(&entity, name)?;

            let mut nonce = [0u8; NONCE_SIZE];
            OsRng.fill_bytes(&mut nonce);

            let aad = FieldContext::new(record_id, name).aad();
            let (ciphertext, tag) = self
                .seal(key.expose_secret(), &nonce, &aad, plaintext.as_bytes())
                .ok_or_else(|| Error::Encryption { field: name.to_string() })?;

            cipher_by_field.insert(name.to_string(), hex::encode(ciphertext));
            ivs.push(hex::encode(nonce));
            tags.push(hex::encode(tag));
        }

        debug!(fields = fields.len(), mode = %self.cipher_mode, "sealed record fields");

        Ok(CipherBundle {
            cipher_by_field,
            iv_joined: join_segments(&ivs),
            tag_joined: join_segments(&tags),
        })
    }

    /// Decrypts a bundle produced by [`encrypt_record`](Self::encrypt_record).
    ///
    /// # Errors
    ///
    /// See [`decrypt_parts`](Self::decrypt_parts).
    pub fn decrypt_record(
        &self,
        bundle: &CipherBundle,
        record_id: &RecordId,
    ) -> Result<FieldMap, Error> {
        self.decrypt_parts(&bundle.cipher_by_field, record_id, &bundle.iv_joined, &bundle.tag_joined)
    }

    /// Decrypts the stored parts of a bundle.
    ///
    /// Nothing is returned unless every field authenticates.
    ///
    /// # Errors
    ///
    /// - `Error::Alignment` if the IV or tag segment count differs from the
    ///   number of fields; raised before any key is derived.
    /// - `Error::Integrity` naming the first field whose hex is malformed,
    ///   whose nonce or tag has the wrong length, or that fails
    ///   authentication.
    pub fn decrypt_parts(
        &self,
        cipher_by_field: &BTreeMap<String, String>,
        record_id: &RecordId,
        iv_joined: &str,
        tag_joined: &str,
    ) -> Result<FieldMap, Error> {
        let (ivs, tags) = aligned_segments(cipher_by_field.len(), iv_joined, tag_joined)?;

        let entity = derive_entity_key(&self.root, record_id);
        let mut fields = FieldMap::new();

        // BTreeMap iteration is byte-lexicographic, the order used when sealing.
        for ((name, cipher_hex), (iv_hex, tag_hex)) in
            cipher_by_field.iter().zip(ivs.iter().zip(tags.iter()))
        {
            let integrity = || Error::Integrity { field: name.clone() };

            let ciphertext = hex::decode(cipher_hex).map_err(|_| integrity())?;
            let nonce = hex::decode(iv_hex).map_err(|_| integrity())?;
            let tag = hex::decode(tag_hex).map_err(|_| integrity())?;

            let key = derive_field_key(&entity, name)?;
            let aad = FieldContext::new(record_id, name).aad();

            let plaintext = self
                .open(key.expose_secret(), &nonce, &aad, &ciphertext, &tag)
                .ok_or_else(integrity)?;
            let plaintext = String::from_utf8(plaintext).map_err(|_| integrity())?;

            fields.insert(name.clone(), plaintext);
        }

        debug!(fields = fields.len(), mode = %self.cipher_mode, "opened record fields");

        Ok(fields)
    }

    /// Decrypts many records, skipping the ones that fail.
    ///
    /// A failing record never aborts the batch; it is logged and reported in
    /// [`BatchReport::failed`].
    pub fn decrypt_batch<'a, I>(&self, records: I) -> BatchReport
    where
        I: IntoIterator<Item = (&'a RecordId, &'a CipherBundle)>,
    {
        let mut report = BatchReport::default();

        for (record_id, bundle) in records {
            match self.decrypt_record(bundle, record_id) {
                Ok(fields) => report.decrypted.push((record_id.clone(), fields)),
                Err(err) => {
                    warn!(record_id = %record_id, error = %err, "skipping undecryptable record");
                    report.failed.push((record_id.clone(), err));
                }
            }
        }

        report
    }

    /// Re-encrypts a bundle under another codec.
    ///
    /// Used to move records to a new root secret or cipher mode.
    ///
    /// # Errors
    ///
    /// Returns any error from decrypting with `self` or encrypting with
    /// `target`.
    pub fn reseal(
        &self,
        bundle: &CipherBundle,
        record_id: &RecordId,
        target: &Self,
    ) -> Result<CipherBundle, Error> {
        let fields = self.decrypt_record(bundle, record_id)?;
        target.encrypt_record(&fields, record_id)
    }

    fn seal(
        &self,
        key: &[u8],
        nonce: &[u8; NONCE_SIZE],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Option<(Vec<u8>, Vec<u8>)> {
        match self.cipher_mode {
            CipherMode::Aes256Gcm => seal_with::<Aes256Gcm>(key, nonce, aad, plaintext),
            CipherMode::ChaCha20Poly1305 => {
                seal_with::<ChaCha20Poly1305>(key, nonce, aad, plaintext)
            }
        }
    }

    fn open(
        &self,
        key: &[u8],
        nonce: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
        tag: &[u8],
    ) -> Option<Vec<u8>> {
        if nonce.len() != NONCE_SIZE || tag.len() != TAG_SIZE {
            return None;
        }
        match self.cipher_mode {
            CipherMode::Aes256Gcm => open_with::<Aes256Gcm>(key, nonce, aad, ciphertext, tag),
            CipherMode::ChaCha20Poly1305 => {
                open_with::<ChaCha20Poly1305>(key, nonce, aad, ciphertext, tag)
            }
        }
    }
}

impl Clone for FieldCodec {
    fn clone(&self) -> Self {
        Self { root: Arc::clone(&self.root), cipher_mode: self.cipher_mode }
    }
}

// Callers check nonce and tag lengths; `from_slice` panics on a mismatch.
fn seal_with<C: KeyInit + AeadInPlace>(
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    plaintext: &[u8],
) -> Option<(Vec<u8>, Vec<u8>)> {
    let cipher = C::new_from_slice(key).ok()?;
    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(aead::Nonce::<C>::from_slice(nonce), aad, &mut buffer)
        .ok()?;
    Some((buffer, tag.to_vec()))
}

fn open_with<C: KeyInit + AeadInPlace>(
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
) -> Option<Vec<u8>> {
    let cipher = C::new_from_slice(key).ok()?;
    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            aead::Nonce::<C>::from_slice(nonce),
            aad,
            &mut buffer,
            aead::Tag::<C>::from_slice(tag),
        )
        .ok()?;
    Some(buffer)
}
