//! Key derivation for record and field keys.
//!
//! Keys form a two-level hierarchy:
//!
//! ```text
//! entity_key = SHAKE256(root_secret || record_id)            (32 bytes)
//! field_key  = HKDF-SHA256(ikm = hex(entity_key), info = field_name)
//! ```
//!
//! Neither key is ever persisted; both are zeroized on drop.

use hkdf::Hkdf;
use secrecy::{ExposeSecret, SecretVec};
use sha2::Sha256;
use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::Shake256;
use zeroize::Zeroizing;

use crate::context::RecordId;
use crate::error::Error;
use crate::secret::RootSecret;

/// Entity key size in bytes (256 bits).
pub const ENTITY_KEY_SIZE: usize = 32;

/// Field key size in bytes (256 bits), matching the AEAD key size.
pub const FIELD_KEY_SIZE: usize = 32;

/// Key scoped to a single record.
pub struct EntityKey(SecretVec<u8>);

impl EntityKey {
    /// Returns the raw key bytes.
    #[must_use]
    pub fn expose(&self) -> &[u8] {
        self.0.expose_secret()
    }
}

/// Derives the entity key of `record_id` from the root secret.
#[must_use]
pub fn derive_entity_key(root: &RootSecret, record_id: &RecordId) -> EntityKey {
    let key = shake256(&[root.expose(), record_id.as_str().as_bytes()]);
    EntityKey(SecretVec::new(key.to_vec()))
}

/// Derives the key for `field_name` from an entity key.
///
/// # Errors
///
/// Returns `Error::KeyDerivation` if HKDF expansion fails.
pub fn derive_field_key(entity: &EntityKey, field_name: &str) -> Result<SecretVec<u8>, Error> {
    let entity_hex = Zeroizing::new(hex::encode(entity.expose()));
    let hkdf = Hkdf::<Sha256>::new(None, entity_hex.as_bytes());

    let mut key = vec![0u8; FIELD_KEY_SIZE];
    hkdf.expand(field_name.as_bytes(), &mut key).map_err(|_| Error::KeyDerivation)?;

    Ok(SecretVec::new(key))
}

fn shake256(parts: &[&[u8]]) -> Zeroizing<[u8; ENTITY_KEY_SIZE]> {
    let mut hasher = Shake256::default();
    for part in parts {
        hasher.update(part);
    }
    let mut out = Zeroizing::new([0u8; ENTITY_KEY_SIZE]);
    hasher.finalize_xof().read(&mut out[..]);
    out
}
