//! # `Folio`
//!
//! Storage-side building blocks for a document platform: field-level
//! authenticated encryption of sensitive record attributes, and contiguous
//! ordering of sibling records under a uniqueness constraint.
//!
//! ## Features
//!
//! - Per-record, per-field key derivation from a single root secret
//! - AEAD encryption (AES-256-GCM, ChaCha20-Poly1305) bound to record and field
//! - Storable cipher bundles with `:`-joined IVs and tags
//! - Batch decryption that skips tampered records
//! - Transactional sibling reindexing without transient order collisions
//!
//! ## Example
//!
//! ```rust,ignore
//! use folio::prelude::*;
//!
//! let codec = Settings::from_env()?.into_codec();
//! let id = RecordId::generate();
//!
//! let fields = FieldMap::from_pairs([("email", "a@b.com"), ("nom", "Alice")])?;
//! let bundle = codec.encrypt_record(&fields, &id)?;
//! let plaintext = codec.decrypt_record(&bundle, &id)?;
//!
//! let reindexer = Reindexer::new(MemorySiblingStore::new());
//! reindexer.insert("document-1", &id, 1)?;
//! ```

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod bundle;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod fields;
pub mod kdf;
pub mod memory;
pub mod reindex;
pub mod secret;

pub mod prelude {
    //! Convenience re-exports for common use.
    pub use crate::bundle::CipherBundle;
    pub use crate::codec::{BatchReport, CipherMode, FieldCodec};
    pub use crate::config::{Settings, StoreSettings};
    pub use crate::context::{FieldContext, RecordId};
    pub use crate::error::{Error, StoreError};
    pub use crate::fields::FieldMap;
    pub use crate::memory::MemorySiblingStore;
    pub use crate::reindex::{insert_at, remove_at, Reindexer, Sibling, SiblingStore, SiblingTx};
    pub use crate::secret::RootSecret;
}
