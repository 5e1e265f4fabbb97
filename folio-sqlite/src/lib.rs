//! SQLite storage backend for `Folio`.
//!
//! Stores sibling orders in a table with a `UNIQUE(scope_id, position)`
//! constraint, so the reindexer's two-phase shifting is checked by the
//! database itself, and keeps encrypted cipher bundles next to them.
//!
//! ```text
//! siblings(scope_id, id, position)   PRIMARY KEY (scope_id, id)
//!                                    UNIQUE (scope_id, position)
//! bundles(record_id, cipher, iv, tag)
//! ```

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use std::path::Path;

use folio::bundle::CipherBundle;
use folio::context::RecordId;
use folio::error::StoreError;
use folio::reindex::{Sibling, SiblingStore, SiblingTx};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use thiserror::Error;
use tracing::{debug, warn};

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS siblings (
    scope_id TEXT NOT NULL,
    id TEXT NOT NULL,
    position INTEGER NOT NULL,
    PRIMARY KEY (scope_id, id),
    UNIQUE (scope_id, position)
);

CREATE TABLE IF NOT EXISTS bundles (
    record_id TEXT PRIMARY KEY,
    cipher TEXT NOT NULL,
    iv TEXT NOT NULL,
    tag TEXT NOT NULL
);
";

/// Errors from the bundle table.
#[derive(Error, Debug)]
pub enum SqliteError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SqliteError>;

/// SQLite-backed sibling and bundle store.
///
/// The connection sits behind a mutex; a sibling transaction holds it from
/// `BEGIN IMMEDIATE` until commit or rollback, which serializes writers.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) a database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory or database cannot be
    /// created, or the schema cannot be applied.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        debug!(path = %path.display(), "opening sqlite store");
        Self::from_connection(Connection::open(path)?)
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be applied.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Stores `bundle` for `record_id`, replacing any previous one.
    ///
    /// Runs as its own statement; use [`SqliteTx::save_bundle`] to write the
    /// bundle together with sibling changes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save_bundle(&self, record_id: &RecordId, bundle: &CipherBundle) -> Result<()> {
        write_bundle(&self.conn.lock(), record_id, bundle)
    }

    /// Loads the bundle stored for `record_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the stored cipher map is not
    /// valid JSON.
    pub fn load_bundle(&self, record_id: &RecordId) -> Result<Option<CipherBundle>> {
        read_bundle(&self.conn.lock(), record_id)
    }

    /// Deletes the bundle for `record_id`. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn delete_bundle(&self, record_id: &RecordId) -> Result<bool> {
        remove_bundle(&self.conn.lock(), record_id)
    }

    /// Loads every stored bundle, ordered by record id.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or a stored cipher map is not
    /// valid JSON.
    pub fn bundles(&self) -> Result<Vec<(RecordId, CipherBundle)>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT record_id, cipher, iv, tag FROM bundles ORDER BY record_id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut bundles = Vec::new();
        for row in rows {
            let (record_id, cipher, iv_joined, tag_joined) = row?;
            bundles.push((
                RecordId::new(record_id),
                CipherBundle { cipher_by_field: serde_json::from_str(&cipher)?, iv_joined, tag_joined },
            ));
        }
        Ok(bundles)
    }
}

fn write_bundle(conn: &Connection, record_id: &RecordId, bundle: &CipherBundle) -> Result<()> {
    let cipher = serde_json::to_string(&bundle.cipher_by_field)?;
    conn.execute(
        "INSERT OR REPLACE INTO bundles (record_id, cipher, iv, tag) VALUES (?1, ?2, ?3, ?4)",
        params![record_id.as_str(), cipher, bundle.iv_joined, bundle.tag_joined],
    )?;
    Ok(())
}

fn read_bundle(conn: &Connection, record_id: &RecordId) -> Result<Option<CipherBundle>> {
    let row = conn
        .query_row(
            "SELECT cipher, iv, tag FROM bundles WHERE record_id = ?1",
            params![record_id.as_str()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;

    row.map(|(cipher, iv_joined, tag_joined)| {
        Ok(CipherBundle { cipher_by_field: serde_json::from_str(&cipher)?, iv_joined, tag_joined })
    })
    .transpose()
}

fn remove_bundle(conn: &Connection, record_id: &RecordId) -> Result<bool> {
    let deleted =
        conn.execute("DELETE FROM bundles WHERE record_id = ?1", params![record_id.as_str()])?;
    Ok(deleted > 0)
}

impl SiblingStore for SqliteStore {
    type Tx<'a> = SqliteTx<'a>;

    fn begin(&self, scope: &str) -> std::result::Result<Self::Tx<'_>, StoreError> {
        let conn = self.conn.lock();
        conn.execute_batch("BEGIN IMMEDIATE").map_err(backend)?;
        Ok(SqliteTx { conn, scope: scope.to_owned(), finished: false })
    }
}

/// Transaction over one scope of a [`SqliteStore`].
///
/// Rolled back on drop unless committed.
pub struct SqliteTx<'a> {
    conn: MutexGuard<'a, Connection>,
    scope: String,
    finished: bool,
}

impl SqliteTx<'_> {
    /// Stores `bundle` for `record_id` inside this transaction.
    ///
    /// The write becomes visible on [`commit`](SiblingTx::commit) and is
    /// discarded with the rest of the transaction otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save_bundle(&mut self, record_id: &RecordId, bundle: &CipherBundle) -> Result<()> {
        write_bundle(&self.conn, record_id, bundle)
    }

    /// Loads the bundle for `record_id`, including uncommitted writes of this
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the stored cipher map is not
    /// valid JSON.
    pub fn load_bundle(&mut self, record_id: &RecordId) -> Result<Option<CipherBundle>> {
        read_bundle(&self.conn, record_id)
    }

    /// Deletes the bundle for `record_id` inside this transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn delete_bundle(&mut self, record_id: &RecordId) -> Result<bool> {
        remove_bundle(&self.conn, record_id)
    }
}

impl SiblingTx for SqliteTx<'_> {
    fn orders_from(&mut self, min: i64) -> std::result::Result<Vec<i64>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT position FROM siblings WHERE scope_id = ?1 AND position >= ?2 \
                 ORDER BY position DESC",
            )
            .map_err(backend)?;
        let rows = stmt
            .query_map(params![self.scope, min], |row| row.get(0))
            .map_err(backend)?;
        rows.collect::<rusqlite::Result<Vec<i64>>>().map_err(backend)
    }

    fn max_order(&mut self) -> std::result::Result<Option<i64>, StoreError> {
        self.conn
            .query_row(
                "SELECT MAX(position) FROM siblings WHERE scope_id = ?1",
                params![self.scope],
                |row| row.get(0),
            )
            .map_err(backend)
    }

    fn set_order(&mut self, from: i64, to: i64) -> std::result::Result<(), StoreError> {
        let updated = self
            .conn
            .execute(
                "UPDATE siblings SET position = ?3 WHERE scope_id = ?1 AND position = ?2",
                params![self.scope, from, to],
            )
            .map_err(|e| constraint(e, StoreError::Conflict { order: to }))?;

        if updated == 0 {
            return Err(StoreError::MissingOrder(from));
        }
        Ok(())
    }

    fn insert(&mut self, id: &RecordId, order: i64) -> std::result::Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO siblings (scope_id, id, position) VALUES (?1, ?2, ?3)",
                params![self.scope, id.as_str(), order],
            )
            .map_err(|e| {
                if is_primary_key_violation(&e) {
                    StoreError::DuplicateRecord(id.to_string())
                } else {
                    constraint(e, StoreError::Conflict { order })
                }
            })?;
        Ok(())
    }

    fn delete(&mut self, order: i64) -> std::result::Result<Option<RecordId>, StoreError> {
        let id: Option<String> = self
            .conn
            .query_row(
                "DELETE FROM siblings WHERE scope_id = ?1 AND position = ?2 RETURNING id",
                params![self.scope, order],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend)?;
        Ok(id.map(RecordId::new))
    }

    fn siblings(&mut self) -> std::result::Result<Vec<Sibling>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT id, position FROM siblings WHERE scope_id = ?1 ORDER BY position",
            )
            .map_err(backend)?;
        let rows = stmt
            .query_map(params![self.scope], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(backend)?;

        let mut siblings = Vec::new();
        for row in rows {
            let (id, position) = row.map_err(backend)?;
            let order = u32::try_from(position).map_err(|_| {
                StoreError::Backend(format!("order out of range in committed scope: {position}"))
            })?;
            siblings.push(Sibling { id: RecordId::new(id), order });
        }
        Ok(siblings)
    }

    fn commit(mut self) -> std::result::Result<(), StoreError> {
        self.conn.execute_batch("COMMIT").map_err(backend)?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for SqliteTx<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.conn.execute_batch("ROLLBACK") {
            warn!(scope = %self.scope, error = %e, "rollback failed");
        } else {
            debug!(scope = %self.scope, "sibling transaction rolled back");
        }
    }
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn constraint(e: rusqlite::Error, violation: StoreError) -> StoreError {
    if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) {
        violation
    } else {
        backend(e)
    }
}

fn is_primary_key_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}
