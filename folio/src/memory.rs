//! In-memory sibling store.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{lock_api::ArcMutexGuard, Mutex, RawMutex};

use crate::context::RecordId;
use crate::error::StoreError;
use crate::reindex::{Sibling, SiblingStore, SiblingTx};

type Scope = BTreeMap<i64, RecordId>;

/// Sibling store kept in process memory.
///
/// Each scope has its own lock, so operations on different scopes run
/// concurrently while operations on the same scope are serialized. A
/// transaction works on a private copy of its scope and publishes it on
/// commit.
#[derive(Debug, Default)]
pub struct MemorySiblingStore {
    scopes: Mutex<HashMap<String, Arc<Mutex<Scope>>>>,
}

impl MemorySiblingStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn scope(&self, scope: &str) -> Arc<Mutex<Scope>> {
        let mut scopes = self.scopes.lock();
        Arc::clone(scopes.entry(scope.to_owned()).or_default())
    }
}

impl SiblingStore for MemorySiblingStore {
    type Tx<'a> = MemoryTx<'a>;

    fn begin(&self, scope: &str) -> Result<Self::Tx<'_>, StoreError> {
        let guard = self.scope(scope).lock_arc();
        let staged = (*guard).clone();
        Ok(MemoryTx { store: self, scope: scope.to_owned(), guard, staged })
    }
}

/// Transaction over one scope of a [`MemorySiblingStore`].
///
/// Holds the scope lock until committed or dropped; dropping discards the
/// staged changes. A scope left empty is forgotten when its last user
/// finishes.
pub struct MemoryTx<'a> {
    store: &'a MemorySiblingStore,
    scope: String,
    guard: ArcMutexGuard<RawMutex, Scope>,
    staged: Scope,
}

impl Drop for MemoryTx<'_> {
    fn drop(&mut self) {
        if !self.guard.is_empty() {
            return;
        }

        // Only the map and this guard reference the scope, so no other
        // transaction can be waiting on its lock.
        let mut scopes = self.store.scopes.lock();
        let lock = ArcMutexGuard::mutex(&self.guard);
        let unused = scopes
            .get(&self.scope)
            .is_some_and(|entry| Arc::ptr_eq(entry, lock) && Arc::strong_count(lock) == 2);
        if unused {
            scopes.remove(&self.scope);
        }
    }
}

impl SiblingTx for MemoryTx<'_> {
    fn orders_from(&mut self, min: i64) -> Result<Vec<i64>, StoreError> {
        Ok(self.staged.range(min..).rev().map(|(order, _)| *order).collect())
    }

    fn max_order(&mut self) -> Result<Option<i64>, StoreError> {
        Ok(self.staged.keys().next_back().copied())
    }

    fn set_order(&mut self, from: i64, to: i64) -> Result<(), StoreError> {
        if self.staged.contains_key(&to) {
            return Err(StoreError::Conflict { order: to });
        }
        let id = self.staged.remove(&from).ok_or(StoreError::MissingOrder(from))?;
        self.staged.insert(to, id);
        Ok(())
    }

    fn insert(&mut self, id: &RecordId, order: i64) -> Result<(), StoreError> {
        if self.staged.contains_key(&order) {
            return Err(StoreError::Conflict { order });
        }
        if self.staged.values().any(|existing| existing == id) {
            return Err(StoreError::DuplicateRecord(id.to_string()));
        }
        self.staged.insert(order, id.clone());
        Ok(())
    }

    fn delete(&mut self, order: i64) -> Result<Option<RecordId>, StoreError> {
        Ok(self.staged.remove(&order))
    }

    fn siblings(&mut self) -> Result<Vec<Sibling>, StoreError> {
        self.staged
            .iter()
            .map(|(order, id)| {
                let order = u32::try_from(*order).map_err(|_| {
                    StoreError::Backend(format!("order out of range in committed scope: {order}"))
                })?;
                Ok(Sibling { id: id.clone(), order })
            })
            .collect()
    }

    fn commit(mut self) -> Result<(), StoreError> {
        *self.guard = std::mem::take(&mut self.staged);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reindex::Reindexer;
    use std::thread;

    #[test]
    fn test_set_order_enforces_uniqueness() {
        let store = MemorySiblingStore::new();
        let mut tx = store.begin("doc").unwrap();
        tx.insert(&RecordId::from("A"), 1).unwrap();
        tx.insert(&RecordId::from("B"), 2).unwrap();

        assert!(matches!(tx.set_order(1, 2), Err(StoreError::Conflict { order: 2 })));
        assert!(matches!(tx.set_order(5, 6), Err(StoreError::MissingOrder(5))));
        assert!(matches!(tx.insert(&RecordId::from("C"), 2), Err(StoreError::Conflict { .. })));
        assert!(matches!(
            tx.insert(&RecordId::from("A"), 3),
            Err(StoreError::DuplicateRecord(_))
        ));
    }

    #[test]
    fn test_uncommitted_changes_are_discarded() {
        let store = MemorySiblingStore::new();
        {
            let mut tx = store.begin("doc").unwrap();
            tx.insert(&RecordId::from("A"), 1).unwrap();
        }
        let mut tx = store.begin("doc").unwrap();
        assert!(tx.siblings().unwrap().is_empty());
    }

    #[test]
    fn test_commit_publishes_changes() {
        let store = MemorySiblingStore::new();
        let mut tx = store.begin("doc").unwrap();
        tx.insert(&RecordId::from("A"), 1).unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin("doc").unwrap();
        assert_eq!(tx.orders_from(1).unwrap(), [1]);
        assert_eq!(tx.max_order().unwrap(), Some(1));
    }

    #[test]
    fn test_empty_scopes_are_forgotten() {
        let store = MemorySiblingStore::new();
        {
            let mut tx = store.begin("unknown").unwrap();
            assert!(tx.siblings().unwrap().is_empty());
        }
        assert!(store.scopes.lock().is_empty());

        let reindexer = Reindexer::new(store);
        reindexer.insert("doc", &RecordId::from("A"), 1).unwrap();
        assert_eq!(reindexer.store().scopes.lock().len(), 1);

        reindexer.remove("doc", 1).unwrap();
        assert!(reindexer.store().scopes.lock().is_empty());
    }

    #[test]
    fn test_scope_in_use_is_kept() {
        let store = MemorySiblingStore::new();
        let held = store.scope("doc");
        {
            let _tx = store.begin("doc").unwrap();
        }
        let scopes = store.scopes.lock();
        assert!(scopes.get("doc").is_some_and(|entry| Arc::ptr_eq(entry, &held)));
    }

    #[test]
    fn test_orders_from_is_descending() {
        let store = MemorySiblingStore::new();
        let mut tx = store.begin("doc").unwrap();
        for (order, name) in [(1, "A"), (2, "B"), (3, "C"), (4, "D")] {
            tx.insert(&RecordId::from(name), order).unwrap();
        }
        assert_eq!(tx.orders_from(2).unwrap(), [4, 3, 2]);
        assert!(tx.orders_from(5).unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_inserts_on_one_scope() {
        let reindexer = Arc::new(Reindexer::new(MemorySiblingStore::new()));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let reindexer = Arc::clone(&reindexer);
                thread::spawn(move || {
                    for i in 0..25 {
                        let id = RecordId::new(format!("t{t}-{i}"));
                        reindexer.insert("doc", &id, 1 + (i % 3)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let orders: Vec<u32> =
            reindexer.siblings("doc").unwrap().into_iter().map(|s| s.order).collect();
        assert_eq!(orders, (1..=200).collect::<Vec<u32>>());
    }
}
