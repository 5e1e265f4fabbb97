//! Contiguous ordering of sibling records.
//!
//! Siblings under one parent scope carry orders `1..=N` with no gaps and no
//! duplicates, and the storage layer enforces uniqueness of `(scope, order)`.
//! Shifting a run of siblings by one in place would briefly give two siblings
//! the same order, so every shift is done in two phases:
//!
//! 1. each affected sibling moves to the temporary order `-order`;
//! 2. each temporary order is rewritten to its final value.
//!
//! Live orders are always positive, so the negated range can never collide
//! with an untouched sibling, whatever the sibling count.

use tracing::debug;

use crate::context::RecordId;
use crate::error::{Error, StoreError};

/// A sibling record and its position within its scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sibling {
    /// Record id of the sibling.
    pub id: RecordId,
    /// 1-based position within the scope.
    pub order: u32,
}

/// Storage that can open a transaction over one parent scope.
pub trait SiblingStore {
    /// Transaction type returned by [`begin`](Self::begin).
    type Tx<'a>: SiblingTx
    where
        Self: 'a;

    /// Opens a transaction on `scope`.
    ///
    /// The transaction must hold an exclusive lock on the scope until it is
    /// committed or dropped, so that concurrent operations never plan shifts
    /// against a stale set of siblings.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Backend` if the transaction cannot be started.
    fn begin(&self, scope: &str) -> Result<Self::Tx<'_>, StoreError>;
}

/// Read/write surface of a transaction scoped to one parent scope.
///
/// Dropping a transaction without calling [`commit`](Self::commit) must roll
/// back every change made through it.
pub trait SiblingTx {
    /// Returns all orders `>= min`, highest first.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the read fails.
    fn orders_from(&mut self, min: i64) -> Result<Vec<i64>, StoreError>;

    /// Returns the highest order in the scope, if any sibling exists.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the read fails.
    fn max_order(&mut self) -> Result<Option<i64>, StoreError>;

    /// Moves the sibling at `from` to `to`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if `to` is taken and
    /// `StoreError::MissingOrder` if nothing is at `from`.
    fn set_order(&mut self, from: i64, to: i64) -> Result<(), StoreError>;

    /// Adds a sibling at `order`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if `order` is taken and
    /// `StoreError::DuplicateRecord` if `id` already exists.
    fn insert(&mut self, id: &RecordId, order: i64) -> Result<(), StoreError>;

    /// Deletes the sibling at `order` and returns its id.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the write fails.
    fn delete(&mut self, order: i64) -> Result<Option<RecordId>, StoreError>;

    /// Returns all siblings, lowest order first.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the read fails.
    fn siblings(&mut self) -> Result<Vec<Sibling>, StoreError>;

    /// Makes every change of this transaction durable.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the commit fails; nothing is applied.
    fn commit(self) -> Result<(), StoreError>;
}

/// Opens a gap at `position` for a new sibling.
///
/// Every sibling at `position` or above moves up by one. A position past the
/// end is clamped to `N + 1`, which needs no shifting. The caller writes the
/// new sibling at the returned position within the same transaction.
///
/// # Errors
///
/// Returns `Error::InvalidPosition` for position `0` and
/// `Error::Transaction` if the store fails.
pub fn insert_at<T: SiblingTx + ?Sized>(tx: &mut T, position: u32) -> Result<u32, Error> {
    if position == 0 {
        return Err(Error::InvalidPosition(position));
    }

    let count = tx.max_order()?.unwrap_or(0);
    let target = i64::from(position).min(count + 1);

    let affected = tx.orders_from(target)?;
    shift(tx, &affected, 1)?;

    debug!(position = target, shifted = affected.len(), "reserved sibling position");
    to_position(target)
}

/// Deletes the sibling at `position` and closes the gap.
///
/// Every sibling above `position` moves down by one.
///
/// # Errors
///
/// Returns `Error::InvalidPosition` for position `0`,
/// `Error::PositionNotFound` if no sibling is at `position` and
/// `Error::Transaction` if the store fails.
pub fn remove_at<T: SiblingTx + ?Sized>(tx: &mut T, position: u32) -> Result<RecordId, Error> {
    if position == 0 {
        return Err(Error::InvalidPosition(position));
    }

    let id = tx.delete(i64::from(position))?.ok_or(Error::PositionNotFound(position))?;

    let affected = tx.orders_from(i64::from(position) + 1)?;
    shift(tx, &affected, -1)?;

    debug!(position, shifted = affected.len(), "removed sibling");
    Ok(id)
}

/// Shifts `affected` (highest first) by `delta` through negated temporaries.
fn shift<T: SiblingTx + ?Sized>(tx: &mut T, affected: &[i64], delta: i64) -> Result<(), StoreError> {
    for &order in affected {
        tx.set_order(order, -order)?;
    }

    // Finalize moving away from the untouched siblings: top-down when
    // shifting up, bottom-up when shifting down.
    if delta > 0 {
        for &order in affected {
            tx.set_order(-order, order + delta)?;
        }
    } else {
        for &order in affected.iter().rev() {
            tx.set_order(-order, order + delta)?;
        }
    }

    Ok(())
}

fn to_position(order: i64) -> Result<u32, Error> {
    u32::try_from(order)
        .map_err(|_| Error::Transaction(StoreError::Backend(format!("order out of range: {order}"))))
}

/// Transactional sibling ordering over a [`SiblingStore`].
///
/// Each operation runs in its own transaction: it commits when the whole
/// shift succeeds and rolls back otherwise.
///
/// # Example
///
/// ```
/// use folio::prelude::*;
///
/// # fn main() -> Result<(), folio::error::Error> {
/// let reindexer = Reindexer::new(MemorySiblingStore::new());
/// let doc = "document-1";
///
/// let a = RecordId::from("A");
/// let b = RecordId::from("B");
/// reindexer.insert(doc, &a, 1)?;
/// reindexer.insert(doc, &b, 1)?;
///
/// let orders: Vec<_> = reindexer.siblings(doc)?.into_iter().map(|s| (s.id, s.order)).collect();
/// assert_eq!(orders, [(b, 1), (a, 2)]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Reindexer<S: SiblingStore> {
    store: S,
}

impl<S: SiblingStore> Reindexer<S> {
    /// Creates a reindexer over `store`.
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns the underlying store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Inserts `id` at `position` in `scope`, shifting later siblings up.
    ///
    /// Returns the position actually taken (clamped to `N + 1`).
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidPosition` for position `0` and
    /// `Error::Transaction` if the store fails; nothing is changed then.
    pub fn insert(&self, scope: &str, id: &RecordId, position: u32) -> Result<u32, Error> {
        let mut tx = self.store.begin(scope)?;
        let taken = insert_at(&mut tx, position)?;
        tx.insert(id, i64::from(taken))?;
        tx.commit()?;
        Ok(taken)
    }

    /// Removes the sibling at `position` in `scope`, shifting later siblings down.
    ///
    /// # Errors
    ///
    /// Returns `Error::PositionNotFound` if the position is empty and
    /// `Error::Transaction` if the store fails; nothing is changed then.
    pub fn remove(&self, scope: &str, position: u32) -> Result<RecordId, Error> {
        let mut tx = self.store.begin(scope)?;
        let id = remove_at(&mut tx, position)?;
        tx.commit()?;
        Ok(id)
    }

    /// Moves the sibling at `from` to `to` within `scope`.
    ///
    /// Returns the position actually taken (clamped to `N`).
    ///
    /// # Errors
    ///
    /// Same as [`remove`](Self::remove) and [`insert`](Self::insert).
    pub fn move_to(&self, scope: &str, from: u32, to: u32) -> Result<u32, Error> {
        if to == 0 {
            return Err(Error::InvalidPosition(to));
        }

        let mut tx = self.store.begin(scope)?;
        let id = remove_at(&mut tx, from)?;
        let taken = insert_at(&mut tx, to)?;
        tx.insert(&id, i64::from(taken))?;
        tx.commit()?;
        Ok(taken)
    }

    /// Returns the siblings of `scope`, lowest order first.
    ///
    /// # Errors
    ///
    /// Returns `Error::Transaction` if the store fails.
    pub fn siblings(&self, scope: &str) -> Result<Vec<Sibling>, Error> {
        let mut tx = self.store.begin(scope)?;
        let siblings = tx.siblings()?;
        tx.commit()?;
        Ok(siblings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemorySiblingStore, MemoryTx};
    use proptest::prelude::*;
    use std::cell::Cell;

    const DOC: &str = "document-1";

    fn ids(reindexer: &Reindexer<impl SiblingStore>, scope: &str) -> Vec<(String, u32)> {
        reindexer
            .siblings(scope)
            .unwrap()
            .into_iter()
            .map(|s| (s.id.to_string(), s.order))
            .collect()
    }

    fn abc() -> Reindexer<MemorySiblingStore> {
        let reindexer = Reindexer::new(MemorySiblingStore::new());
        for (i, name) in ["A", "B", "C"].iter().enumerate() {
            reindexer.insert(DOC, &RecordId::from(*name), u32::try_from(i + 1).unwrap()).unwrap();
        }
        reindexer
    }

    fn pairs(items: &[(&str, u32)]) -> Vec<(String, u32)> {
        items.iter().map(|(id, order)| ((*id).to_string(), *order)).collect()
    }

    #[test]
    fn test_insert_then_remove_scenario() {
        let reindexer = abc();

        let taken = reindexer.insert(DOC, &RecordId::from("D"), 2).unwrap();
        assert_eq!(taken, 2);
        assert_eq!(ids(&reindexer, DOC), pairs(&[("A", 1), ("D", 2), ("B", 3), ("C", 4)]));

        let removed = reindexer.remove(DOC, 2).unwrap();
        assert_eq!(removed, RecordId::from("D"));
        assert_eq!(ids(&reindexer, DOC), pairs(&[("A", 1), ("B", 2), ("C", 3)]));
    }

    #[test]
    fn test_insert_at_front() {
        let reindexer = abc();
        reindexer.insert(DOC, &RecordId::from("Z"), 1).unwrap();
        assert_eq!(ids(&reindexer, DOC), pairs(&[("Z", 1), ("A", 2), ("B", 3), ("C", 4)]));
    }

    #[test]
    fn test_insert_past_end_is_clamped() {
        let reindexer = abc();
        let taken = reindexer.insert(DOC, &RecordId::from("D"), 99).unwrap();
        assert_eq!(taken, 4);
        assert_eq!(ids(&reindexer, DOC), pairs(&[("A", 1), ("B", 2), ("C", 3), ("D", 4)]));
    }

    #[test]
    fn test_insert_into_empty_scope() {
        let reindexer = Reindexer::new(MemorySiblingStore::new());
        assert!(reindexer.siblings(DOC).unwrap().is_empty());

        let taken = reindexer.insert(DOC, &RecordId::from("A"), 5).unwrap();
        assert_eq!(taken, 1);
    }

    #[test]
    fn test_remove_last_needs_no_shift() {
        let reindexer = abc();
        reindexer.remove(DOC, 3).unwrap();
        assert_eq!(ids(&reindexer, DOC), pairs(&[("A", 1), ("B", 2)]));
    }

    #[test]
    fn test_position_zero_rejected() {
        let reindexer = abc();
        assert!(matches!(
            reindexer.insert(DOC, &RecordId::from("D"), 0),
            Err(Error::InvalidPosition(0))
        ));
        assert!(matches!(reindexer.remove(DOC, 0), Err(Error::InvalidPosition(0))));
    }

    #[test]
    fn test_remove_missing_position() {
        let reindexer = abc();
        assert!(matches!(reindexer.remove(DOC, 4), Err(Error::PositionNotFound(4))));
        assert_eq!(ids(&reindexer, DOC), pairs(&[("A", 1), ("B", 2), ("C", 3)]));
    }

    #[test]
    fn test_duplicate_record_rolls_back_shift() {
        let reindexer = abc();
        let result = reindexer.insert(DOC, &RecordId::from("B"), 1);
        assert!(matches!(result, Err(Error::Transaction(StoreError::DuplicateRecord(_)))));
        assert_eq!(ids(&reindexer, DOC), pairs(&[("A", 1), ("B", 2), ("C", 3)]));
    }

    #[test]
    fn test_move_down_and_up() {
        let reindexer = abc();

        assert_eq!(reindexer.move_to(DOC, 1, 3).unwrap(), 3);
        assert_eq!(ids(&reindexer, DOC), pairs(&[("B", 1), ("C", 2), ("A", 3)]));

        assert_eq!(reindexer.move_to(DOC, 3, 1).unwrap(), 1);
        assert_eq!(ids(&reindexer, DOC), pairs(&[("A", 1), ("B", 2), ("C", 3)]));

        assert_eq!(reindexer.move_to(DOC, 2, 50).unwrap(), 3);
        assert_eq!(ids(&reindexer, DOC), pairs(&[("A", 1), ("C", 2), ("B", 3)]));
    }

    #[test]
    fn test_scopes_are_independent() {
        let reindexer = abc();
        reindexer.insert("document-2", &RecordId::from("X"), 1).unwrap();
        reindexer.remove(DOC, 1).unwrap();

        assert_eq!(ids(&reindexer, "document-2"), pairs(&[("X", 1)]));
        assert_eq!(ids(&reindexer, DOC), pairs(&[("B", 1), ("C", 2)]));
    }

    // Fails the n-th `set_order` call to simulate a crash mid-shift.
    struct FlakyStore {
        inner: MemorySiblingStore,
        fail_at: Cell<Option<usize>>,
    }

    struct FlakyTx<'a> {
        inner: MemoryTx<'a>,
        remaining: &'a Cell<Option<usize>>,
    }

    impl SiblingStore for FlakyStore {
        type Tx<'a> = FlakyTx<'a>;

        fn begin(&self, scope: &str) -> Result<Self::Tx<'_>, StoreError> {
            Ok(FlakyTx { inner: self.inner.begin(scope)?, remaining: &self.fail_at })
        }
    }

    impl SiblingTx for FlakyTx<'_> {
        fn orders_from(&mut self, min: i64) -> Result<Vec<i64>, StoreError> {
            self.inner.orders_from(min)
        }

        fn max_order(&mut self) -> Result<Option<i64>, StoreError> {
            self.inner.max_order()
        }

        fn set_order(&mut self, from: i64, to: i64) -> Result<(), StoreError> {
            match self.remaining.get() {
                Some(0) => return Err(StoreError::Backend("injected failure".to_string())),
                Some(n) => self.remaining.set(Some(n - 1)),
                None => {}
            }
            self.inner.set_order(from, to)
        }

        fn insert(&mut self, id: &RecordId, order: i64) -> Result<(), StoreError> {
            self.inner.insert(id, order)
        }

        fn delete(&mut self, order: i64) -> Result<Option<RecordId>, StoreError> {
            self.inner.delete(order)
        }

        fn siblings(&mut self) -> Result<Vec<Sibling>, StoreError> {
            self.inner.siblings()
        }

        fn commit(self) -> Result<(), StoreError> {
            self.inner.commit()
        }
    }

    #[test]
    fn test_failure_mid_shift_rolls_back() {
        let flaky = FlakyStore { inner: MemorySiblingStore::new(), fail_at: Cell::new(None) };
        let reindexer = Reindexer::new(flaky);
        for (i, name) in ["A", "B", "C"].iter().enumerate() {
            reindexer.insert(DOC, &RecordId::from(*name), u32::try_from(i + 1).unwrap()).unwrap();
        }

        // Two of the four moves succeed before the failure.
        reindexer.store().fail_at.set(Some(2));
        let result = reindexer.insert(DOC, &RecordId::from("D"), 2);
        assert!(matches!(result, Err(Error::Transaction(StoreError::Backend(_)))));

        reindexer.store().fail_at.set(Some(3));
        assert!(reindexer.remove(DOC, 1).is_err());

        reindexer.store().fail_at.set(None);
        assert_eq!(ids(&reindexer, DOC), pairs(&[("A", 1), ("B", 2), ("C", 3)]));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(u32),
        Remove(u32),
        Move(u32, u32),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1u32..12).prop_map(Op::Insert),
            (1u32..12).prop_map(Op::Remove),
            (1u32..12, 1u32..12).prop_map(|(a, b)| Op::Move(a, b)),
        ]
    }

    proptest! {
        #[test]
        fn prop_orders_stay_contiguous(ops in proptest::collection::vec(op(), 1..40)) {
            let reindexer = Reindexer::new(MemorySiblingStore::new());
            let mut next_id = 0u32;

            for op in ops {
                let count = reindexer.siblings(DOC).unwrap().len();
                let occupied = |p: u32| p >= 1 && usize::try_from(p).unwrap() <= count;
                match op {
                    Op::Insert(p) => {
                        next_id += 1;
                        reindexer.insert(DOC, &RecordId::new(format!("r{next_id}")), p).unwrap();
                    }
                    Op::Remove(p) => {
                        let result = reindexer.remove(DOC, p);
                        prop_assert_eq!(result.is_ok(), occupied(p));
                    }
                    Op::Move(from, to) => {
                        let result = reindexer.move_to(DOC, from, to);
                        prop_assert_eq!(result.is_ok(), occupied(from));
                    }
                }

                let orders: Vec<u32> =
                    reindexer.siblings(DOC).unwrap().into_iter().map(|s| s.order).collect();
                let expected: Vec<u32> = (1..=u32::try_from(orders.len()).unwrap()).collect();
                prop_assert_eq!(orders, expected);
            }
        }
    }
}
