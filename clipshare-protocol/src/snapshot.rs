//! Copy-on-write collections shared between tasks
//!
//! Readers never see a collection mid-update: every mutation clones the
//! current vector, edits the clone, and publishes it as a new `Arc` on a
//! `watch` channel. Writers are serialized by a small mutex so two
//! concurrent updates cannot lose each other's changes.

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

/// Immutable view of a collection at one point in time
pub type Snapshot<T> = Arc<Vec<T>>;

/// A vector published as whole-collection snapshots
#[derive(Debug)]
pub struct SnapshotCell<T> {
    tx: watch::Sender<Snapshot<T>>,
    write_lock: Mutex<()>,
}

impl<T: Clone> SnapshotCell<T> {
    pub fn new() -> Self {
        Self::with_items(Vec::new())
    }

    pub fn with_items(items: Vec<T>) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(items));
        Self {
            tx,
            write_lock: Mutex::new(()),
        }
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Snapshot<T> {
        self.tx.borrow().clone()
    }

    /// Receiver notified with a new snapshot after every update
    pub fn subscribe(&self) -> watch::Receiver<Snapshot<T>> {
        self.tx.subscribe()
    }

    pub fn len(&self) -> usize {
        self.tx.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.borrow().is_empty()
    }

    /// Apply `f` to a private copy and publish the result
    pub fn update<R>(&self, f: impl FnOnce(&mut Vec<T>) -> R) -> R {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = self.tx.borrow().as_ref().clone();
        let result = f(&mut next);
        self.tx.send_replace(Arc::new(next));
        result
    }

    /// Replace the whole collection
    pub fn replace(&self, items: Vec<T>) {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.tx.send_replace(Arc::new(items));
    }

    /// Empty the collection, returning what it held
    pub fn take(&self) -> Snapshot<T> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.tx.send_replace(Arc::new(Vec::new()))
    }

    pub fn clear(&self) {
        self.replace(Vec::new());
    }
}

impl<T: Clone> Default for SnapshotCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshots_are_immutable() {
        let cell = SnapshotCell::with_items(vec![1, 2]);
        let before = cell.snapshot();

        cell.update(|items| items.push(3));

        assert_eq!(*before, vec![1, 2]);
        assert_eq!(*cell.snapshot(), vec![1, 2, 3]);
    }

    #[test]
    fn test_update_returns_closure_result() {
        let cell = SnapshotCell::with_items(vec!["a".to_string()]);
        let removed = cell.update(|items| items.pop());
        assert_eq!(removed.as_deref(), Some("a"));
        assert!(cell.is_empty());
    }

    #[test]
    fn test_take_empties() {
        let cell = SnapshotCell::with_items(vec![1, 2, 3]);
        let taken = cell.take();
        assert_eq!(taken.len(), 3);
        assert_eq!(cell.len(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_see_updates() {
        let cell = SnapshotCell::new();
        let mut rx = cell.subscribe();

        cell.update(|items| items.push(7u32));

        rx.changed().await.unwrap();
        assert_eq!(**rx.borrow_and_update(), vec![7]);
    }
}
