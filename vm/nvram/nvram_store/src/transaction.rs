// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Settings data with backup/commit/rollback, shared between peer objects.

use parking_lot::MappedRwLockReadGuard;
use parking_lot::MappedRwLockWriteGuard;
use parking_lot::RwLock;
use parking_lot::RwLockReadGuard;
use parking_lot::RwLockWriteGuard;
use std::sync::Arc;

/// Data that can be changed tentatively and then committed or rolled back.
///
/// After [`backup`](Self::backup), reads and writes go to a staged copy. The
/// committed data is only replaced on [`commit`](Self::commit).
///
/// Peers created with [`share`](Self::share) see the same data, staged copy
/// included, and the same lock.
#[derive(Debug)]
pub struct Transaction<T> {
    inner: Arc<RwLock<State<T>>>,
}

#[derive(Debug)]
struct State<T> {
    committed: T,
    staged: Option<T>,
}

impl<T> State<T> {
    fn current(&self) -> &T {
        self.staged.as_ref().unwrap_or(&self.committed)
    }

    fn current_mut(&mut self) -> &mut T {
        match &mut self.staged {
            Some(staged) => staged,
            None => &mut self.committed,
        }
    }
}

impl<T: Clone> Transaction<T> {
    pub fn new(data: T) -> Self {
        Self {
            inner: Arc::new(RwLock::new(State {
                committed: data,
                staged: None,
            })),
        }
    }

    /// Returns a handle to the same data.
    pub fn share(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }

    /// Returns an independent transaction, starting from a copy of the
    /// current data.
    pub fn attach_copy(&self) -> Self {
        Self::new(self.read().clone())
    }

    /// Starts staging changes. Does nothing if already backed up.
    pub fn backup(&self) {
        let mut state = self.inner.write();
        if state.staged.is_none() {
            state.staged = Some(state.committed.clone());
        }
    }

    /// Makes the staged changes permanent. Returns false if there was
    /// nothing to commit.
    pub fn commit(&self) -> bool {
        let mut state = self.inner.write();
        match state.staged.take() {
            Some(staged) => {
                state.committed = staged;
                true
            }
            None => false,
        }
    }

    /// Discards the staged changes.
    pub fn rollback(&self) {
        self.inner.write().staged = None;
    }

    pub fn is_backed_up(&self) -> bool {
        self.inner.read().staged.is_some()
    }

    /// Locks the current data for reading.
    pub fn read(&self) -> MappedRwLockReadGuard<'_, T> {
        RwLockReadGuard::map(self.inner.read(), State::current)
    }

    /// Locks the current data for writing.
    pub fn write(&self) -> MappedRwLockWriteGuard<'_, T> {
        RwLockWriteGuard::map(self.inner.write(), State::current_mut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_and_rollback() {
        let tx = Transaction::new(1);
        tx.backup();
        *tx.write() = 2;
        assert_eq!(*tx.read(), 2);
        tx.rollback();
        assert_eq!(*tx.read(), 1);

        tx.backup();
        *tx.write() = 3;
        assert!(tx.is_backed_up());
        assert!(tx.commit());
        assert!(!tx.is_backed_up());
        assert!(!tx.commit());
        assert_eq!(*tx.read(), 3);
    }

    #[test]
    fn writes_without_backup_are_committed() {
        let tx = Transaction::new(String::from("a"));
        tx.write().push('b');
        tx.rollback();
        assert_eq!(*tx.read(), "ab");
    }

    #[test]
    fn peers() {
        let tx = Transaction::new(vec![1]);
        let shared = tx.share();
        let copy = tx.attach_copy();

        tx.backup();
        tx.write().push(2);
        assert_eq!(*shared.read(), [1, 2]);
        assert!(shared.is_backed_up());
        assert_eq!(*copy.read(), [1]);

        shared.commit();
        assert_eq!(*tx.read(), [1, 2]);
        copy.write().push(9);
        assert_eq!(*tx.read(), [1, 2]);
    }
}
