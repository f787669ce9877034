//! The store handle: shared reads, transactional writes.
//!
//! [`Store`] wraps [`StoreState`] behind a read/write lock. Concurrent
//! control loops and API handlers read freely; the single apply loop writes
//! through [`Store::transaction`], which commits all-or-nothing.

use std::sync::RwLock;

use crate::StoreState;

/// Shared handle over the cluster state.
///
/// The lock is the store's own transaction lock (the only lock held across
/// a write). Writers are expected to be a single task - the replicated
/// apply loop - but the lock keeps concurrent readers safe regardless.
#[derive(Debug, Default)]
pub struct Store {
    state: RwLock<StoreState>,
}

/// A staged mutation of the store.
///
/// The transaction works on a copy of the state. Reads inside the
/// transaction see earlier writes of the same transaction; nothing is
/// visible outside until commit. Returning an error from the closure
/// discards every staged write.
pub struct Txn {
    working: StoreState,
}

impl std::ops::Deref for Txn {
    type Target = StoreState;

    fn deref(&self) -> &StoreState {
        &self.working
    }
}

impl std::ops::DerefMut for Txn {
    fn deref_mut(&mut self) -> &mut StoreState {
        &mut self.working
    }
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store around previously recovered state.
    pub fn from_state(state: StoreState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    /// Point-in-time snapshot of the whole state. Control loops take one
    /// of these at the start of each cycle and plan against it.
    pub fn view(&self) -> StoreState {
        self.state.read().expect("store lock poisoned").clone()
    }

    /// Wholesale replacement, used when installing a transferred snapshot.
    pub fn replace(&self, state: StoreState) {
        *self.state.write().expect("store lock poisoned") = state;
    }

    /// The highest replicated op applied into the store.
    pub fn applied_op(&self) -> u64 {
        self.state.read().expect("store lock poisoned").applied_op()
    }

    /// Reads through the live state without cloning all buckets.
    pub fn with_read<T>(&self, f: impl FnOnce(&StoreState) -> T) -> T {
        f(&self.state.read().expect("store lock poisoned"))
    }

    /// Runs `f` against a working copy of the state and commits the result
    /// atomically if it returns `Ok`. On `Err`, the store is untouched.
    ///
    /// Generic over the error type so callers layering their own
    /// preconditions on top of store writes (the apply path) keep their
    /// error structure through the transaction boundary.
    pub fn transaction<T, E>(&self, f: impl FnOnce(&mut Txn) -> std::result::Result<T, E>)
    -> std::result::Result<T, E> {
        let mut guard = self.state.write().expect("store lock poisoned");
        let mut txn = Txn {
            working: guard.clone(),
        };
        let value = f(&mut txn)?;
        *guard = txn.working;
        Ok(value)
    }
}
