//! Per-volume mutual exclusion for multi-step lifecycle operations.
//!
//! The appliance offers no resource locks, so the plugin keeps its own set
//! of busy backend ids. Contention fails immediately instead of queueing;
//! the orchestrator above is expected to retry.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised by [`LockTable`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum GuardError {
    /// Raised when another operation already holds the id.
    #[error("volume {id} is busy with another operation")]
    Held {
        /// Contended backend id.
        id: String,
    },
    /// Raised when releasing an id that is not held.
    #[error("volume {id} is not locked")]
    NotHeld {
        /// Backend id that was released.
        id: String,
    },
}

/// Set of backend ids currently owned by an in-flight operation.
#[derive(Debug, Default)]
pub struct LockTable {
    held: Mutex<HashSet<String>>,
}

impl LockTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn held(&self) -> MutexGuard<'_, HashSet<String>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks `id` as held.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::Held`] when `id` is already held.
    pub fn lock(&self, id: &str) -> Result<(), GuardError> {
        if self.held().insert(id.to_owned()) {
            debug!(volume = %id, "lock acquired");
            Ok(())
        } else {
            Err(GuardError::Held { id: id.to_owned() })
        }
    }

    /// Releases `id`.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::NotHeld`] when `id` is not held.
    pub fn unlock(&self, id: &str) -> Result<(), GuardError> {
        if self.held().remove(id) {
            debug!(volume = %id, "lock released");
            Ok(())
        } else {
            Err(GuardError::NotHeld { id: id.to_owned() })
        }
    }

    /// Returns `true` while `id` is held.
    #[must_use]
    pub fn is_held(&self, id: &str) -> bool {
        self.held().contains(id)
    }

    /// Locks `id` for the lifetime of the returned guard.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::Held`] when `id` is already held.
    pub fn acquire(&self, id: &str) -> Result<LockGuard<'_>, GuardError> {
        self.lock(id)?;
        Ok(LockGuard {
            table: self,
            id: id.to_owned(),
        })
    }
}

/// Releases its id when dropped, on every exit path of the owning scope.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'a> {
    table: &'a LockTable,
    id: String,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.table.unlock(&self.id) {
            warn!(volume = %self.id, error = %err, "lock vanished before release");
        }
    }
}

#[cfg(test)]
mod tests;
