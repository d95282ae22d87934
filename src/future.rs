//! Single-resolution result slot shared between a transfer and its callers.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::{locked, Error, TransferResult};

enum Outcome<R> {
    Pending,
    Done(TransferResult<R>),
    Cancelled,
}

/// Handle to the result of an enqueued transfer.
///
/// Clones observe the same slot. The slot resolves at most once: later
/// `complete`, `fail` or `cancel` calls are ignored.
pub struct TransferFuture<R> {
    slot: Arc<(Mutex<Outcome<R>>, Condvar)>,
}

impl<R> Clone for TransferFuture<R> {
    fn clone(&self) -> Self {
        TransferFuture {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<R> Default for TransferFuture<R> {
    fn default() -> Self {
        TransferFuture::new()
    }
}

impl<R> TransferFuture<R> {
    pub fn new() -> Self {
        TransferFuture {
            slot: Arc::new((Mutex::new(Outcome::Pending), Condvar::new())),
        }
    }

    fn resolve(&self, outcome: Outcome<R>) -> bool {
        let (lock, cond) = &*self.slot;
        let mut slot = locked(lock);
        if !matches!(*slot, Outcome::Pending) {
            return false;
        }
        *slot = outcome;
        cond.notify_all();
        true
    }

    /// Resolve with a value. Returns `false` if already resolved.
    pub fn complete(&self, value: R) -> bool {
        self.resolve(Outcome::Done(Ok(value)))
    }

    /// Resolve with an error. Returns `false` if already resolved.
    pub fn fail(&self, error: Arc<Error>) -> bool {
        self.resolve(Outcome::Done(Err(error)))
    }

    /// Cancel the transfer. Returns `false` if already resolved.
    ///
    /// A running transfer is not interrupted; its result is discarded.
    pub fn cancel(&self) -> bool {
        self.resolve(Outcome::Cancelled)
    }

    /// Whether the slot is resolved (completed, failed or cancelled).
    pub fn is_done(&self) -> bool {
        !matches!(*locked(&self.slot.0), Outcome::Pending)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(*locked(&self.slot.0), Outcome::Cancelled)
    }

    /// Whether two handles observe the same slot.
    pub fn same_slot(&self, other: &TransferFuture<R>) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl<R: Clone> TransferFuture<R> {
    /// Block until resolved.
    pub fn wait(&self) -> TransferResult<R> {
        let (lock, cond) = &*self.slot;
        let mut slot = locked(lock);
        loop {
            if let Some(result) = snapshot(&slot) {
                return result;
            }
            slot = cond
                .wait(slot)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    /// Block until resolved or the timeout elapses; `None` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<TransferResult<R>> {
        let deadline = Instant::now() + timeout;
        let (lock, cond) = &*self.slot;
        let mut slot = locked(lock);
        loop {
            if let Some(result) = snapshot(&slot) {
                return Some(result);
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            slot = cond
                .wait_timeout(slot, remaining)
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .0;
        }
    }

    /// The result, if resolved.
    pub fn try_get(&self) -> Option<TransferResult<R>> {
        snapshot(&locked(&self.slot.0))
    }
}

fn snapshot<R: Clone>(outcome: &Outcome<R>) -> Option<TransferResult<R>> {
    match outcome {
        Outcome::Pending => None,
        Outcome::Done(result) => Some(result.clone()),
        Outcome::Cancelled => Some(Err(Arc::new(Error::Cancelled))),
    }
}

impl<R> fmt::Debug for TransferFuture<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match *locked(&self.slot.0) {
            Outcome::Pending => "pending",
            Outcome::Done(Ok(_)) => "completed",
            Outcome::Done(Err(_)) => "failed",
            Outcome::Cancelled => "cancelled",
        };
        f.debug_struct("TransferFuture").field("state", &state).finish()
    }
}
