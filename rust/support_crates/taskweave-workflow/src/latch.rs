//! A countdown latch and the synchronization handle contract used by work units.
//!
//! A [`Latch`] is created with a target count and released once, irreversibly, when
//! the count reaches zero. Units of work report progress through the
//! [`SyncHandle`] trait, so a batch of units can fan in on a single shared latch.
//!
//! ## Latch Lifecycle
//!
//! 1. **Counting**: `current_count() > 0`, waiters block
//! 2. **Signaled**: `current_count() == 0`, every current and future waiter is released
//!
//! There is no path back from the signaled state. Disposal is orthogonal: it wakes
//! blocked waiters with a `Disposed` error and rejects any further operation.

use std::{
    sync::{
        Condvar, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use taskweave_common::{Result, error::Error, verify_arg};

/// The contract a unit of work uses to report progress to a shared synchronization
/// primitive.
pub trait SyncHandle: Send + Sync {
    /// Reports one unit of progress.
    fn signal(&self) -> Result<()>;

    /// Reports `count` units of progress as a single atomic step.
    fn signal_many(&self, count: usize) -> Result<()>;
}

/// A decrement-to-zero signal.
///
/// The counter is decremented with a compare-and-swap loop, so concurrent signals
/// never observe the same pre-zero value and no decrement is lost. Only the signal
/// that moves the counter into zero touches the wait mutex and wakes the waiters.
#[derive(Debug)]
pub struct Latch {
    initial_count: usize,
    count: AtomicUsize,
    disposed: AtomicBool,
    state: Mutex<WaitState>,
    condvar: Condvar,
}

#[derive(Debug)]
struct WaitState {
    released: bool,
    disposed: bool,
}

impl Latch {
    /// Creates a latch that is released after `initial_count` signals.
    ///
    /// A latch created with zero is released from the start.
    pub fn new(initial_count: usize) -> Latch {
        Latch {
            initial_count,
            count: AtomicUsize::new(initial_count),
            disposed: AtomicBool::new(false),
            state: Mutex::new(WaitState {
                released: initial_count == 0,
                disposed: false,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Creates a latch from a signed count, rejecting negative values with
    /// `InvalidArgument`.
    pub fn from_signed(initial_count: i64) -> Result<Latch> {
        verify_arg!(initial_count, initial_count >= 0);
        let count = usize::try_from(initial_count)
            .map_err(|_| Error::invalid_arg("initial_count", "exceeds usize::MAX"))?;
        Ok(Latch::new(count))
    }

    pub fn initial_count(&self) -> usize {
        self.initial_count
    }

    pub fn current_count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Returns `true` once the count has reached zero. Never reverts to `false`.
    pub fn is_set(&self) -> bool {
        self.current_count() == 0
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Decrements the count by one.
    ///
    /// Faults with `InvalidOperation` if the latch is already set and with `Disposed`
    /// after [`dispose`](Self::dispose).
    pub fn signal(&self) -> Result<()> {
        self.signal_many(1)
    }

    /// Decrements the count by `count` as one atomic step.
    ///
    /// Either the whole decrement is applied or, if it would take the count below
    /// zero, nothing is and the call faults with `InvalidOperation`.
    pub fn signal_many(&self, count: usize) -> Result<()> {
        verify_arg!(count, count >= 1);
        self.check_disposed()?;

        let mut current = self.count.load(Ordering::Acquire);
        loop {
            let Some(next) = current.checked_sub(count) else {
                return Err(Error::invalid_operation(format!(
                    "latch signal: decrement by {count} exceeds remaining count {current}"
                )));
            };
            match self
                .count
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    if next == 0 {
                        self.release();
                    }
                    return Ok(());
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Blocks until the latch is set.
    ///
    /// Returns `Disposed` if the latch is disposed before it is set.
    pub fn wait(&self) -> Result<()> {
        self.check_disposed()?;
        if self.is_set() {
            return Ok(());
        }
        let guard = self
            .condvar
            .wait_while(self.lock_state(), |s| !s.released && !s.disposed)
            .unwrap_or_else(PoisonError::into_inner);
        if guard.released {
            Ok(())
        } else {
            Err(Error::disposed("latch"))
        }
    }

    /// Blocks until the latch is set or `timeout` elapses.
    ///
    /// Returns immediately if the latch is already set, `Timeout` if the deadline
    /// passes first, and `Disposed` if the latch is disposed while waiting.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<()> {
        self.check_disposed()?;
        if self.is_set() {
            return Ok(());
        }
        let (guard, _) = self
            .condvar
            .wait_timeout_while(self.lock_state(), timeout, |s| {
                !s.released && !s.disposed
            })
            .unwrap_or_else(PoisonError::into_inner);
        if guard.released {
            Ok(())
        } else if guard.disposed {
            Err(Error::disposed("latch"))
        } else {
            Err(Error::timeout("latch", timeout))
        }
    }

    /// Releases the wait resource.
    ///
    /// Threads blocked in [`wait`](Self::wait) or [`wait_timeout`](Self::wait_timeout)
    /// wake with `Disposed` unless the latch was already set. Every later operation
    /// faults with `Disposed`. Disposing twice is a no-op.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut state = self.lock_state();
        state.disposed = true;
        drop(state);
        self.condvar.notify_all();
        log::trace!(
            "latch disposed with {} of {} signals outstanding",
            self.current_count(),
            self.initial_count
        );
    }

    /// Transition into the signaled state. Called exactly once, by the signal that
    /// moved the counter to zero.
    fn release(&self) {
        let mut state = self.lock_state();
        debug_assert!(!state.released);
        state.released = true;
        drop(state);
        self.condvar.notify_all();
        log::trace!("latch released after {} signals", self.initial_count);
    }

    fn check_disposed(&self) -> Result<()> {
        if self.is_disposed() {
            Err(Error::disposed("latch"))
        } else {
            Ok(())
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, WaitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SyncHandle for Latch {
    fn signal(&self) -> Result<()> {
        Latch::signal(self)
    }

    fn signal_many(&self, count: usize) -> Result<()> {
        Latch::signal_many(self, count)
    }
}
