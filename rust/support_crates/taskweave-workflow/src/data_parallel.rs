//! Parallel enumeration of a sequential source.
//!
//! This module fans the elements of an iterator out across a fixed number of worker
//! threads. The functions are:
//! - [`for_each_parallel`] - apply an action to every element with the default degree
//! - [`for_each_parallel_with`] - the same, with explicit [`DispatchOptions`]
//! - [`try_for_each_parallel_with`] - apply a fallible action
//!
//! # Execution Model
//!
//! The source is wrapped in a shared cursor guarded by a mutex. The initiating thread
//! pulls one seed element per worker and spawns up to `degree` named workers; each
//! worker applies the action to its current element, then re-acquires the cursor to
//! pull the next one, until the source is exhausted. The lock only ever covers the
//! pull, so actions run concurrently. Elements are claimed in source order, but the
//! order in which they complete is unspecified.
//!
//! # Failure Semantics
//!
//! Dispatch is fail-fast: the first fault (a panic inside the action, a panic inside
//! the source iterator, or an `Err` returned by a fallible action) stops all workers
//! from claiming further elements and is returned once every worker has been joined.
//! Later faults are discarded, and nothing records which elements had completed.
//! If a worker thread cannot be spawned, the seed element already claimed for it is
//! dropped without being processed.

use std::{
    iter::Fuse,
    panic::{self, AssertUnwindSafe},
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
};

use taskweave_common::{Result, error::Error};

use crate::config::DispatchOptions;

/// Applies `action` to every element of `items` using the default degree of
/// parallelism (see [`crate::config::default_degree`]).
///
/// A panic inside `action` is returned as a `WorkFault` error.
pub fn for_each_parallel<I, F>(items: I, action: F) -> Result<()>
where
    I: IntoIterator,
    I::IntoIter: Send,
    I::Item: Send,
    F: Fn(I::Item) + Sync,
{
    for_each_parallel_with(&DispatchOptions::default(), items, action)
}

/// Applies `action` to every element of `items` with at most `options.degree()`
/// concurrent invocations.
///
/// # Arguments
///
/// * `options` - Degree of parallelism and worker thread naming.
/// * `items` - The source; consumed exactly once.
/// * `action` - Applied to every element; may run concurrently on several workers.
///
/// # Errors
///
/// `InvalidArgument` for a zero degree, `Io` if a worker thread cannot be spawned,
/// `WorkFault` for the first panic raised by `action` or by the source.
pub fn for_each_parallel_with<I, F>(options: &DispatchOptions, items: I, action: F) -> Result<()>
where
    I: IntoIterator,
    I::IntoIter: Send,
    I::Item: Send,
    F: Fn(I::Item) + Sync,
{
    try_for_each_parallel_with(options, items, |item| {
        action(item);
        Ok(())
    })
}

/// Applies a fallible `action` to every element of `items`.
///
/// The first `Err` returned by `action` is returned unchanged after all workers
/// have been joined; no new elements are claimed once it has been observed.
pub fn try_for_each_parallel_with<I, F>(
    options: &DispatchOptions,
    items: I,
    action: F,
) -> Result<()>
where
    I: IntoIterator,
    I::IntoIter: Send,
    I::Item: Send,
    F: Fn(I::Item) -> Result<()> + Sync,
{
    options.validate()?;

    let dispatch = Dispatch::new(items.into_iter());
    log::debug!(
        "parallel dispatch starting: degree {}, prefix '{}'",
        options.degree(),
        options.thread_name_prefix()
    );

    let workers = thread::scope(|scope| {
        let dispatch = &dispatch;
        let action = &action;
        let mut handles = Vec::with_capacity(options.degree());
        for index in 0..options.degree() {
            let Some(seed) = dispatch.claim() else {
                break;
            };
            let spawned = thread::Builder::new()
                .name(options.worker_name(index))
                .spawn_scoped(scope, move || dispatch.run_worker(seed, action));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    dispatch.fail(Error::io("spawn dispatch worker", e));
                    break;
                }
            }
        }

        let workers = handles.len();
        for handle in handles {
            if let Err(payload) = handle.join() {
                dispatch.fail(Error::from_panic(payload));
            }
        }
        workers
    });

    log::debug!(
        "parallel dispatch finished: {} elements claimed by {} workers",
        dispatch.claimed.load(Ordering::Relaxed),
        workers
    );
    dispatch.into_result()
}

/// Shared state of a single dispatch batch.
struct Dispatch<I: Iterator> {
    cursor: Mutex<Fuse<I>>,
    aborted: AtomicBool,
    fault: Mutex<Option<Error>>,
    claimed: AtomicUsize,
}

impl<I: Iterator> Dispatch<I> {
    fn new(source: I) -> Dispatch<I> {
        Dispatch {
            cursor: Mutex::new(source.fuse()),
            aborted: AtomicBool::new(false),
            fault: Mutex::new(None),
            claimed: AtomicUsize::new(0),
        }
    }

    /// Pulls the next element from the shared cursor, or `None` once the source is
    /// exhausted or the batch has been aborted.
    fn claim(&self) -> Option<I::Item> {
        if self.aborted.load(Ordering::Acquire) {
            return None;
        }
        let mut cursor = self.lock_cursor();
        if self.aborted.load(Ordering::Acquire) {
            return None;
        }
        match panic::catch_unwind(AssertUnwindSafe(|| cursor.next())) {
            Ok(item) => {
                if item.is_some() {
                    self.claimed.fetch_add(1, Ordering::Relaxed);
                }
                item
            }
            Err(payload) => {
                drop(cursor);
                self.fail(Error::from_panic(payload));
                None
            }
        }
    }

    fn run_worker<F>(&self, seed: I::Item, action: &F)
    where
        F: Fn(I::Item) -> Result<()>,
    {
        let mut processed = 0usize;
        let mut current = Some(seed);
        while let Some(item) = current {
            match panic::catch_unwind(AssertUnwindSafe(|| action(item))) {
                Ok(Ok(())) => (),
                Ok(Err(e)) => self.fail(e),
                Err(payload) => self.fail(Error::from_panic(payload)),
            }
            processed += 1;
            current = self.claim();
        }
        log::trace!(
            "worker {} done after {} elements",
            thread::current().name().unwrap_or("<unnamed>"),
            processed
        );
    }

    /// Records the first fault of the batch and stops further claims.
    fn fail(&self, e: Error) {
        self.aborted.store(true, Ordering::Release);
        let mut fault = self.fault.lock().unwrap_or_else(PoisonError::into_inner);
        if fault.is_none() {
            log::warn!("parallel dispatch aborted: {e}");
            *fault = Some(e);
        } else {
            log::debug!("parallel dispatch: discarding subsequent fault: {e}");
        }
    }

    fn into_result(self) -> Result<()> {
        match self
            .fault
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
        {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn lock_cursor(&self) -> MutexGuard<'_, Fuse<I>> {
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
