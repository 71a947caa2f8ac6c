//! Batch execution of work items with per-unit fault isolation.
//!
//! A [`WorkPool`] attempts every unit it is handed. A unit that faults does not stop
//! the batch: its error is recorded in the pool's fault list together with the unit's
//! sort key and a snapshot of its data bag, and the pool moves on. Callers inspect
//! [`WorkPool::faults`] once the batch is drained.
//!
//! The pool itself does not decide ordering or concurrency. [`WorkPool::execute`]
//! runs one unit; the drain strategies build on it:
//!
//! - [`WorkPool::drain_sequential`] - run units on the caller's thread in sort-key order
//! - [`WorkPool::drain_parallel`] - hand units to dispatcher workers
//!
//! Already-applied side effects of successful units are never rolled back.

use std::{
    fmt,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use taskweave_common::{Result, error::Error};

use crate::{
    config::DispatchOptions, data_bag::DataBag, data_parallel::for_each_parallel_with,
    work_item::WorkItem,
};

/// Lifecycle of a pool's batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// No unit has been attempted yet.
    Idle,
    /// Units are being attempted.
    Draining,
    /// Every unit has been attempted and the fault list is final.
    Drained,
}

/// A fault raised by a single unit of work.
#[derive(Debug)]
pub struct WorkFault {
    /// `Debug` rendering of the failing unit's sort key.
    pub sort_order: String,
    /// Snapshot of the unit's data bag at the time of the fault.
    pub data: DataBag,
    pub error: Error,
}

impl fmt::Display for WorkFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit {}: {}", self.sort_order, self.error)?;
        if !self.data.is_empty() {
            write!(f, " (data: {})", self.data)?;
        }
        Ok(())
    }
}

/// Drives a batch of work items, collecting their faults instead of propagating them.
#[derive(Debug)]
pub struct WorkPool {
    state: PoolState,
    attempted: usize,
    faults: Vec<WorkFault>,
}

impl WorkPool {
    pub fn new() -> WorkPool {
        WorkPool {
            state: PoolState::Idle,
            attempted: 0,
            faults: Vec::new(),
        }
    }

    pub fn state(&self) -> PoolState {
        self.state
    }

    /// Number of units attempted so far, successful or not.
    pub fn attempted(&self) -> usize {
        self.attempted
    }

    /// Faults recorded in this batch; empty if every unit succeeded.
    pub fn faults(&self) -> &[WorkFault] {
        &self.faults
    }

    pub fn has_faults(&self) -> bool {
        !self.faults.is_empty()
    }

    /// Executes a single unit.
    ///
    /// A fault raised by the unit is recorded rather than returned. The only error
    /// this method returns is `InvalidOperation` when the pool is already drained.
    pub fn execute<K: fmt::Debug>(&mut self, item: &mut WorkItem<K>) -> Result<()> {
        self.begin()?;
        if let Some(fault) = Self::attempt(item) {
            self.faults.push(fault);
        }
        self.attempted += 1;
        Ok(())
    }

    /// Finalizes the batch. The fault list does not change afterwards.
    pub fn finish(&mut self) {
        if self.state != PoolState::Drained {
            log::debug!(
                "work pool drained: {} units attempted, {} faults",
                self.attempted,
                self.faults.len()
            );
            self.state = PoolState::Drained;
        }
    }

    /// Executes every unit on the caller's thread in ascending sort-key order, then
    /// finalizes the batch.
    ///
    /// The sort is stable: units with equal keys run in their original order.
    pub fn drain_sequential<K>(&mut self, items: &mut [WorkItem<K>]) -> Result<()>
    where
        K: Ord + fmt::Debug,
    {
        self.begin()?;
        items.sort_by(|a, b| a.cmp_order(b));
        for item in items.iter_mut() {
            self.execute(item)?;
        }
        self.finish();
        Ok(())
    }

    /// Executes the units on dispatcher workers, then finalizes the batch.
    ///
    /// Units are claimed in sort-key order; completion order is unspecified. Faults
    /// are appended in sort-key order regardless of when they occurred.
    ///
    /// If the dispatch itself fails (a worker cannot be spawned, or the fault
    /// recording panics), no further units are claimed. The faults of the units that
    /// did run are still recorded, the batch is finalized and the dispatch error is
    /// returned.
    pub fn drain_parallel<K>(
        &mut self,
        items: &mut [WorkItem<K>],
        options: &DispatchOptions,
    ) -> Result<()>
    where
        K: Ord + fmt::Debug + Send,
    {
        options.validate()?;
        self.begin()?;
        items.sort_by(|a, b| a.cmp_order(b));

        let attempted = AtomicUsize::new(0);
        let faults = Mutex::new(Vec::new());
        let dispatched =
            for_each_parallel_with(options, items.iter_mut().enumerate(), |(index, item)| {
                attempted.fetch_add(1, Ordering::Relaxed);
                if let Some(fault) = Self::attempt(item) {
                    faults
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push((index, fault));
                }
            });

        let mut faults = faults
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        faults.sort_by_key(|(index, _)| *index);
        self.faults.extend(faults.into_iter().map(|(_, fault)| fault));
        self.attempted += attempted.into_inner();
        if let Err(e) = &dispatched {
            log::warn!(
                "work pool: parallel drain stopped after {} of {} units: {e}",
                self.attempted,
                items.len()
            );
        }
        self.finish();
        dispatched
    }

    fn begin(&mut self) -> Result<()> {
        match self.state {
            PoolState::Drained => Err(Error::invalid_operation(
                "work pool: batch is already drained",
            )),
            PoolState::Idle => {
                self.state = PoolState::Draining;
                Ok(())
            }
            PoolState::Draining => Ok(()),
        }
    }

    fn attempt<K: fmt::Debug>(item: &mut WorkItem<K>) -> Option<WorkFault> {
        let error = item.execute().err()?;
        let fault = WorkFault {
            sort_order: format!("{:?}", item.sort_order()),
            data: item.data().clone(),
            error,
        };
        log::warn!("work pool: {fault}");
        Some(fault)
    }
}

impl Default for WorkPool {
    fn default() -> Self {
        Self::new()
    }
}
