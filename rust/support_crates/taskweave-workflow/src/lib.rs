//! Work dispatch and completion synchronization.
//!
//! This crate provides the pieces needed to fan a batch of work out across threads and
//! fan it back in:
//!
//! # Key Components
//!
//! ## Synchronization
//!
//! - [`latch::Latch`] - a countdown latch, released once when its count reaches zero
//! - [`latch::SyncHandle`] - the contract a unit of work uses to report progress
//!
//! ## Units of Work
//!
//! - [`work_item::WorkItem`] - a keyed unit carrying a bound callable, its positional
//!   arguments and a [`data_bag::DataBag`] for diagnostic context
//! - [`work_pool::WorkPool`] - executes a batch of units, isolating per-unit faults
//!
//! ## High-Level Parallel Processing
//!
//! - [`data_parallel`] - fan a sequential source out across a fixed number of named
//!   worker threads
//! - [`config`] - process-wide default degree of parallelism and per-call options
//!
//! # Failure Policy
//!
//! A [`work_pool::WorkPool`] is best-effort: every unit is attempted and faults are
//! collected for inspection. The [`data_parallel`] dispatcher is fail-fast: the first
//! fault stops the batch and is returned to the caller.

pub mod config;
pub mod data_bag;
pub mod data_parallel;
pub mod latch;
pub mod work_item;
pub mod work_pool;
