//! Process-wide defaults and per-call options for parallel dispatch.
//!
//! The default degree of parallelism is resolved lazily: a value set through
//! [`configure_default_degree`] wins, otherwise the number of logical processors
//! reported by the system is used.

use std::sync::atomic::{AtomicUsize, Ordering};

use taskweave_common::{Result, verify_arg};

/// Thread name prefix used when the caller does not provide one.
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "taskweave-worker";

/// Fallback degree when the system parallelism cannot be determined.
const FALLBACK_DEGREE: usize = 8;

/// Global configuration for the default degree of parallelism.
///
/// A value of 0 indicates that no explicit degree has been configured.
static DEFAULT_DEGREE: AtomicUsize = AtomicUsize::new(0);

/// Configures the process-wide default degree of parallelism.
///
/// Values less than 1 are clamped to 1. Unlike a lazily built pool, the value is
/// read on every dispatch, so later calls take effect for subsequent batches.
pub fn configure_default_degree(degree: usize) {
    DEFAULT_DEGREE.store(degree.max(1), Ordering::SeqCst);
}

/// Clears a previously configured default, reverting to the logical processor count.
pub fn reset_default_degree() {
    DEFAULT_DEGREE.store(0, Ordering::SeqCst);
}

/// Returns the default degree of parallelism.
///
/// 1. The value set by [`configure_default_degree`], if any
/// 2. Otherwise the number of logical processors
/// 3. Falls back to 8 if system parallelism cannot be determined
pub fn default_degree() -> usize {
    let degree = DEFAULT_DEGREE.load(Ordering::SeqCst);
    if degree == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(FALLBACK_DEGREE)
    } else {
        degree
    }
}

/// Options controlling a single parallel dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOptions {
    degree: usize,
    thread_name_prefix: String,
}

impl DispatchOptions {
    /// Options with the default degree and thread name prefix.
    pub fn new() -> DispatchOptions {
        DispatchOptions {
            degree: default_degree(),
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
        }
    }

    /// Sets the maximum number of concurrent workers.
    pub fn with_degree(mut self, degree: usize) -> DispatchOptions {
        self.degree = degree;
        self
    }

    /// Sets the prefix of worker thread names; workers are named `{prefix}-{index}`.
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> DispatchOptions {
        self.thread_name_prefix = prefix.into();
        self
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn thread_name_prefix(&self) -> &str {
        &self.thread_name_prefix
    }

    pub(crate) fn validate(&self) -> Result<()> {
        verify_arg!(degree, self.degree >= 1);
        verify_arg!(
            thread_name_prefix,
            !self.thread_name_prefix.contains('\0')
        );
        Ok(())
    }

    pub(crate) fn worker_name(&self, index: usize) -> String {
        format!("{}-{}", self.thread_name_prefix, index)
    }
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self::new()
    }
}
