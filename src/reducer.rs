//! Blocking fan-out/fan-in over a fixed-size worker pool.

use std::fmt;
use std::ops::Range;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::error;

use crate::error::{config_err, Result};

/// Runs independent work units on a dedicated thread pool and hands back their
/// partial results for the caller to combine.
pub struct ParallelReducer {
    pool: ThreadPool,
}

impl fmt::Debug for ParallelReducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelReducer")
            .field("workers", &self.pool.current_num_threads())
            .finish_non_exhaustive()
    }
}

impl ParallelReducer {
    pub fn new(workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(config_err!("workers must be at least 1"));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|idx| format!("ipv4-worker-{idx}"))
            .panic_handler(|p| {
                let panic = format_worker_panic(p);
                error!(%panic, "worker panicked");
            })
            .build()
            .map_err(|e| config_err!("failed to build worker pool: {e}"))?;

        Ok(Self { pool })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Apply `f` to every unit on the pool and return the results in unit order.
    ///
    /// Blocks until every unit finished. The first error fails the whole call and
    /// the other partial results are dropped.
    pub fn map<U, R, F>(&self, units: &[U], f: F) -> Result<Vec<R>>
    where
        U: Sync,
        R: Send,
        F: Fn(&U) -> Result<R> + Sync + Send,
    {
        self.pool
            .install(|| units.par_iter().with_max_len(1).map(f).collect())
    }
}

/// Split `[0, len)` into `parts` contiguous disjoint ranges whose sizes differ by at
/// most one. Fewer ranges are returned when `len < parts`.
pub fn split_range(len: u64, parts: usize) -> Vec<Range<u64>> {
    let parts = (parts.max(1) as u64).min(len.max(1));
    let base = len / parts;
    let extra = len % parts;

    let mut ranges = Vec::with_capacity(parts as usize);
    let mut start = 0;
    for i in 0..parts {
        let end = start + base + u64::from(i < extra);
        ranges.push(start..end);
        start = end;
    }
    ranges
}

/// Formats a panic message for a pool worker.
fn format_worker_panic(panic: Box<dyn std::any::Any + Send>) -> String {
    let maybe_idx = rayon::current_thread_index();
    let worker: &dyn fmt::Display = match &maybe_idx {
        Some(idx) => idx,
        None => &"UNKNOWN",
    };

    let message = if let Some(msg) = panic.downcast_ref::<&str>() {
        *msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "UNKNOWN"
    };

    format!("worker {worker} panicked with: {message}")
}
