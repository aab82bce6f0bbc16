use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use tracing::debug;

use crate::executor::Executor;
use crate::log_store::LogStore;

/// Number of workers to use when the caller does not choose one.
pub fn default_concurrency() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Drain `targets` with `concurrency` long-lived workers, running the
/// executor once per received directory.
///
/// Blocks until the channel is closed and every worker has returned.
/// Returns the number of directories executed.
pub fn run_pool(
    targets: Receiver<PathBuf>,
    executor: &Executor,
    store: &LogStore,
    concurrency: usize,
) -> Result<usize> {
    let concurrency = concurrency.max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(concurrency)
        .thread_name(|i| format!("worker-{}", i))
        .build()
        .context("Failed to build worker pool")?;

    let executed = AtomicUsize::new(0);
    pool.scope(|s| {
        for id in 0..concurrency {
            let targets = targets.clone();
            let executed = &executed;
            s.spawn(move |_| {
                debug!(worker = id, "worker started");
                for dir in targets.iter() {
                    executor.execute(&dir, store);
                    executed.fetch_add(1, Ordering::Relaxed);
                }
                debug!(worker = id, "target channel closed, worker exiting");
            });
        }
    });

    Ok(executed.into_inner())
}
