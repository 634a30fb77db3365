use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::native::process_tree::ProcessTree;

/// Periodically samples the memory of a process tree while it runs.
///
/// The task is owned by this handle: stopping or dropping the handle ends
/// it, whatever path the executor leaves by.
#[derive(Debug)]
pub struct ResourceSampler {
    stop: CancellationToken,
    peak: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl ResourceSampler {
    /// `exceeded` is cancelled as soon as a sample goes over `ceiling_bytes`.
    pub fn start(
        tree: ProcessTree,
        interval: Duration,
        ceiling_bytes: u64,
        exceeded: CancellationToken,
    ) -> Self {
        let stop = CancellationToken::new();
        let peak = Arc::new(AtomicU64::new(0));

        let handle = tokio::spawn(sample_loop(
            tree,
            interval,
            ceiling_bytes,
            exceeded,
            stop.clone(),
            peak.clone(),
        ));

        Self {
            stop,
            peak,
            handle: Some(handle),
        }
    }

    /// Stops sampling and returns the peak observed so far.
    pub async fn stop(mut self) -> u64 {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::debug!("Memory sampler ended abnormally: {}", e);
            }
        }
        self.peak.load(Ordering::Relaxed)
    }
}

impl Drop for ResourceSampler {
    fn drop(&mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn sample_loop(
    tree: ProcessTree,
    interval: Duration,
    ceiling_bytes: u64,
    exceeded: CancellationToken,
    stop: CancellationToken,
    peak: Arc<AtomicU64>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                let used = tree.memory_usage();
                peak.fetch_max(used, Ordering::Relaxed);

                if used > ceiling_bytes {
                    tracing::debug!(pid = tree.root(), used, ceiling_bytes, "Memory ceiling exceeded");
                    exceeded.cancel();
                    break;
                }
            }
        }
    }
}
