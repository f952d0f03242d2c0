// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Delivery counters shared between the delivery task, the reporter and
/// the drain-wait at shutdown
#[derive(Debug, Default)]
pub struct DeliveryStats {
    delivered: AtomicU64,
    failed: AtomicU64,
    batches: AtomicU64,
    /// Bytes taken from the buffer but not yet delivered or dropped
    pending_bytes: AtomicU64,
}

/// Point-in-time copy of [`DeliveryStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub delivered: u64,
    pub failed: u64,
    pub batches: u64,
}

impl DeliveryStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_delivered(&self, records: u64) {
        self.delivered.fetch_add(records, Ordering::Relaxed);
    }

    pub fn record_batch(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self, records: u64) {
        self.failed.fetch_add(records, Ordering::Relaxed);
    }

    pub fn set_pending(&self, bytes: u64) {
        self.pending_bytes.store(bytes, Ordering::SeqCst);
    }

    /// Bytes held in memory by delivery: queued records and any partial
    /// record awaiting the rest of its line.
    #[must_use]
    pub fn pending(&self) -> u64 {
        self.pending_bytes.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
        }
    }

    /// Logs the current counters.
    pub fn report(&self) {
        let snapshot = self.snapshot();
        if snapshot.batches > 0 {
            info!(
                "STATS | Log forwarding stats: {} successful, {} failed, {} batches sent",
                snapshot.delivered, snapshot.failed, snapshot.batches
            );
        } else {
            info!(
                "STATS | Log forwarding stats: {} successful, {} failed",
                snapshot.delivered, snapshot.failed
            );
        }
    }
}

/// Reports the counters every `interval` until `cancel` fires.
pub async fn run_reporter(stats: Arc<DeliveryStats>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => stats.report(),
        }
    }
}
