// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery pipeline: drains the ring buffer into the transport.
//!
//! Each iteration either refills the in-memory retry queue from the buffer,
//! waits for a wakeup when there is nothing to do, or attempts the head of
//! the queue (one record, or a batch of up to `batch_size` records).
//! Failed attempts are retried with exponential backoff until the record
//! exceeds `max_retries`, at which point it is dropped and counted.

use crate::buffer::RecordBuffer;
use crate::config::Config;
use crate::error::TransportError;
use crate::queue::{ChunkSplitter, RetryQueue};
use crate::record::escape_for_log;
use crate::signal::WakeupReceiver;
use crate::stats::DeliveryStats;
use crate::transport::Transport;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Bytes read from the buffer per refill when sending one record at a time
pub const READ_CHUNK_SIZE: u64 = 4096;
/// Expected record size used to size refills for batches
const BATCH_RECORD_ESTIMATE: u64 = 512;

/// Pause after a successful send
const SEND_PAUSE: Duration = Duration::from_millis(50);
/// Pause while the next record or batch is backing off
const BACKOFF_PAUSE: Duration = Duration::from_millis(50);
/// Pause after a failed batch
const BATCH_FAILURE_PAUSE: Duration = Duration::from_millis(100);
/// Pause after the buffer failed to read
const BUFFER_ERROR_PAUSE: Duration = Duration::from_secs(1);

pub struct Delivery {
    buffer: Arc<dyn RecordBuffer>,
    transport: Box<dyn Transport>,
    wakeup: WakeupReceiver,
    stats: Arc<DeliveryStats>,
    queue: RetryQueue,
    splitter: ChunkSplitter,
    rng: StdRng,
    batching: bool,
    batch_size: usize,
    max_retries: u32,
    chunk_size: u64,
    polling_interval: Duration,
}

impl Delivery {
    pub fn new(
        buffer: Arc<dyn RecordBuffer>,
        transport: Box<dyn Transport>,
        wakeup: WakeupReceiver,
        stats: Arc<DeliveryStats>,
        config: &Config,
    ) -> Self {
        let batch_size = config.effective_batch_size();
        let chunk_size = if config.enable_batching {
            READ_CHUNK_SIZE.max(batch_size as u64 * BATCH_RECORD_ESTIMATE)
        } else {
            READ_CHUNK_SIZE
        };

        Self {
            buffer,
            transport,
            wakeup,
            stats,
            queue: RetryQueue::new(config.max_retries),
            splitter: ChunkSplitter::new(),
            rng: StdRng::from_os_rng(),
            batching: config.enable_batching,
            batch_size,
            max_retries: config.max_retries,
            chunk_size,
            polling_interval: config.polling_interval,
        }
    }

    /// Replaces the jitter source, e.g. with a seeded one.
    #[must_use]
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// Runs until `cancel` fires, then closes the transport and reports the
    /// final counters. Records still queued in memory are not sent.
    pub async fn run(mut self, cancel: CancellationToken) {
        if self.batching {
            info!(
                "DELIVERY | Sending to {} with batching enabled (batch size: {})",
                self.transport.destination(),
                self.batch_size
            );
        } else {
            info!(
                "DELIVERY | Sending to {} one record at a time",
                self.transport.destination()
            );
        }

        while self.step(&cancel).await {}

        debug!(
            "DELIVERY | Shutting down with {} record(s) queued and {} bytes buffered",
            self.queue.len(),
            self.buffer.size()
        );
        self.transport.close().await;
        self.stats.report();
    }

    /// One iteration of the loop. Returns `false` once cancelled.
    async fn step(&mut self, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }

        if self.queue.is_empty() && self.buffer.has_data() {
            if let Err(e) = self.refill() {
                error!("DELIVERY | Error reading from buffer: {}", e);
                return pause(BUFFER_ERROR_PAUSE, cancel).await;
            }
        }

        if self.queue.is_empty() {
            if self.buffer.has_data() {
                // The chunk held only part of a record
                return true;
            }
            return self.wait_for_data(cancel).await;
        }

        if !self.transport.ensure_connected(cancel).await {
            return !cancel.is_cancelled();
        }

        let max = if self.batching { self.batch_size } else { 1 };
        let Some(count) = self.queue.ready_batch(max, Instant::now()) else {
            return pause(BACKOFF_PAUSE, cancel).await;
        };
        self.attempt(count, cancel).await
    }

    fn refill(&mut self) -> Result<(), crate::error::BufferError> {
        debug!(
            "DELIVERY | Reading more logs from buffer (size: {} bytes)",
            self.buffer.size()
        );
        // Counts the chunk as pending while it moves from the buffer to the queue
        self.stats
            .set_pending(self.backlog_bytes().saturating_add(self.chunk_size));
        let result = self.buffer.read(self.chunk_size).map(|chunk| {
            let Some(data) = chunk else {
                return;
            };
            let records = self.splitter.split(&data);
            debug!(
                "DELIVERY | Queued {} record(s) from {} bytes",
                records.len(),
                data.len()
            );
            self.queue.extend(records);
        });
        self.publish_backlog();
        result
    }

    /// Bytes held in memory: queued records plus a partial trailing record
    fn backlog_bytes(&self) -> u64 {
        (self.queue.pending_bytes() + self.splitter.pending()) as u64
    }

    fn publish_backlog(&self) {
        self.stats.set_pending(self.backlog_bytes());
    }

    async fn wait_for_data(&mut self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            () = cancel.cancelled() => false,
            woke = self.wakeup.wait() => {
                if woke {
                    debug!("DELIVERY | Woken up, new logs available");
                    true
                } else {
                    // Ingestion is gone, fall back to polling
                    pause(self.polling_interval, cancel).await
                }
            }
            () = tokio::time::sleep(self.polling_interval) => true,
        }
    }

    async fn attempt(&mut self, count: usize, cancel: &CancellationToken) -> bool {
        let records = self.queue.messages(count);
        if let [record] = records.as_slice() {
            debug!("DELIVERY | Sending: {}", escape_for_log(record.as_bytes()));
        }

        match self.transport.send(&records, cancel).await {
            Ok(()) => {
                self.queue.complete(count);
                self.publish_backlog();
                self.stats.record_delivered(count as u64);
                if self.batching {
                    self.stats.record_batch();
                }
                info!(
                    "DELIVERY | Successfully sent {} log entr{} to {}",
                    count,
                    if count == 1 { "y" } else { "ies" },
                    self.transport.destination()
                );
                pause(SEND_PAUSE, cancel).await
            }
            Err(TransportError::Cancelled) => false,
            Err(e) => {
                let attempt = self.queue.front().map_or(1, |record| record.retries + 1);
                warn!(
                    "DELIVERY | Failed to send {} log entr{} (attempt {}): {}",
                    count,
                    if count == 1 { "y" } else { "ies" },
                    attempt,
                    e
                );

                let dropped = self
                    .queue
                    .record_failure(count, Instant::now(), &mut self.rng);
                self.publish_backlog();
                if dropped > 0 {
                    self.stats.record_failed(dropped as u64);
                    error!(
                        "DELIVERY | Giving up on {} log entr{} after {} retries",
                        dropped,
                        if dropped == 1 { "y" } else { "ies" },
                        self.max_retries
                    );
                }

                if self.batching {
                    pause(BATCH_FAILURE_PAUSE, cancel).await
                } else {
                    true
                }
            }
        }
    }
}

/// Sleeps for `duration` unless cancelled first. Returns `false` if cancelled.
async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}
