// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory retry queue owned by the delivery task.
//!
//! Records pulled from the ring buffer wait here until they are delivered or
//! have exhausted their retries. The queue is never persisted.

use crate::backoff::retry_delay;
use rand::Rng;
use std::collections::VecDeque;
use tokio::time::Instant;

/// A stored record awaiting delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedRecord {
    pub message: String,
    pub retries: u32,
    /// Earliest instant of the next attempt, drawn when the last attempt failed
    pub retry_at: Option<Instant>,
}

impl QueuedRecord {
    #[must_use]
    pub fn new(message: String) -> Self {
        Self {
            message,
            retries: 0,
            retry_at: None,
        }
    }

    /// Whether the record's backoff window has elapsed at `now`
    #[must_use]
    pub fn is_ready(&self, now: Instant) -> bool {
        self.retry_at.map_or(true, |at| now >= at)
    }
}

/// Splits buffer chunks into records, carrying a partial trailing record over
/// to the next chunk.
#[derive(Debug, Default)]
pub struct ChunkSplitter {
    remainder: Vec<u8>,
}

impl ChunkSplitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the complete records in `chunk`, prefixed by whatever was left
    /// over from the previous call. Empty lines are discarded.
    pub fn split(&mut self, chunk: &[u8]) -> Vec<String> {
        self.remainder.extend_from_slice(chunk);
        let Some(last_newline) = self.remainder.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };

        let rest = self.remainder.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.remainder, rest);

        complete
            .split(|&b| b == b'\n')
            .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
            .filter(|line| !line.is_empty())
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect()
    }

    /// Bytes of an incomplete record waiting for the rest of its line
    #[must_use]
    pub fn pending(&self) -> usize {
        self.remainder.len()
    }
}

/// FIFO of records with per-record retry bookkeeping
#[derive(Debug)]
pub struct RetryQueue {
    records: VecDeque<QueuedRecord>,
    max_retries: u32,
}

impl RetryQueue {
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self {
            records: VecDeque::with_capacity(1000),
            max_retries,
        }
    }

    pub fn extend<I: IntoIterator<Item = String>>(&mut self, messages: I) {
        self.records
            .extend(messages.into_iter().map(QueuedRecord::new));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Stored size of the queued records, newlines included
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.records
            .iter()
            .map(|record| record.message.len() + 1)
            .sum()
    }

    #[must_use]
    pub fn front(&self) -> Option<&QueuedRecord> {
        self.records.front()
    }

    /// Size of the batch that may be sent at `now`, taking up to `max` records
    /// from the head. Returns `None` if any of those records is still backing
    /// off: the whole batch waits for its slowest member.
    #[must_use]
    pub fn ready_batch(&self, max: usize, now: Instant) -> Option<usize> {
        let count = max.min(self.records.len());
        if count == 0 {
            return None;
        }
        self.records
            .iter()
            .take(count)
            .all(|record| record.is_ready(now))
            .then_some(count)
    }

    /// Messages of the first `count` records
    #[must_use]
    pub fn messages(&self, count: usize) -> Vec<String> {
        self.records
            .iter()
            .take(count)
            .map(|record| record.message.clone())
            .collect()
    }

    /// Removes the first `count` records after a successful send.
    pub fn complete(&mut self, count: usize) {
        let count = count.min(self.records.len());
        self.records.drain(..count);
    }

    /// Registers a failed attempt for the first `count` records. Records that
    /// now exceed the retry limit are removed; the others get a new backoff
    /// deadline. Returns the number of removed records.
    pub fn record_failure<R: Rng + ?Sized>(
        &mut self,
        count: usize,
        now: Instant,
        rng: &mut R,
    ) -> usize {
        let count = count.min(self.records.len());
        let attempted: Vec<QueuedRecord> = self.records.drain(..count).collect();

        let mut dropped = 0;
        for mut record in attempted.into_iter().rev() {
            record.retries += 1;
            if record.retries > self.max_retries {
                dropped += 1;
                continue;
            }
            record.retry_at = Some(now + retry_delay(i64::from(record.retries), rng));
            self.records.push_front(record);
        }
        dropped
    }
}
