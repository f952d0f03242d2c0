// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ingestion loop: input lines in, syslog records into the ring buffer.

use crate::buffer::RecordBuffer;
use crate::config::Config;
use crate::record::format_syslog;
use crate::signal::WakeupSender;
use crate::stats::DeliveryStats;
use chrono::Local;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Longest line accepted from the input; the excess is dropped.
pub const MAX_LINE_LENGTH: usize = 256 * 1024;

/// Interval between buffer checks while draining at shutdown
pub const DRAIN_TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// Lines read from the input
    pub lines: u64,
    /// Records stored in the buffer
    pub written: u64,
    /// Records the buffer rejected
    pub failed: u64,
}

/// How the drain-wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Nothing was left to deliver
    Skipped,
    /// The buffer and delivery's in-memory queue emptied
    Drained,
    /// Delivery stopped making progress
    Stalled,
    Cancelled,
}

pub struct Ingestor {
    buffer: Arc<dyn RecordBuffer>,
    wakeup: WakeupSender,
    stats: Arc<DeliveryStats>,
    hostname: String,
    program: String,
    quiet: bool,
    drain_stall_ticks: u32,
    drain_grace: Duration,
}

impl Ingestor {
    pub fn new(
        buffer: Arc<dyn RecordBuffer>,
        wakeup: WakeupSender,
        stats: Arc<DeliveryStats>,
        hostname: String,
        config: &Config,
    ) -> Self {
        Self {
            buffer,
            wakeup,
            stats,
            hostname,
            program: config.program_name.clone(),
            quiet: config.quiet,
            drain_stall_ticks: config.drain_stall_ticks,
            drain_grace: config.drain_grace,
        }
    }

    /// Reads `input` line by line until end of input or cancellation,
    /// echoing each line to `echo` unless quiet and storing it as a record.
    pub async fn run<R, W>(
        &self,
        input: R,
        mut echo: W,
        cancel: &CancellationToken,
    ) -> IngestSummary
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut reader = BufReader::new(input);
        let mut line = Vec::with_capacity(4096);
        let mut summary = IngestSummary::default();

        loop {
            let read = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("INGEST | Cancelled, no longer reading input");
                    break;
                }
                read = read_line_capped(&mut reader, &mut line, MAX_LINE_LENGTH) => read,
            };

            let truncated = match read {
                Ok(Some(truncated)) => truncated,
                Ok(None) => {
                    debug!("INGEST | End of input");
                    break;
                }
                Err(e) => {
                    error!("INGEST | Error reading input: {}", e);
                    break;
                }
            };
            summary.lines += 1;

            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if truncated {
                warn!(
                    "INGEST | Line {} exceeds {} bytes and was truncated",
                    summary.lines, MAX_LINE_LENGTH
                );
            }

            if !self.quiet {
                if let Err(e) = echo_line(&mut echo, &line).await {
                    debug!("INGEST | Error echoing line: {}", e);
                }
            }

            let text = String::from_utf8_lossy(&line);
            let record = format_syslog(&Local::now(), &self.hostname, &self.program, &text);
            match self.buffer.write(record.as_bytes()) {
                Ok(_) => {
                    summary.written += 1;
                    self.wakeup.notify();
                }
                Err(e) => {
                    summary.failed += 1;
                    error!("INGEST | Error writing to buffer: {}", e);
                }
            }
        }

        summary
    }

    /// Waits for delivery to empty the buffer and its in-memory queue
    /// before shutdown.
    ///
    /// Polls every [`DRAIN_TICK`], re-signalling delivery each time, and gives
    /// up after `drain_stall_ticks` consecutive ticks without the backlog
    /// shrinking. Returns immediately once `cancel` fires.
    pub async fn drain_wait(
        &self,
        summary: &IngestSummary,
        cancel: &CancellationToken,
    ) -> DrainOutcome {
        if summary.written == 0 || self.backlog() == 0 {
            return DrainOutcome::Skipped;
        }
        if cancel.is_cancelled() {
            return DrainOutcome::Cancelled;
        }

        let mut last_backlog = self.backlog();
        info!(
            "INGEST | Input closed, waiting for {} bytes to be delivered",
            last_backlog
        );

        let mut ticker = tokio::time::interval(DRAIN_TICK);
        let mut stalled = 0;
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return DrainOutcome::Cancelled,
                _ = ticker.tick() => {}
            }

            let backlog = self.backlog();
            if backlog == 0 {
                info!("INGEST | Buffer drained");
                tokio::select! {
                    () = cancel.cancelled() => {}
                    () = tokio::time::sleep(self.drain_grace) => {}
                }
                return DrainOutcome::Drained;
            }

            self.wakeup.notify();
            if backlog < last_backlog {
                stalled = 0;
            } else {
                stalled += 1;
                if stalled >= self.drain_stall_ticks {
                    warn!(
                        "INGEST | No delivery progress, exiting with {} bytes undelivered",
                        backlog
                    );
                    return DrainOutcome::Stalled;
                }
            }
            last_backlog = backlog;
        }
    }

    /// Bytes still to deliver, whether in the buffer or queued in memory
    fn backlog(&self) -> u64 {
        self.buffer.size().saturating_add(self.stats.pending())
    }
}

async fn echo_line<W: AsyncWrite + Unpin>(echo: &mut W, line: &[u8]) -> io::Result<()> {
    echo.write_all(line).await?;
    echo.write_all(b"\n").await?;
    echo.flush().await
}

/// Reads one line into `buf` without its newline, keeping at most `max`
/// bytes and discarding the rest of the line.
///
/// Returns `None` at end of input, otherwise whether the line was truncated.
async fn read_line_capped<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max: usize,
) -> io::Result<Option<bool>> {
    buf.clear();
    let mut truncated = false;
    let mut read_any = false;

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(read_any.then_some(truncated));
        }
        read_any = true;

        let newline = available.iter().position(|&b| b == b'\n');
        let content = &available[..newline.unwrap_or(available.len())];
        let room = max.saturating_sub(buf.len());
        if content.len() > room {
            truncated = true;
        }
        buf.extend_from_slice(&content[..content.len().min(room)]);

        let consumed = newline.map_or(available.len(), |i| i + 1);
        reader.consume(consumed);
        if newline.is_some() {
            return Ok(Some(truncated));
        }
    }
}
