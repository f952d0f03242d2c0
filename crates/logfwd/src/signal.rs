// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Coalescing wakeup signal from ingestion to delivery.
//!
//! A capacity-1 channel: the producer never blocks, and any number of
//! notifications sent before the consumer wakes collapse into one.

use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct WakeupSender {
    tx: mpsc::Sender<()>,
}

#[derive(Debug)]
pub struct WakeupReceiver {
    rx: mpsc::Receiver<()>,
}

#[must_use]
pub fn wakeup_channel() -> (WakeupSender, WakeupReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (WakeupSender { tx }, WakeupReceiver { rx })
}

impl WakeupSender {
    /// Signals that new data is available. Returns `false` when a wakeup was
    /// already pending (or the receiver is gone) and this one was dropped.
    pub fn notify(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

impl WakeupReceiver {
    /// Waits for the next wakeup. Returns `false` once every sender is gone.
    pub async fn wait(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }

    /// Consumes a pending wakeup without waiting.
    pub fn try_consume(&mut self) -> bool {
        self.rx.try_recv().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_notifications_coalesce() {
        let (tx, mut rx) = wakeup_channel();
        assert!(tx.notify());
        assert!(!tx.notify());
        assert!(!tx.notify());

        assert!(rx.wait().await);
        assert!(!rx.try_consume());
    }

    #[tokio::test]
    async fn test_wait_returns_false_when_senders_dropped() {
        let (tx, mut rx) = wakeup_channel();
        drop(tx);
        assert!(!rx.wait().await);
    }
}
