// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Join-style shutdown tracking.
//!
//! Long-lived workers take a [`ShutdownGuard`] from their owner's
//! [`ShutdownGroup`] when they start and drop it when they exit. The owner's
//! `close()` then awaits [`ShutdownGroup::wait`] so no worker outlives it.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct ShutdownGroup {
    active: Arc<watch::Sender<usize>>,
}

impl Default for ShutdownGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownGroup {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        ShutdownGroup {
            active: Arc::new(tx),
        }
    }

    /// Registers one worker. The registration ends when the guard is dropped.
    #[must_use]
    pub fn register(&self) -> ShutdownGuard {
        self.active.send_modify(|n| *n += 1);
        ShutdownGuard {
            active: Arc::clone(&self.active),
        }
    }

    pub fn active(&self) -> usize {
        *self.active.borrow()
    }

    /// Resolves once every registered worker has deregistered.
    pub async fn wait(&self) {
        let mut rx = self.active.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

#[derive(Debug)]
pub struct ShutdownGuard {
    active: Arc<watch::Sender<usize>>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.active.send_modify(|n| *n = n.saturating_sub(1));
    }
}
