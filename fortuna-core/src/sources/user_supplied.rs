// SPDX-License-Identifier: MIT
//
// Fortuna Pool: Continuously Reseeded Entropy Accumulator
// Copyright (c) 2025 Fortuna Pool Contributors

//! Entropy pushed in by the host (UI events, packet timings, ...)

use crate::source::{AsyncHint, EntropySource, Priority};
use crate::Result;
use futures::future::{self, BoxFuture};
use parking_lot::Mutex;

/// Queues caller-supplied bytes until the next poll
#[derive(Debug)]
pub struct UserSuppliedSource {
    pending: Mutex<Vec<u8>>,
    max_pending: usize,
}

impl UserSuppliedSource {
    pub const DEFAULT_MAX_PENDING: usize = 64 * 1024;

    pub fn new() -> Self {
        Self::with_max_pending(Self::DEFAULT_MAX_PENDING)
    }

    /// Limit on queued bytes; older bytes are dropped first beyond it
    pub fn with_max_pending(max_pending: usize) -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            max_pending: max_pending.max(1),
        }
    }

    /// Queue bytes for the next poll
    pub fn supply(&self, bytes: &[u8]) {
        let mut pending = self.pending.lock();
        pending.extend_from_slice(bytes);
        if pending.len() > self.max_pending {
            let excess = pending.len() - self.max_pending;
            pending.drain(..excess);
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Default for UserSuppliedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl EntropySource for UserSuppliedSource {
    fn name(&self) -> &str {
        "UserSupplied"
    }

    fn async_hint(&self) -> AsyncHint {
        AsyncHint::Never
    }

    fn get_entropy(&self, _priority: Priority) -> BoxFuture<'_, Result<Option<Vec<u8>>>> {
        let taken = std::mem::take(&mut *self.pending.lock());
        let result = if taken.is_empty() { None } else { Some(taken) };
        Box::pin(future::ready(Ok(result)))
    }
}
