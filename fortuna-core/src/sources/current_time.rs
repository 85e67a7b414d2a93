// SPDX-License-Identifier: MIT
//
// Fortuna Pool: Continuously Reseeded Entropy Accumulator
// Copyright (c) 2025 Fortuna Pool Contributors

//! Wall clock and monotonic clock readings
//!
//! Only the low-order bits carry anything unpredictable; the accumulator's
//! hashing takes care of the rest.

use crate::source::{AsyncHint, EntropySource, Priority};
use crate::Result;
use chrono::Utc;
use futures::future::{self, BoxFuture};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct CurrentTimeSource {
    started: Instant,
}

impl CurrentTimeSource {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for CurrentTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl EntropySource for CurrentTimeSource {
    fn name(&self) -> &str {
        "CurrentTime"
    }

    fn async_hint(&self) -> AsyncHint {
        AsyncHint::Never
    }

    fn get_entropy(&self, _priority: Priority) -> BoxFuture<'_, Result<Option<Vec<u8>>>> {
        let wall = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let ticks = self.started.elapsed().as_nanos() as u64;

        let mut bytes = Vec::with_capacity(16);
        bytes.extend_from_slice(&wall.to_le_bytes());
        bytes.extend_from_slice(&ticks.to_le_bytes());
        Box::pin(future::ready(Ok(Some(bytes))))
    }
}
