// SPDX-License-Identifier: MIT
//
// Fortuna Pool: Continuously Reseeded Entropy Accumulator
// Copyright (c) 2025 Fortuna Pool Contributors

//! Scheduler and CPU timing jitter
//!
//! Times a short busy loop followed by a yield back to the runtime and keeps
//! the low byte of each measurement. Cache misses, preemption and the other
//! tasks on the runtime all perturb the result.

use crate::source::{AsyncHint, EntropySource, Priority};
use crate::Result;
use futures::future::BoxFuture;
use std::hint::black_box;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct TimerJitterSource {
    samples: usize,
}

impl TimerJitterSource {
    pub const DEFAULT_SAMPLES: usize = 32;

    pub fn new() -> Self {
        Self {
            samples: Self::DEFAULT_SAMPLES,
        }
    }

    /// Measurements per Normal-priority poll, clamped to `4..=1024`
    pub fn with_samples(samples: usize) -> Self {
        Self {
            samples: samples.clamp(4, 1024),
        }
    }

    fn samples_for(&self, priority: Priority) -> usize {
        match priority {
            Priority::Low => (self.samples / 2).max(4),
            Priority::Normal => self.samples,
            Priority::High => self.samples * 2,
        }
    }

    fn spin(rounds: u64) -> u64 {
        let mut x = 0u64;
        for i in 0..rounds {
            x = black_box(x.wrapping_mul(6364136223846793005).wrapping_add(i));
        }
        x
    }
}

impl Default for TimerJitterSource {
    fn default() -> Self {
        Self::new()
    }
}

impl EntropySource for TimerJitterSource {
    fn name(&self) -> &str {
        "TimerJitter"
    }

    fn async_hint(&self) -> AsyncHint {
        AsyncHint::Always
    }

    fn get_entropy(&self, priority: Priority) -> BoxFuture<'_, Result<Option<Vec<u8>>>> {
        let samples = self.samples_for(priority);
        Box::pin(async move {
            let mut bytes = Vec::with_capacity(samples);
            let mut previous = 0u64;
            for _ in 0..samples {
                let start = Instant::now();
                let spun = Self::spin(64 + (previous & 0x3F));
                tokio::task::yield_now().await;
                let elapsed = start.elapsed().as_nanos() as u64;
                bytes.push((elapsed ^ (elapsed >> 8) ^ spun) as u8);
                previous = elapsed;
            }
            Ok(Some(bytes))
        })
    }
}
