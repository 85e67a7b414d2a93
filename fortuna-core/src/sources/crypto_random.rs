// SPDX-License-Identifier: MIT
//
// Fortuna Pool: Continuously Reseeded Entropy Accumulator
// Copyright (c) 2025 Fortuna Pool Contributors

//! Operating system CSPRNG as an entropy source

use crate::source::{AsyncHint, EntropySource, Priority};
use crate::Result;
use futures::future::{self, BoxFuture};
use rand::rngs::OsRng;
use rand::RngCore;

/// Reads bytes from the operating system's generator
#[derive(Debug, Clone)]
pub struct CryptoRandomSource {
    sample_size: usize,
}

impl CryptoRandomSource {
    pub const DEFAULT_SAMPLE_SIZE: usize = 32;
    pub const MIN_SAMPLE_SIZE: usize = 8;
    pub const MAX_SAMPLE_SIZE: usize = 4096;

    pub fn new() -> Self {
        Self {
            sample_size: Self::DEFAULT_SAMPLE_SIZE,
        }
    }

    /// Bytes read per Normal-priority poll, clamped to `8..=4096`
    pub fn with_sample_size(sample_size: usize) -> Self {
        Self {
            sample_size: sample_size.clamp(Self::MIN_SAMPLE_SIZE, Self::MAX_SAMPLE_SIZE),
        }
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    fn bytes_for(&self, priority: Priority) -> usize {
        match priority {
            Priority::Low => (self.sample_size / 2).max(Self::MIN_SAMPLE_SIZE),
            Priority::Normal => self.sample_size,
            Priority::High => (self.sample_size * 2).min(Self::MAX_SAMPLE_SIZE),
        }
    }
}

impl Default for CryptoRandomSource {
    fn default() -> Self {
        Self::new()
    }
}

impl EntropySource for CryptoRandomSource {
    fn name(&self) -> &str {
        "CryptoRandom"
    }

    fn async_hint(&self) -> AsyncHint {
        AsyncHint::Never
    }

    fn get_entropy(&self, priority: Priority) -> BoxFuture<'_, Result<Option<Vec<u8>>>> {
        let mut bytes = vec![0u8; self.bytes_for(priority)];
        OsRng.fill_bytes(&mut bytes);
        Box::pin(future::ready(Ok(Some(bytes))))
    }
}
