// SPDX-License-Identifier: MIT
//
// Fortuna Pool: Continuously Reseeded Entropy Accumulator
// Copyright (c) 2025 Fortuna Pool Contributors

//! Counter-mode block generator
//!
//! Serves an unbounded byte stream by encrypting successive counter values
//! under the current key. Bytes are produced a buffer at a time; a reseed
//! discards whatever is left of the buffer so no output spans two keys.

use crate::counter::CypherCounter;
use crate::kdf::derive_key;
use crate::primitive::BlockPrimitive;
use crate::{Error, Result};
use rand::{CryptoRng, RngCore};
use tracing::debug;
use uuid::Uuid;
use zeroize::{Zeroize, Zeroizing};

/// Default output buffer size in bytes
pub const DEFAULT_BUFFER_BYTES: usize = 1024;

/// Counter-mode generator keyed from accumulator seeds
pub struct BlockGenerator {
    primitive: Box<dyn BlockPrimitive>,
    counter: CypherCounter,
    key: Zeroizing<Vec<u8>>,
    buffer: Vec<u8>,
    position: usize,
    seeded: bool,
    disposed: bool,
    reseed_count: u64,
    bytes_since_reseed: u64,
    total_bytes_generated: u64,
}

impl std::fmt::Debug for BlockGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockGenerator")
            .field("primitive", &self.primitive.name())
            .field("seeded", &self.seeded)
            .field("reseed_count", &self.reseed_count)
            .field("total_bytes_generated", &self.total_bytes_generated)
            .finish()
    }
}

impl BlockGenerator {
    /// Create an unseeded generator; the buffer is rounded up to whole blocks
    pub fn new(primitive: Box<dyn BlockPrimitive>, buffer_bytes: usize) -> Result<Self> {
        let block_size = primitive.block_size();
        if block_size == 0 {
            return Err(Error::Config("Primitive block size must be non-zero".to_string()));
        }
        if buffer_bytes == 0 {
            return Err(Error::Config("Output buffer must be non-zero".to_string()));
        }

        let blocks = buffer_bytes.div_ceil(block_size);
        let counter_size = block_size.div_ceil(8) * 8;
        let buffer = vec![0u8; blocks * block_size];

        Ok(Self {
            key: Zeroizing::new(vec![0u8; primitive.key_size()]),
            primitive,
            counter: CypherCounter::new(counter_size)?,
            position: buffer.len(),
            buffer,
            seeded: false,
            disposed: false,
            reseed_count: 0,
            bytes_since_reseed: 0,
            total_bytes_generated: 0,
        })
    }

    /// Create a generator and key it from `seed` in one step
    pub fn from_seed(primitive: Box<dyn BlockPrimitive>, seed: &[u8]) -> Result<Self> {
        let mut generator = Self::new(primitive, DEFAULT_BUFFER_BYTES)?;
        generator.reseed(seed)?;
        Ok(generator)
    }

    /// Re-key from new seed material
    ///
    /// The new key is derived from the old key and `seed`. The counter keeps
    /// running so no (key, counter) pair repeats; unread output is discarded.
    pub fn reseed(&mut self, seed: &[u8]) -> Result<()> {
        self.ensure_live()?;
        let key = derive_key(&self.key, seed, self.primitive.key_size())?;
        self.primitive.set_key(&key)?;
        self.key = key;
        self.buffer.zeroize();
        self.position = self.buffer.len();
        self.seeded = true;
        self.reseed_count += 1;
        self.bytes_since_reseed = 0;
        debug!(
            primitive = self.primitive.name(),
            reseed_count = self.reseed_count,
            "Block generator re-keyed"
        );
        Ok(())
    }

    /// Fill `dest` with random bytes, refilling the buffer as often as needed
    pub fn try_fill(&mut self, dest: &mut [u8]) -> Result<()> {
        self.ensure_live()?;
        if !self.seeded {
            return Err(Error::NotSeeded);
        }

        let mut written = 0;
        while written < dest.len() {
            if self.position == self.buffer.len() {
                self.refill()?;
            }
            let take = (dest.len() - written).min(self.buffer.len() - self.position);
            dest[written..written + take]
                .copy_from_slice(&self.buffer[self.position..self.position + take]);
            self.buffer[self.position..self.position + take].zeroize();
            self.position += take;
            written += take;
        }

        self.bytes_since_reseed += dest.len() as u64;
        self.total_bytes_generated += dest.len() as u64;
        Ok(())
    }

    /// Allocate and fill `count` random bytes
    pub fn random_bytes(&mut self, count: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; count];
        self.try_fill(&mut out)?;
        Ok(out)
    }

    pub fn next_bool(&mut self) -> Result<bool> {
        let mut b = [0u8; 1];
        self.try_fill(&mut b)?;
        Ok(b[0] & 1 == 1)
    }

    pub fn next_u32(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        self.try_fill(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    pub fn next_u64(&mut self) -> Result<u64> {
        let mut b = [0u8; 8];
        self.try_fill(&mut b)?;
        Ok(u64::from_le_bytes(b))
    }

    /// Uniform value in `[0, bound)` by rejection sampling
    pub fn next_u32_below(&mut self, bound: u32) -> Result<u32> {
        if bound == 0 {
            return Err(Error::Config("Upper bound must be non-zero".to_string()));
        }
        // Largest multiple of `bound` representable; draws at or above it are biased
        let zone = u32::MAX - (u32::MAX % bound + 1) % bound;
        loop {
            let v = self.next_u32()?;
            if v <= zone {
                return Ok(v % bound);
            }
        }
    }

    /// Uniform value in `[0, bound)` by rejection sampling
    pub fn next_u64_below(&mut self, bound: u64) -> Result<u64> {
        if bound == 0 {
            return Err(Error::Config("Upper bound must be non-zero".to_string()));
        }
        let zone = u64::MAX - (u64::MAX % bound + 1) % bound;
        loop {
            let v = self.next_u64()?;
            if v <= zone {
                return Ok(v % bound);
            }
        }
    }

    /// Uniform value in `[min, max)`
    pub fn next_i64_in_range(&mut self, min: i64, max: i64) -> Result<i64> {
        if min >= max {
            return Err(Error::Config(format!("Empty range {}..{}", min, max)));
        }
        let span = max.wrapping_sub(min) as u64;
        let offset = self.next_u64_below(span)?;
        Ok(min.wrapping_add(offset as i64))
    }

    /// Uniform float in `[0, 1)` with 24 bits of precision
    pub fn next_f32(&mut self) -> Result<f32> {
        Ok((self.next_u32()? >> 8) as f32 * (1.0 / (1u32 << 24) as f32))
    }

    /// Uniform float in `[0, 1)` with 53 bits of precision
    pub fn next_f64(&mut self) -> Result<f64> {
        Ok((self.next_u64()? >> 11) as f64 * (1.0 / (1u64 << 53) as f64))
    }

    /// Random (version 4) UUID
    pub fn next_uuid(&mut self) -> Result<Uuid> {
        let mut b = [0u8; 16];
        self.try_fill(&mut b)?;
        Ok(uuid::Builder::from_random_bytes(b).into_uuid())
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    pub fn reseed_count(&self) -> u64 {
        self.reseed_count
    }

    pub fn bytes_since_reseed(&self) -> u64 {
        self.bytes_since_reseed
    }

    pub fn total_bytes_generated(&self) -> u64 {
        self.total_bytes_generated
    }

    pub fn block_size(&self) -> usize {
        self.primitive.block_size()
    }

    pub fn key_size(&self) -> usize {
        self.primitive.key_size()
    }

    /// Current counter value for checkpointing
    pub fn counter_bytes(&self) -> Vec<u8> {
        self.counter.as_bytes().to_vec()
    }

    /// Restore the counter from a checkpoint, offset by a fresh random salt
    pub fn restore_counter(&mut self, persisted: &[u8]) -> Result<()> {
        self.ensure_live()?;
        let salt = rand::rngs::OsRng.next_u32();
        self.counter.set_from_persisted(persisted, salt)?;
        self.position = self.buffer.len();
        Ok(())
    }

    /// Zero key, counter and buffered output; further use fails
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.key.zeroize();
        self.primitive.clear_key();
        self.counter.dispose();
        self.buffer.zeroize();
        self.position = self.buffer.len();
        self.seeded = false;
        self.disposed = true;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn refill(&mut self) -> Result<()> {
        let blocks = self.buffer.len() / self.primitive.block_size();
        for index in 0..blocks {
            self.counter
                .encrypt_and_advance(self.primitive.as_ref(), &mut self.buffer, index)?;
        }
        self.position = 0;
        Ok(())
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed {
            return Err(Error::Disposed("BlockGenerator"));
        }
        Ok(())
    }
}

impl Drop for BlockGenerator {
    fn drop(&mut self) {
        self.buffer.zeroize();
    }
}

/// Plugs the generator into the `rand` ecosystem. The infallible methods
/// panic when the generator is unseeded or disposed.
impl RngCore for BlockGenerator {
    fn next_u32(&mut self) -> u32 {
        let mut b = [0u8; 4];
        self.fill_bytes(&mut b);
        u32::from_le_bytes(b)
    }

    fn next_u64(&mut self) -> u64 {
        let mut b = [0u8; 8];
        self.fill_bytes(&mut b);
        u64::from_le_bytes(b)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        if let Err(e) = self.try_fill(dest) {
            panic!("BlockGenerator cannot produce output: {}", e);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
        self.try_fill(dest).map_err(rand::Error::new)
    }
}

impl CryptoRng for BlockGenerator {}
