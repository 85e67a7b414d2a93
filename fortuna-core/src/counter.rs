// SPDX-License-Identifier: MIT
//
// Fortuna Pool: Continuously Reseeded Entropy Accumulator
// Copyright (c) 2025 Fortuna Pool Contributors

//! Large counter driving the counter-mode generator
//!
//! The counter is a byte buffer whose length is a positive multiple of 8,
//! read as little-endian 64-bit limbs with limb 0 least significant.

use crate::primitive::BlockPrimitive;
use crate::{Error, Result};
use zeroize::Zeroize;

const LIMB: usize = 8;

/// Arbitrary-width counter with wraparound-safe increment
#[derive(Debug, Clone)]
pub struct CypherCounter {
    bytes: Vec<u8>,
    disposed: bool,
}

impl CypherCounter {
    /// Create a zeroed counter of `size` bytes
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 || size % LIMB != 0 {
            return Err(Error::Config(format!(
                "Counter size must be a positive multiple of {}, got {}",
                LIMB, size
            )));
        }
        Ok(Self {
            bytes: vec![0u8; size],
            disposed: false,
        })
    }

    /// Create a counter of `size` bytes holding `initial` in its low limb
    pub fn with_value(size: usize, initial: u64) -> Result<Self> {
        let mut counter = Self::new(size)?;
        counter.add(initial);
        Ok(counter)
    }

    /// Counter size in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Current counter value
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Add one. Carries across limbs and wraps to zero after the last limb overflows.
    pub fn increment(&mut self) {
        self.add(1);
    }

    /// Encrypt the current value into block `block_index` of `output`, then increment
    pub fn encrypt_and_advance(
        &mut self,
        transform: &dyn BlockPrimitive,
        output: &mut [u8],
        block_index: usize,
    ) -> Result<()> {
        if self.disposed {
            return Err(Error::Disposed("CypherCounter"));
        }

        let block_size = transform.block_size();
        let start = block_index * block_size;
        let end = start + block_size;
        if end > output.len() {
            return Err(Error::Invariant(format!(
                "Block {} does not fit a {}-byte output buffer",
                block_index,
                output.len()
            )));
        }

        let written = transform.encrypt_block(&self.bytes, &mut output[start..end])?;
        if written != block_size {
            return Err(Error::Invariant(format!(
                "{} returned {} bytes for a {}-byte block",
                transform.name(),
                written,
                block_size
            )));
        }

        self.increment();
        Ok(())
    }

    /// Restore from a checkpoint and immediately add `random_salt`
    ///
    /// The restored counter never resumes at a previously used value.
    pub fn set_from_persisted(&mut self, persisted: &[u8], random_salt: u32) -> Result<()> {
        if self.disposed {
            return Err(Error::Disposed("CypherCounter"));
        }
        if persisted.len() != self.bytes.len() {
            return Err(Error::InvalidData(format!(
                "Persisted counter is {} bytes, expected {}",
                persisted.len(),
                self.bytes.len()
            )));
        }

        self.bytes.copy_from_slice(persisted);
        self.add(u64::from(random_salt));
        Ok(())
    }

    /// Zero the counter; any further encryption fails
    pub fn dispose(&mut self) {
        self.bytes.zeroize();
        self.disposed = true;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn add(&mut self, value: u64) {
        let mut carry = value;
        for limb in self.bytes.chunks_exact_mut(LIMB) {
            if carry == 0 {
                break;
            }
            let mut word = [0u8; LIMB];
            word.copy_from_slice(limb);
            let (sum, overflow) = u64::from_le_bytes(word).overflowing_add(carry);
            limb.copy_from_slice(&sum.to_le_bytes());
            carry = u64::from(overflow);
        }
    }
}

impl Drop for CypherCounter {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}
