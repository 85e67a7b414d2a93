// SPDX-License-Identifier: MIT
//
// Fortuna Pool: Continuously Reseeded Entropy Accumulator
// Copyright (c) 2025 Fortuna Pool Contributors

//! Entropy accumulator: fan-in across pools, fan-out into seeds
//!
//! Pools come in two kinds. Linear pool `i` contributes to a seed when `2^i`
//! divides the reseed count, so higher pools hold entropy back for
//! exponentially longer. Random pools contribute when their bit is set in a
//! mask formed by ANDing several draws from an auxiliary PRNG.
//!
//! Incoming events are cut into 16-byte chunks and dealt round-robin across
//! the flattened pool list (linear pools first), so one large event reaches
//! many pools and no single pool can be starved by a hostile source.

use crate::persist::PersistentItemCollection;
use crate::pool::{EntropyPool, PoolHash};
use crate::{Error, Result};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::Serialize;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Bytes per chunk when distributing an event
pub const CHUNK_SIZE: usize = 16;

/// Upper bound on pools of each kind (one mask bit per pool)
pub const MAX_POOLS_PER_KIND: usize = 64;

/// Lower bound on linear + random pools
pub const MIN_TOTAL_POOLS: usize = 4;

/// Default number of extra draws ANDed into the random pool mask
pub const DEFAULT_RANDOM_FACTOR: u32 = 2;

/// Upper bound on the random factor
pub const MAX_RANDOM_FACTOR: u32 = 30;

/// Upper bound on the random factor when there are no linear pools
pub const MAX_RANDOM_FACTOR_WITHOUT_LINEAR: u32 = 8;

/// Namespace used in persistent state
pub const NAMESPACE: &str = "EntropyAccumulator";

// Persisted pool counts below these are treated as truncated or tampered
const MIN_IMPORT_LINEAR: u64 = 6;
const MIN_IMPORT_RANDOM: u64 = 4;
const MIN_IMPORT_TOTAL: u64 = 16;

/// Entropy produced by one poll of one source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntropyEvent {
    pub data: Vec<u8>,
    pub source: String,
}

impl EntropyEvent {
    pub fn new(data: impl Into<Vec<u8>>, source: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            source: source.into(),
        }
    }
}

/// Pool layout of an accumulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccumulatorConfig {
    pub linear_pool_count: usize,
    pub random_pool_count: usize,
    pub random_factor: u32,
    pub hash: PoolHash,
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self {
            linear_pool_count: 28,
            random_pool_count: 12,
            random_factor: DEFAULT_RANDOM_FACTOR,
            hash: PoolHash::default(),
        }
    }
}

impl AccumulatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.linear_pool_count > MAX_POOLS_PER_KIND || self.random_pool_count > MAX_POOLS_PER_KIND {
            return Err(Error::Config(format!(
                "At most {} linear and {} random pools are supported",
                MAX_POOLS_PER_KIND, MAX_POOLS_PER_KIND
            )));
        }
        if self.linear_pool_count + self.random_pool_count < MIN_TOTAL_POOLS {
            return Err(Error::Config(format!(
                "At least {} pools are required, got {} linear + {} random",
                MIN_TOTAL_POOLS, self.linear_pool_count, self.random_pool_count
            )));
        }
        if self.random_factor > MAX_RANDOM_FACTOR {
            return Err(Error::Config(format!(
                "random_factor must be at most {}",
                MAX_RANDOM_FACTOR
            )));
        }
        if self.linear_pool_count == 0 && self.random_factor > MAX_RANDOM_FACTOR_WITHOUT_LINEAR {
            return Err(Error::Config(format!(
                "random_factor must be at most {} without linear pools",
                MAX_RANDOM_FACTOR_WITHOUT_LINEAR
            )));
        }
        Ok(())
    }
}

/// Observability counters; none of these affect seed derivation
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct AccumulatorStats {
    pub linear_pool_count: usize,
    pub random_pool_count: usize,
    pub reseed_count: u64,
    pub total_reseed_events: u64,
    pub total_entropy_bytes: u64,
    pub available_entropy_bytes_since_last_seed: u64,
    pub pool_zero_entropy_bytes: u64,
    pub min_pool_entropy_bytes: u64,
    pub max_pool_entropy_bytes: u64,
    pub last_linear_pools_used: u64,
    pub last_random_pools_used: u64,
}

/// Fortuna-style entropy accumulator with linear and random pools
pub struct EntropyAccumulator {
    config: AccumulatorConfig,
    linear: Vec<EntropyPool>,
    random: Vec<EntropyPool>,
    rng: Option<Box<dyn RngCore + Send>>,
    cursor: usize,
    reseed_count: u64,
    total_reseed_events: u64,
    total_entropy_bytes: u64,
    available_since_last_seed: u64,
    last_linear_mask: u64,
    last_random_mask: u64,
    disposed: bool,
}

impl EntropyAccumulator {
    /// Create an accumulator. `rng` is required whenever random pools exist.
    pub fn new(config: AccumulatorConfig, rng: Option<Box<dyn RngCore + Send>>) -> Result<Self> {
        config.validate()?;
        if config.random_pool_count > 0 && rng.is_none() {
            return Err(Error::Config(
                "Random pools require an auxiliary PRNG".to_string(),
            ));
        }

        Ok(Self {
            linear: make_pools(config.linear_pool_count, 0, config.hash),
            random: make_pools(config.random_pool_count, config.linear_pool_count, config.hash),
            config,
            rng,
            cursor: 0,
            reseed_count: 0,
            total_reseed_events: 0,
            total_entropy_bytes: 0,
            available_since_last_seed: 0,
            last_linear_mask: 0,
            last_random_mask: 0,
            disposed: false,
        })
    }

    /// Create an accumulator whose auxiliary PRNG is seeded from the OS
    pub fn with_system_rng(config: AccumulatorConfig) -> Result<Self> {
        let rng: Option<Box<dyn RngCore + Send>> = if config.random_pool_count > 0 {
            Some(Box::new(StdRng::from_entropy()))
        } else {
            None
        };
        Self::new(config, rng)
    }

    pub fn linear_pool_count(&self) -> usize {
        self.linear.len()
    }

    pub fn random_pool_count(&self) -> usize {
        self.random.len()
    }

    pub fn total_pool_count(&self) -> usize {
        self.linear.len() + self.random.len()
    }

    pub fn reseed_count(&self) -> u64 {
        self.reseed_count
    }

    /// Bytes in the first pool since it last contributed to a seed
    pub fn pool_zero_entropy_bytes(&self) -> u64 {
        self.linear
            .first()
            .or_else(|| self.random.first())
            .map_or(0, EntropyPool::bytes_since_digest)
    }

    /// Lifetime bytes per pool, in flattened order
    pub fn pool_entropy_bytes(&self) -> Vec<u64> {
        self.pools().map(EntropyPool::total_bytes).collect()
    }

    /// Distribute an event across the pools in 16-byte chunks
    pub fn add(&mut self, event: &EntropyEvent) -> Result<()> {
        self.ensure_live()?;
        let total = self.total_pool_count();
        for chunk in event.data.chunks(CHUNK_SIZE) {
            self.pool_mut(self.cursor).add(chunk, &event.source)?;
            self.cursor = (self.cursor + 1) % total;
        }
        self.total_entropy_bytes += event.data.len() as u64;
        self.available_since_last_seed += event.data.len() as u64;
        Ok(())
    }

    /// Derive the next seed from the pools selected for this reseed
    pub fn next_seed(&mut self) -> Result<Zeroizing<Vec<u8>>> {
        self.ensure_live()?;
        self.reseed_count = self.reseed_count.wrapping_add(1);

        let linear_mask = self.linear_mask();
        let random_mask = self.random_mask(linear_mask != 0);

        let contributing = (linear_mask.count_ones() + random_mask.count_ones()) as usize;
        let mut seed = Zeroizing::new(Vec::with_capacity(contributing * self.config.hash.digest_size()));
        for (i, pool) in self.linear.iter_mut().enumerate() {
            if linear_mask & (1u64 << i) != 0 {
                seed.extend_from_slice(&pool.get_digest()?);
            }
        }
        for (i, pool) in self.random.iter_mut().enumerate() {
            if random_mask & (1u64 << i) != 0 {
                seed.extend_from_slice(&pool.get_digest()?);
            }
        }

        self.last_linear_mask = linear_mask;
        self.last_random_mask = random_mask;
        self.total_reseed_events += 1;
        self.available_since_last_seed = 0;

        debug!(
            reseed_count = self.reseed_count,
            linear_pools = linear_mask,
            random_pools = random_mask,
            seed_bytes = seed.len(),
            "Derived seed"
        );
        Ok(seed)
    }

    /// Throw away the first pool's pending entropy without using it
    pub fn reset_pool_zero(&mut self) -> Result<()> {
        self.ensure_live()?;
        if self.total_pool_count() > 0 {
            self.pool_mut(0).get_digest()?;
        }
        Ok(())
    }

    pub fn stats(&self) -> AccumulatorStats {
        let totals = self.pool_entropy_bytes();
        AccumulatorStats {
            linear_pool_count: self.linear.len(),
            random_pool_count: self.random.len(),
            reseed_count: self.reseed_count,
            total_reseed_events: self.total_reseed_events,
            total_entropy_bytes: self.total_entropy_bytes,
            available_entropy_bytes_since_last_seed: self.available_since_last_seed,
            pool_zero_entropy_bytes: self.pool_zero_entropy_bytes(),
            min_pool_entropy_bytes: totals.iter().copied().min().unwrap_or(0),
            max_pool_entropy_bytes: totals.iter().copied().max().unwrap_or(0),
            last_linear_pools_used: self.last_linear_mask,
            last_random_pools_used: self.last_random_mask,
        }
    }

    /// Export counters and every pool's state
    pub fn write_state(&self, items: &mut PersistentItemCollection) -> Result<()> {
        self.ensure_live()?;
        items.set_u64(NAMESPACE, "TotalReseedEvents", self.total_reseed_events)?;
        items.set_u64(NAMESPACE, "ReseedCount", self.reseed_count)?;
        items.set_u64(NAMESPACE, "TotalEntropyBytes", self.total_entropy_bytes)?;
        items.set_u64(NAMESPACE, "LinearPoolCount", self.linear.len() as u64)?;
        items.set_u64(NAMESPACE, "RandomPoolCount", self.random.len() as u64)?;
        for (i, pool) in self.linear.iter().enumerate() {
            pool.write_state(items, NAMESPACE, &format!("LinearPool.{}.", i))?;
        }
        for (i, pool) in self.random.iter().enumerate() {
            pool.write_state(items, NAMESPACE, &format!("RandomPool.{}.", i))?;
        }
        Ok(())
    }

    /// Import state written by `write_state`
    ///
    /// Counters are always restored. Pools are restored when the persisted
    /// layout matches this accumulator exactly, or when it is large enough to
    /// be trusted, in which case the persisted layout replaces the configured
    /// one. Otherwise the pools start fresh. Returns whether pools were restored.
    pub fn read_state(&mut self, items: &PersistentItemCollection) -> Result<bool> {
        self.ensure_live()?;
        let (Some(linear), Some(random)) = (
            items.get_u64(NAMESPACE, "LinearPoolCount")?,
            items.get_u64(NAMESPACE, "RandomPoolCount")?,
        ) else {
            debug!("No accumulator state to restore");
            return Ok(false);
        };

        self.reseed_count = items.get_u64(NAMESPACE, "ReseedCount")?.unwrap_or(0);
        self.total_reseed_events = items.get_u64(NAMESPACE, "TotalReseedEvents")?.unwrap_or(0);
        self.total_entropy_bytes = items.get_u64(NAMESPACE, "TotalEntropyBytes")?.unwrap_or(0);

        let exact = linear == self.linear.len() as u64 && random == self.random.len() as u64;
        if !exact {
            let trusted = linear >= MIN_IMPORT_LINEAR
                && random >= MIN_IMPORT_RANDOM
                && linear + random >= MIN_IMPORT_TOTAL
                && linear <= MAX_POOLS_PER_KIND as u64
                && random <= MAX_POOLS_PER_KIND as u64
                && self.rng.is_some();
            if !trusted {
                warn!(
                    persisted_linear = linear,
                    persisted_random = random,
                    "Persisted pool layout rejected, starting with fresh pools"
                );
                return Ok(false);
            }

            info!(
                from_linear = self.linear.len(),
                from_random = self.random.len(),
                to_linear = linear,
                to_random = random,
                "Adopting persisted pool layout"
            );
            self.config.linear_pool_count = linear as usize;
            self.config.random_pool_count = random as usize;
            self.linear = make_pools(linear as usize, 0, self.config.hash);
            self.random = make_pools(random as usize, linear as usize, self.config.hash);
            self.cursor = 0;
        }

        for (i, pool) in self.linear.iter_mut().enumerate() {
            pool.read_state(items, NAMESPACE, &format!("LinearPool.{}.", i))?;
        }
        for (i, pool) in self.random.iter_mut().enumerate() {
            pool.read_state(items, NAMESPACE, &format!("RandomPool.{}.", i))?;
        }
        Ok(true)
    }

    /// Zero all pools and drop the auxiliary PRNG; further use fails
    pub fn dispose(&mut self) {
        for pool in self.linear.iter_mut().chain(self.random.iter_mut()) {
            pool.dispose();
        }
        self.rng = None;
        self.disposed = true;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn linear_mask(&self) -> u64 {
        let r = self.reseed_count;
        (0..self.linear.len())
            // `r mod 2^i == 0`; r == 0 after wraparound includes every pool
            .filter(|&i| r.trailing_zeros() as usize >= i)
            .fold(0u64, |mask, i| mask | (1u64 << i))
    }

    fn random_mask(&mut self, linear_contributed: bool) -> u64 {
        let count = self.random.len();
        let Some(rng) = self.rng.as_mut() else {
            return 0;
        };
        if count == 0 {
            return 0;
        }

        let pool_bits = if count == 64 { u64::MAX } else { (1u64 << count) - 1 };
        loop {
            let mut mask = u64::MAX;
            for _ in 0..=self.config.random_factor {
                mask &= rng.next_u64();
            }
            mask &= pool_bits;
            if linear_contributed || mask != 0 {
                return mask;
            }
        }
    }

    fn pools(&self) -> impl Iterator<Item = &EntropyPool> {
        self.linear.iter().chain(self.random.iter())
    }

    fn pool_mut(&mut self, index: usize) -> &mut EntropyPool {
        let linear = self.linear.len();
        if index < linear {
            &mut self.linear[index]
        } else {
            &mut self.random[index - linear]
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed {
            return Err(Error::Disposed("EntropyAccumulator"));
        }
        Ok(())
    }
}

fn make_pools(count: usize, first_index: usize, hash: PoolHash) -> Vec<EntropyPool> {
    (0..count)
        .map(|i| EntropyPool::new(first_index + i, hash))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config(linear: usize, random: usize) -> AccumulatorConfig {
        AccumulatorConfig {
            linear_pool_count: linear,
            random_pool_count: random,
            random_factor: DEFAULT_RANDOM_FACTOR,
            hash: PoolHash::Sha512,
        }
    }

    fn fixed(linear: usize, random: usize, seed: u64) -> EntropyAccumulator {
        let rng: Option<Box<dyn RngCore + Send>> = if random > 0 {
            Some(Box::new(StdRng::seed_from_u64(seed)))
        } else {
            None
        };
        EntropyAccumulator::new(config(linear, random), rng).unwrap()
    }

    #[test]
    fn test_configuration_errors() {
        assert!(EntropyAccumulator::with_system_rng(config(2, 1)).is_err());
        assert!(EntropyAccumulator::with_system_rng(config(65, 0)).is_err());
        assert!(EntropyAccumulator::with_system_rng(config(4, 65)).is_err());
        assert!(EntropyAccumulator::new(config(4, 4), None).is_err());
        assert!(EntropyAccumulator::new(config(4, 0), None).is_ok());

        let mut heavy = config(0, 8);
        heavy.random_factor = 9;
        assert!(heavy.validate().is_err());
        heavy.linear_pool_count = 4;
        assert!(heavy.validate().is_ok());
    }

    #[test]
    fn test_chunking() {
        let mut acc = fixed(4, 0, 0);
        acc.add(&EntropyEvent::new(vec![1u8; 48], "test")).unwrap();
        assert_eq!(acc.pool_entropy_bytes(), vec![16, 16, 16, 0]);

        acc.add(&EntropyEvent::new(vec![2u8; 20], "test")).unwrap();
        assert_eq!(acc.pool_entropy_bytes(), vec![20, 16, 16, 16]);
        assert_eq!(acc.stats().available_entropy_bytes_since_last_seed, 68);
    }

    #[test]
    fn test_empty_event_is_harmless() {
        let mut acc = fixed(4, 0, 0);
        acc.add(&EntropyEvent::new(Vec::new(), "empty")).unwrap();
        assert_eq!(acc.pool_entropy_bytes(), vec![0; 4]);
    }

    #[test]
    fn test_seed_never_empty() {
        let mut strict = fixed(4, 0, 0);
        let mut random_only = fixed(0, 4, 11);
        for _ in 0..64 {
            assert!(!strict.next_seed().unwrap().is_empty());
            let seed = random_only.next_seed().unwrap();
            assert!(!seed.is_empty());
            assert_eq!(seed.len() % 64, 0);
        }
    }

    #[test]
    fn test_linear_schedule() {
        let mut acc = fixed(4, 0, 0);
        let expected = [0b0001, 0b0011, 0b0001, 0b0111, 0b0001, 0b0011, 0b0001, 0b1111];
        for mask in expected {
            let seed = acc.next_seed().unwrap();
            assert_eq!(acc.stats().last_linear_pools_used, mask);
            assert_eq!(seed.len(), mask.count_ones() as usize * 64);
        }
    }

    #[test]
    fn test_reseed_count_wraps() {
        let mut acc = fixed(8, 0, 0);
        acc.reseed_count = u64::MAX;
        acc.next_seed().unwrap();
        assert_eq!(acc.reseed_count(), 0);
        assert_eq!(acc.stats().last_linear_pools_used, 0xFF);
    }

    #[test]
    fn test_fixed_rng_scenario() {
        let run = || {
            let mut acc = fixed(4, 4, 1234);
            for _ in 0..3 {
                acc.add(&EntropyEvent::new(vec![0x5A; 48], "test")).unwrap();
            }
            let first = acc.next_seed().unwrap();
            let first_stats = acc.stats();
            let second = acc.next_seed().unwrap();
            let second_stats = acc.stats();
            (first, first_stats, second, second_stats)
        };

        let (first, s1, second, s2) = run();
        assert_eq!(s1.last_linear_pools_used & 1, 1);
        assert_eq!(s2.last_linear_pools_used & 1, 1);
        assert_eq!(s1.last_linear_pools_used, 0b01);
        assert_eq!(s2.last_linear_pools_used, 0b11);
        let expected_len = |s: &AccumulatorStats| {
            (s.last_linear_pools_used.count_ones() + s.last_random_pools_used.count_ones()) as usize * 64
        };
        assert_eq!(first.len(), expected_len(&s1));
        assert_eq!(second.len(), expected_len(&s2));

        let (again_first, r1, again_second, r2) = run();
        assert_eq!(*first, *again_first);
        assert_eq!(*second, *again_second);
        assert_eq!(s1, r1);
        assert_eq!(s2, r2);
    }

    #[test]
    fn test_reset_pool_zero() {
        let mut acc = fixed(4, 0, 0);
        acc.add(&EntropyEvent::new(vec![9u8; 16], "t")).unwrap();
        assert_eq!(acc.pool_zero_entropy_bytes(), 16);
        acc.reset_pool_zero().unwrap();
        assert_eq!(acc.pool_zero_entropy_bytes(), 0);
    }

    #[test]
    fn test_state_round_trip() {
        let mut acc = fixed(8, 8, 1);
        for i in 0..20u8 {
            acc.add(&EntropyEvent::new(vec![i; 40], "t")).unwrap();
        }
        acc.next_seed().unwrap();
        acc.next_seed().unwrap();
        acc.add(&EntropyEvent::new(vec![1; 16], "t")).unwrap();

        let mut items = PersistentItemCollection::new();
        acc.write_state(&mut items).unwrap();
        assert_eq!(items.get_u64(NAMESPACE, "ReseedCount").unwrap(), Some(2));
        assert!(items.get(NAMESPACE, "RandomPool.7.TotalEntropyBytes").is_some());

        let mut restored = fixed(8, 8, 2);
        assert!(restored.read_state(&items).unwrap());
        assert_eq!(restored.reseed_count(), 2);
        assert_eq!(restored.pool_entropy_bytes(), acc.pool_entropy_bytes());
        assert_eq!(restored.pool_zero_entropy_bytes(), acc.pool_zero_entropy_bytes());
    }

    #[test]
    fn test_small_persisted_layout_rejected() {
        let mut items = PersistentItemCollection::new();
        fixed(5, 3, 1).write_state(&mut items).unwrap();

        let mut acc = fixed(8, 8, 2);
        assert!(!acc.read_state(&items).unwrap());
        assert_eq!(acc.linear_pool_count(), 8);
        assert_eq!(acc.random_pool_count(), 8);
    }

    #[test]
    fn test_large_persisted_layout_adopted() {
        let mut items = PersistentItemCollection::new();
        fixed(6, 10, 1).write_state(&mut items).unwrap();

        let mut acc = fixed(8, 8, 2);
        assert!(acc.read_state(&items).unwrap());
        assert_eq!(acc.linear_pool_count(), 6);
        assert_eq!(acc.random_pool_count(), 10);
    }

    #[test]
    fn test_missing_state_is_ignored() {
        let mut acc = fixed(4, 0, 0);
        assert!(!acc.read_state(&PersistentItemCollection::new()).unwrap());
    }

    #[test]
    fn test_dispose() {
        let mut acc = fixed(4, 4, 0);
        acc.dispose();
        assert!(matches!(
            acc.add(&EntropyEvent::new(vec![1], "t")),
            Err(Error::Disposed(_))
        ));
        assert!(matches!(acc.next_seed(), Err(Error::Disposed(_))));
    }

    proptest! {
        #[test]
        fn prop_round_robin_fairness(
            linear in 0usize..12,
            random in 4usize..12,
            chunks_per_event in 1usize..4,
            extra in 0usize..100,
        ) {
            let mut acc = fixed(linear, random, 7);
            let pools = acc.total_pool_count();
            let events = pools + extra;
            for _ in 0..events {
                acc.add(&EntropyEvent::new(vec![0u8; chunks_per_event * CHUNK_SIZE], "p")).unwrap();
            }
            let floor = (events / pools) as u64;
            for bytes in acc.pool_entropy_bytes() {
                prop_assert!(bytes / CHUNK_SIZE as u64 >= floor);
            }
        }

        #[test]
        fn prop_linear_inclusion_law(r in 1u64..u64::MAX) {
            let mut acc = fixed(16, 0, 0);
            acc.reseed_count = r - 1;
            acc.next_seed().unwrap();
            let mask = acc.stats().last_linear_pools_used;
            for i in 0..16u32 {
                let divides = r % (1u64 << i) == 0;
                prop_assert_eq!(mask & (1u64 << i) != 0, divides);
            }
        }
    }
}
