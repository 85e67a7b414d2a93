// SPDX-License-Identifier: MIT
//
// Fortuna Pool: Continuously Reseeded Entropy Accumulator
// Copyright (c) 2025 Fortuna Pool Contributors

//! A single entropy pool: a running hash that is read once per cycle

use crate::persist::{PersistentItemCollection, ValueEncoding};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};

/// Hash algorithm backing each pool
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PoolHash {
    Sha256,
    #[default]
    Sha512,
}

impl PoolHash {
    /// Digest length in bytes
    pub fn digest_size(self) -> usize {
        match self {
            PoolHash::Sha256 => 32,
            PoolHash::Sha512 => 64,
        }
    }

    fn hasher(self) -> PoolHasher {
        match self {
            PoolHash::Sha256 => PoolHasher::Sha256(Sha256::new()),
            PoolHash::Sha512 => PoolHasher::Sha512(Sha512::new()),
        }
    }
}

#[derive(Clone)]
enum PoolHasher {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl PoolHasher {
    fn update(&mut self, data: &[u8]) {
        match self {
            PoolHasher::Sha256(h) => h.update(data),
            PoolHasher::Sha512(h) => h.update(data),
        }
    }

    fn finalize_reset(&mut self) -> Vec<u8> {
        match self {
            PoolHasher::Sha256(h) => h.finalize_reset().to_vec(),
            PoolHasher::Sha512(h) => h.finalize_reset().to_vec(),
        }
    }

    /// Digest of everything absorbed so far, leaving the running state untouched
    fn peek(&self) -> Vec<u8> {
        match self {
            PoolHasher::Sha256(h) => h.clone().finalize().to_vec(),
            PoolHasher::Sha512(h) => h.clone().finalize().to_vec(),
        }
    }
}

/// Running hash accumulating entropy until its digest is taken
pub struct EntropyPool {
    index: usize,
    hash: PoolHash,
    hasher: PoolHasher,
    bytes_since_digest: u64,
    total_bytes: u64,
    digests_taken: u64,
    disposed: bool,
}

impl EntropyPool {
    pub fn new(index: usize, hash: PoolHash) -> Self {
        Self {
            index,
            hash,
            hasher: hash.hasher(),
            bytes_since_digest: 0,
            total_bytes: 0,
            digests_taken: 0,
            disposed: false,
        }
    }

    /// Absorb `data`, domain-separated by the source tag
    pub fn add(&mut self, data: &[u8], source: &str) -> Result<()> {
        self.ensure_live()?;
        self.hasher.update(source.as_bytes());
        self.hasher.update(data);
        self.bytes_since_digest += data.len() as u64;
        self.total_bytes += data.len() as u64;
        Ok(())
    }

    /// Finalize the running hash and reset it; each digest is handed out once
    pub fn get_digest(&mut self) -> Result<Vec<u8>> {
        self.ensure_live()?;
        let digest = self.hasher.finalize_reset();
        self.bytes_since_digest = 0;
        self.digests_taken += 1;
        Ok(digest)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn digest_size(&self) -> usize {
        self.hash.digest_size()
    }

    /// Bytes absorbed since the last digest
    pub fn bytes_since_digest(&self) -> u64 {
        self.bytes_since_digest
    }

    /// Bytes absorbed over the pool's lifetime
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Export counters and a continuity marker under `{prefix}*` keys
    ///
    /// The hash state itself cannot be exported, so the marker is the digest of
    /// the pending input. Loading absorbs the marker into a fresh hash.
    pub fn write_state(
        &self,
        items: &mut PersistentItemCollection,
        namespace: &str,
        prefix: &str,
    ) -> Result<()> {
        self.ensure_live()?;
        items.set_u64(namespace, &format!("{}TotalEntropyBytes", prefix), self.total_bytes)?;
        items.set_u64(
            namespace,
            &format!("{}EntropyBytesSinceLastDigest", prefix),
            self.bytes_since_digest,
        )?;
        if self.bytes_since_digest > 0 {
            items.set(
                namespace,
                &format!("{}Continuity", prefix),
                ValueEncoding::Base64,
                self.hasher.peek(),
            )?;
        }
        Ok(())
    }

    /// Import state written by `write_state`
    pub fn read_state(
        &mut self,
        items: &PersistentItemCollection,
        namespace: &str,
        prefix: &str,
    ) -> Result<()> {
        self.ensure_live()?;
        let total = items.get_u64(namespace, &format!("{}TotalEntropyBytes", prefix))?;
        let pending =
            items.get_u64(namespace, &format!("{}EntropyBytesSinceLastDigest", prefix))?;

        self.hasher = self.hash.hasher();
        self.total_bytes = total.unwrap_or(0);
        self.bytes_since_digest = 0;
        if let Some(marker) = items.get(namespace, &format!("{}Continuity", prefix)) {
            self.hasher.update(b"continuity");
            self.hasher.update(&marker.value);
            self.bytes_since_digest = pending.unwrap_or(0);
        }
        Ok(())
    }

    /// Zero and discard the running state; further use fails
    pub fn dispose(&mut self) {
        self.hasher = self.hash.hasher();
        self.bytes_since_digest = 0;
        self.total_bytes = 0;
        self.disposed = true;
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed {
            return Err(Error::Disposed("EntropyPool"));
        }
        Ok(())
    }
}

impl std::fmt::Debug for EntropyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntropyPool")
            .field("index", &self.index)
            .field("hash", &self.hash)
            .field("bytes_since_digest", &self.bytes_since_digest)
            .field("total_bytes", &self.total_bytes)
            .finish()
    }
}
