// SPDX-License-Identifier: MIT
//
// Fortuna Pool: Continuously Reseeded Entropy Accumulator
// Copyright (c) 2025 Fortuna Pool Contributors

//! Keyed block transforms driving the counter-mode generator
//!
//! Block ciphers run in zero-IV counter mode: the counter value is the plaintext
//! block. Keyed hashes absorb the key, then the counter value.

use crate::{Error, Result};
use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes256;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::marker::PhantomData;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// A keyed transform with a fixed block and key size
pub trait BlockPrimitive: Send {
    /// Short identifier used in logs
    fn name(&self) -> &'static str;

    /// Required key length in bytes
    fn key_size(&self) -> usize;

    /// Output length of one `encrypt_block` call in bytes
    fn block_size(&self) -> usize;

    /// Replace the key. Fails if the key length is wrong.
    fn set_key(&mut self, key: &[u8]) -> Result<()>;

    /// Drop the key schedule, zeroizing it. `encrypt_block` fails until `set_key`.
    fn clear_key(&mut self);

    /// Transform `input` into `output`, returning the number of bytes written
    fn encrypt_block(&self, input: &[u8], output: &mut [u8]) -> Result<usize>;
}

/// Primitive selection for configuration
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveKind {
    /// AES-256 in counter mode
    #[default]
    Aes256,
    /// HMAC-SHA256 over the counter
    HmacSha256,
    /// SHA-512 over key || counter
    KeyedSha512,
}

impl PrimitiveKind {
    /// Construct an unkeyed primitive of this kind
    pub fn build(self) -> Box<dyn BlockPrimitive> {
        match self {
            PrimitiveKind::Aes256 => Box::new(Aes256Primitive::new()),
            PrimitiveKind::HmacSha256 => Box::new(HmacSha256Primitive::new()),
            PrimitiveKind::KeyedSha512 => Box::new(KeyedHashPrimitive::<Sha512>::new()),
        }
    }
}

/// AES-256 block cipher. The key schedule is zeroized on drop.
#[derive(Default)]
pub struct Aes256Primitive {
    cipher: Option<Aes256>,
}

impl Aes256Primitive {
    pub const KEY_SIZE: usize = 32;
    pub const BLOCK_SIZE: usize = 16;

    pub fn new() -> Self {
        Self { cipher: None }
    }
}

impl BlockPrimitive for Aes256Primitive {
    fn name(&self) -> &'static str {
        "aes256"
    }

    fn key_size(&self) -> usize {
        Self::KEY_SIZE
    }

    fn block_size(&self) -> usize {
        Self::BLOCK_SIZE
    }

    fn set_key(&mut self, key: &[u8]) -> Result<()> {
        let cipher = Aes256::new_from_slice(key)
            .map_err(|e| Error::Crypto(format!("Invalid key length {}: {}", key.len(), e)))?;
        self.cipher = Some(cipher);
        Ok(())
    }

    fn clear_key(&mut self) {
        self.cipher = None;
    }

    fn encrypt_block(&self, input: &[u8], output: &mut [u8]) -> Result<usize> {
        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| Error::Crypto("aes256 key has not been set".to_string()))?;
        if input.len() != Self::BLOCK_SIZE || output.len() < Self::BLOCK_SIZE {
            return Err(Error::Crypto(format!(
                "aes256 requires {}-byte blocks, got input {} / output {}",
                Self::BLOCK_SIZE,
                input.len(),
                output.len()
            )));
        }

        let mut block = GenericArray::clone_from_slice(input);
        cipher.encrypt_block(&mut block);
        output[..Self::BLOCK_SIZE].copy_from_slice(&block);
        Ok(Self::BLOCK_SIZE)
    }
}

/// HMAC-SHA256 keyed hash
#[derive(Default)]
pub struct HmacSha256Primitive {
    key: Option<Zeroizing<Vec<u8>>>,
}

impl HmacSha256Primitive {
    pub const KEY_SIZE: usize = 32;
    pub const BLOCK_SIZE: usize = 32;

    pub fn new() -> Self {
        Self { key: None }
    }
}

impl BlockPrimitive for HmacSha256Primitive {
    fn name(&self) -> &'static str {
        "hmac_sha256"
    }

    fn key_size(&self) -> usize {
        Self::KEY_SIZE
    }

    fn block_size(&self) -> usize {
        Self::BLOCK_SIZE
    }

    fn set_key(&mut self, key: &[u8]) -> Result<()> {
        if key.len() != Self::KEY_SIZE {
            return Err(Error::Crypto(format!(
                "hmac_sha256 requires a {}-byte key, got {}",
                Self::KEY_SIZE,
                key.len()
            )));
        }
        self.key = Some(Zeroizing::new(key.to_vec()));
        Ok(())
    }

    fn clear_key(&mut self) {
        self.key = None;
    }

    fn encrypt_block(&self, input: &[u8], output: &mut [u8]) -> Result<usize> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| Error::Crypto("hmac_sha256 key has not been set".to_string()))?;
        if output.len() < Self::BLOCK_SIZE {
            return Err(Error::Crypto("Output buffer shorter than one block".to_string()));
        }

        let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
            .map_err(|e| Error::Crypto(format!("HMAC init failed: {}", e)))?;
        mac.update(input);
        let tag = mac.finalize().into_bytes();
        output[..Self::BLOCK_SIZE].copy_from_slice(&tag);
        Ok(Self::BLOCK_SIZE)
    }
}

/// Keyed hash formed by prefixing the key to the input before hashing
pub struct KeyedHashPrimitive<D> {
    key: Option<Zeroizing<Vec<u8>>>,
    _digest: PhantomData<fn() -> D>,
}

impl<D: Digest> KeyedHashPrimitive<D> {
    pub fn new() -> Self {
        Self {
            key: None,
            _digest: PhantomData,
        }
    }
}

impl<D: Digest> Default for KeyedHashPrimitive<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Digest> BlockPrimitive for KeyedHashPrimitive<D> {
    fn name(&self) -> &'static str {
        "keyed_hash"
    }

    fn key_size(&self) -> usize {
        <D as Digest>::output_size()
    }

    fn block_size(&self) -> usize {
        <D as Digest>::output_size()
    }

    fn set_key(&mut self, key: &[u8]) -> Result<()> {
        if key.len() != self.key_size() {
            return Err(Error::Crypto(format!(
                "keyed hash requires a {}-byte key, got {}",
                self.key_size(),
                key.len()
            )));
        }
        self.key = Some(Zeroizing::new(key.to_vec()));
        Ok(())
    }

    fn clear_key(&mut self) {
        self.key = None;
    }

    fn encrypt_block(&self, input: &[u8], output: &mut [u8]) -> Result<usize> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| Error::Crypto("keyed hash key has not been set".to_string()))?;
        let size = self.block_size();
        if output.len() < size {
            return Err(Error::Crypto("Output buffer shorter than one block".to_string()));
        }

        let digest = D::new()
            .chain_update(key.as_slice())
            .chain_update(input)
            .finalize();
        output[..size].copy_from_slice(&digest);
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        let aes = PrimitiveKind::Aes256.build();
        assert_eq!((aes.key_size(), aes.block_size()), (32, 16));

        let hmac = PrimitiveKind::HmacSha256.build();
        assert_eq!((hmac.key_size(), hmac.block_size()), (32, 32));

        let sha = PrimitiveKind::KeyedSha512.build();
        assert_eq!((sha.key_size(), sha.block_size()), (64, 64));
    }

    #[test]
    fn test_unkeyed_primitive_fails() {
        let aes = Aes256Primitive::new();
        let mut out = [0u8; 16];
        assert!(matches!(
            aes.encrypt_block(&[0u8; 16], &mut out),
            Err(Error::Crypto(_))
        ));
    }

    #[test]
    fn test_wrong_key_length_rejected() {
        for kind in [
            PrimitiveKind::Aes256,
            PrimitiveKind::HmacSha256,
            PrimitiveKind::KeyedSha512,
        ] {
            let mut p = kind.build();
            assert!(p.set_key(&[7u8; 5]).is_err(), "{:?}", kind);
        }
    }

    #[test]
    fn test_aes_known_answer() {
        // FIPS-197 appendix C.3
        let key = hex::decode("000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f")
            .unwrap();
        let plain = hex::decode("00112233445566778899aabbccddeeff").unwrap();
        let mut aes = Aes256Primitive::new();
        aes.set_key(&key).unwrap();
        let mut out = [0u8; 16];
        assert_eq!(aes.encrypt_block(&plain, &mut out).unwrap(), 16);
        assert_eq!(hex::encode(out), "8ea2b7ca516745bfeafc49904b496089");
    }

    #[test]
    fn test_cleared_key_refuses_blocks() {
        for kind in [
            PrimitiveKind::Aes256,
            PrimitiveKind::HmacSha256,
            PrimitiveKind::KeyedSha512,
        ] {
            let mut p = kind.build();
            let key = vec![9u8; p.key_size()];
            p.set_key(&key).unwrap();
            let mut out = vec![0u8; p.block_size()];
            let input = vec![0u8; p.block_size()];
            assert!(p.encrypt_block(&input, &mut out).is_ok());

            p.clear_key();
            assert!(
                matches!(p.encrypt_block(&input, &mut out), Err(Error::Crypto(_))),
                "{:?}",
                kind
            );
        }
    }

    #[test]
    fn test_keyed_hash_is_prefix_hash() {
        let key = [3u8; 64];
        let mut p = KeyedHashPrimitive::<Sha512>::new();
        p.set_key(&key).unwrap();
        let mut out = [0u8; 64];
        p.encrypt_block(b"counter", &mut out).unwrap();

        let mut expected = Sha512::new();
        expected.update(key);
        expected.update(b"counter");
        assert_eq!(out.as_slice(), expected.finalize().as_slice());
    }

    #[test]
    fn test_key_changes_output() {
        let mut p = HmacSha256Primitive::new();
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        p.set_key(&[1u8; 32]).unwrap();
        p.encrypt_block(&[0u8; 16], &mut a).unwrap();
        p.set_key(&[2u8; 32]).unwrap();
        p.encrypt_block(&[0u8; 16], &mut b).unwrap();
        assert_ne!(a, b);
    }
}
