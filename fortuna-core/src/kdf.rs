// SPDX-License-Identifier: MIT
//
// Fortuna Pool: Continuously Reseeded Entropy Accumulator
// Copyright (c) 2025 Fortuna Pool Contributors

//! Derivation of primitive keys from accumulator seeds
//!
//! The new key chains the previous key with the fresh seed material, so a seed
//! with little entropy can never lower the state below what the old key held.

use crate::{Error, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

const SALT: &[u8] = b"fortuna-pool-reseed-v1";

/// Derive a `key_size`-byte key from the previous key and new seed material
///
/// HKDF over HMAC-SHA256: extract with a fixed salt over `previous_key || seed`,
/// then expand to the requested length.
pub fn derive_key(previous_key: &[u8], seed: &[u8], key_size: usize) -> Result<Zeroizing<Vec<u8>>> {
    if key_size == 0 || key_size > 255 * 32 {
        return Err(Error::Crypto(format!("Cannot derive a {}-byte key", key_size)));
    }

    let mut mac = HmacSha256::new_from_slice(SALT)
        .map_err(|e| Error::Crypto(format!("HMAC init failed: {}", e)))?;
    mac.update(previous_key);
    mac.update(seed);
    let prk = Zeroizing::new(mac.finalize().into_bytes().to_vec());

    let mut output = Zeroizing::new(Vec::with_capacity(key_size + 32));
    let mut t = Zeroizing::new(Vec::new());
    let mut counter = 1u8;

    while output.len() < key_size {
        let mut mac = HmacSha256::new_from_slice(&prk)
            .map_err(|e| Error::Crypto(format!("HMAC init failed: {}", e)))?;
        mac.update(&t);
        mac.update(&[counter]);
        *t = mac.finalize().into_bytes().to_vec();
        output.extend_from_slice(&t);
        counter = counter.wrapping_add(1);
    }

    output.truncate(key_size);
    Ok(output)
}
