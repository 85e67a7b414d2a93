// SPDX-License-Identifier: MIT
//
// Fortuna Pool: Continuously Reseeded Entropy Accumulator
// Copyright (c) 2025 Fortuna Pool Contributors

//! Built-in entropy sources
//!
//! Each source is cheap to poll and owns its resources. None of them is trusted
//! on its own; the accumulator is what makes a mix of weak sources safe.

pub mod crypto_random;
pub mod current_time;
pub mod external_web;
pub mod timer_jitter;
pub mod user_supplied;

pub use crypto_random::CryptoRandomSource;
pub use current_time::CurrentTimeSource;
pub use external_web::{ExternalWebConfig, ExternalWebSource, ResponseFormat};
pub use timer_jitter::TimerJitterSource;
pub use user_supplied::UserSuppliedSource;

use crate::source::EntropySource;
use std::sync::Arc;

/// The local sources suitable for any host: OS randomness, clock and timer jitter
pub fn default_local_sources() -> Vec<Arc<dyn EntropySource>> {
    vec![
        Arc::new(CryptoRandomSource::new()),
        Arc::new(CurrentTimeSource::new()),
        Arc::new(TimerJitterSource::new()),
    ]
}
