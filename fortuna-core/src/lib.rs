// SPDX-License-Identifier: MIT
//
// Fortuna Pool: Continuously Reseeded Entropy Accumulator
// Copyright (c) 2025 Fortuna Pool Contributors

//! Fortuna Pool Core Library
//!
//! A Fortuna-style cryptographically secure generator: entropy from many weak,
//! asynchronous sources is spread over a set of hash pools, and seeds drawn
//! from those pools periodically re-key a counter-mode block generator.
//!
//! # Architecture
//!
//! - `counter`, `primitive`, `kdf`, `generator`: the counter-mode block generator core
//! - `pool`, `accumulator`: entropy pools with linear and random fan-out
//! - `source`, `sources`: the entropy source interface and built-in sources
//! - `scheduler`: the pooled generator that polls, reseeds and checkpoints
//! - `persist`: the checksummed state file format and state stores
//! - `config`, `metrics`, `error`: configuration, counters and the error taxonomy
//!
//! # Example
//!
//! ```no_run
//! use fortuna_core::{sources, GeneratorConfig, PooledEntropyGenerator};
//!
//! # async fn demo() -> fortuna_core::Result<()> {
//! let generator = PooledEntropyGenerator::builder()
//!     .config(GeneratorConfig::default())
//!     .sources(sources::default_local_sources())
//!     .build()?;
//! generator.start_and_wait_for_seed().await?;
//! let key = generator.random_bytes(32)?;
//! generator.stop().await?;
//! # let _ = key;
//! # Ok(())
//! # }
//! ```

pub mod accumulator;
pub mod config;
pub mod counter;
pub mod error;
pub mod generator;
pub mod kdf;
pub mod metrics;
pub mod persist;
pub mod pool;
pub mod primitive;
pub mod scheduler;
pub mod source;
pub mod sources;

pub use accumulator::{AccumulatorConfig, EntropyAccumulator, EntropyEvent};
pub use config::GeneratorConfig;
pub use error::{Error, Result};
pub use generator::BlockGenerator;
pub use metrics::{GeneratorMetrics, MetricsSnapshot};
pub use persist::{
    MemoryStateStore, PersistentEventType, PersistentItemCollection, PersistentStateReader,
    PersistentStateWriter, StateCodec, TextFileStateStore, ValueEncoding,
};
pub use primitive::{BlockPrimitive, PrimitiveKind};
pub use scheduler::{GeneratorState, PooledEntropyGenerator, PooledGeneratorBuilder};
pub use source::{AsyncHint, EntropySource, Priority};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
