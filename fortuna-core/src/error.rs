// SPDX-License-Identifier: MIT
//
// Fortuna Pool: Continuously Reseeded Entropy Accumulator
// Copyright (c) 2025 Fortuna Pool Contributors

//! Error types for the pooled generator
//!
//! Provides a unified error taxonomy using `thiserror` for ergonomic error handling.

use std::sync::Arc;

pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for generator, accumulator and persistence operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration validation failed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Cryptographic primitive rejected an operation (bad key length, etc.)
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Persisted state is corrupt or malformed
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Internal invariant was violated; indicates a programming error
    #[error("Invariant violation: {0}")]
    Invariant(String),

    /// Object was used after being disposed
    #[error("{0} has already been disposed")]
    Disposed(&'static str),

    /// Random bytes were requested before the first reseed
    #[error("Generator has not been seeded")]
    NotSeeded,

    /// An entropy source failed while being polled
    #[error("Entropy source '{source_name}' failed: {message}")]
    Source { source_name: String, message: String },

    /// Network communication failed
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// The generator stopped before it could be seeded
    #[error("Generator stopped: {0}")]
    Stopped(String),

    /// A fatal error halted the generator. Shared so every waiter sees the cause.
    #[error("Generator halted: {0}")]
    Halted(#[source] Arc<Error>),
}

impl Error {
    /// Check if the error describes corrupt persisted data
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::InvalidData(_))
    }

    /// Check if error is transient and the operation may succeed next cycle
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::Timeout | Error::Source { .. }
        )
    }

    /// The error that halted the generator, if this is a halt
    pub fn halt_cause(&self) -> Option<&Error> {
        match self {
            Error::Halted(cause) => Some(cause),
            _ => None,
        }
    }

    pub(crate) fn source_failure(name: &str, message: impl ToString) -> Self {
        Error::Source {
            source_name: name.to_string(),
            message: message.to_string(),
        }
    }
}

impl From<envy::Error> for Error {
    fn from(e: envy::Error) -> Self {
        Error::Config(format!("Failed to parse environment variables: {}", e))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(format!("Failed to parse YAML configuration: {}", e))
    }
}
