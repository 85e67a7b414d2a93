// SPDX-License-Identifier: MIT
//
// Fortuna Pool: Continuously Reseeded Entropy Accumulator
// Copyright (c) 2025 Fortuna Pool Contributors

//! Entropy source interface consumed by the pooled generator

use crate::persist::PersistentItemCollection;
use crate::Result;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Scheduling mode controlling how often sources are polled
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        };
        f.write_str(s)
    }
}

/// Non-binding hint about how often a source actually suspends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncHint {
    /// Never waits on I/O; completes on first poll
    Never,
    /// Waits occasionally (e.g. periodic network fetch)
    Rarely,
    /// Usually waits
    Mostly,
    /// Always waits on I/O or timers
    Always,
}

/// A producer of unpredictable bytes
///
/// `get_entropy` returning `Ok(None)` means nothing is available this cycle;
/// errors are logged by the scheduler and never stop it.
pub trait EntropySource: Send + Sync {
    /// Unique name, also used as the persistent state namespace
    fn name(&self) -> &str;

    fn async_hint(&self) -> AsyncHint {
        AsyncHint::Never
    }

    /// Minimum time between polls at `priority`
    fn min_interval(&self, _priority: Priority) -> Duration {
        Duration::ZERO
    }

    fn get_entropy(&self, priority: Priority) -> BoxFuture<'_, Result<Option<Vec<u8>>>>;

    /// Export source-owned state under `namespace`
    fn write_state(&self, _namespace: &str, _items: &mut PersistentItemCollection) -> Result<()> {
        Ok(())
    }

    /// Import state written by `write_state`
    fn read_state(&self, _namespace: &str, _items: &PersistentItemCollection) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order_and_display() {
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::High.to_string(), "high");
    }
}
