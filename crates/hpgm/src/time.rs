// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Monotonic clock for packet timestamps and retransmit expiries.
//!
//! The receive window never drives timers; expiry values are opaque data
//! written into per-packet state and serviced by the NAK engine. All it
//! needs from the clock is a synchronous monotonic read.

use std::sync::OnceLock;
use std::time::Instant;

/// Microseconds on a process-monotonic base.
pub type Timestamp = u64;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Current monotonic time in microseconds.
///
/// The base is fixed at first use; values are comparable only within a
/// process.
#[must_use]
pub fn now() -> Timestamp {
    let epoch = EPOCH.get_or_init(Instant::now);
    // u64 microseconds cover ~584k years of uptime, no wrap concern
    epoch.elapsed().as_micros() as Timestamp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_monotonic() {
        let a = now();
        let b = now();
        assert!(b >= a, "monotonic clock must never step backwards");
    }
}
