// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Process-wide debug switches.
//!
//! The `PGM_DEBUG` environment variable carries a comma/space-separated
//! token list inspected once at [`init`]. Recognised keys:
//!
//! | token | effect |
//! |-------|--------|
//! | `gc-friendly` | scrub packet payloads on free |
//! | `all` | enable every key |
//! | `help` | print the supported keys to standard error |
//!
//! Token matching is case-insensitive and treats `_` and `-` as equal.
//!
//! [`init`]/[`shutdown`] are refcounted with a process-wide atomic so
//! that multiple sessions can share the flags; only the first `init`
//! reads the environment. This counter is the only cross-thread state in
//! the crate and is not performance-critical.
//!
//! Allocation itself needs no wrapper here: Rust's global allocator
//! already aborts the process on out-of-memory, which is the fail-fast
//! contract the transport requires.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Environment variable holding the debug token list.
pub const DEBUG_ENV: &str = "PGM_DEBUG";

static MEM_REF_COUNT: AtomicU32 = AtomicU32::new(0);
static GC_FRIENDLY: AtomicBool = AtomicBool::new(false);

const GC_FRIENDLY_FLAG: u32 = 1;

struct DebugKey {
    key: &'static str,
    value: u32,
}

const DEBUG_KEYS: &[DebugKey] = &[DebugKey {
    key: "gc-friendly",
    value: GC_FRIENDLY_FLAG,
}];

/// Whether freed packet payloads should be aggressively scrubbed.
#[must_use]
pub fn gc_friendly() -> bool {
    GC_FRIENDLY.load(Ordering::Relaxed)
}

/// Reference-counted initialisation; parses `PGM_DEBUG` on first call.
pub fn init() {
    if MEM_REF_COUNT.fetch_add(1, Ordering::AcqRel) > 0 {
        return;
    }

    let flags = match std::env::var(DEBUG_ENV) {
        Ok(value) => parse_debug_string(&value, DEBUG_KEYS),
        Err(_) => 0,
    };
    if flags & GC_FRIENDLY_FLAG != 0 {
        GC_FRIENDLY.store(true, Ordering::Relaxed);
    }
}

/// Balances a previous [`init`].
pub fn shutdown() {
    let previous = MEM_REF_COUNT.fetch_sub(1, Ordering::AcqRel);
    debug_assert!(previous > 0, "mem::shutdown without matching init");
}

/// `key` uses canonical `-` spelling; `token` may use either `-` or `_`
/// and any case.
fn debug_key_matches(key: &str, token: &str) -> bool {
    if key.len() != token.len() {
        return false;
    }
    key.bytes().zip(token.bytes()).all(|(k, t)| {
        let k = if k == b'_' { b'-' } else { k.to_ascii_lowercase() };
        let t = if t == b'_' { b'-' } else { t.to_ascii_lowercase() };
        k == t
    })
}

fn parse_debug_string(string: &str, keys: &[DebugKey]) -> u32 {
    let mut result = 0;

    if string.eq_ignore_ascii_case("all") {
        for key in keys {
            result |= key.value;
        }
    } else if string.eq_ignore_ascii_case("help") {
        eprint!("Supported debug values:");
        for key in keys {
            eprint!(" {}", key.key);
        }
        eprintln!();
    } else {
        for token in string.split([':', ';', ',', ' ', '\t']) {
            for key in keys {
                if debug_key_matches(key.key, token) {
                    result |= key.value;
                }
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_key_matches_spelling() {
        assert!(debug_key_matches("gc-friendly", "gc-friendly"));
        assert!(debug_key_matches("gc-friendly", "GC_FRIENDLY"));
        assert!(debug_key_matches("gc-friendly", "Gc_Friendly"));
        assert!(!debug_key_matches("gc-friendly", "gc-friend"));
        assert!(!debug_key_matches("gc-friendly", "gcfriendly"));
    }

    #[test]
    fn test_parse_single_token() {
        assert_eq!(
            parse_debug_string("gc-friendly", DEBUG_KEYS),
            GC_FRIENDLY_FLAG
        );
    }

    #[test]
    fn test_parse_token_list_with_separators() {
        assert_eq!(
            parse_debug_string("foo,gc_friendly bar", DEBUG_KEYS),
            GC_FRIENDLY_FLAG,
            "unknown tokens are skipped, separators mixed"
        );
        assert_eq!(parse_debug_string("foo;bar:baz", DEBUG_KEYS), 0);
    }

    #[test]
    fn test_parse_all_enables_every_key() {
        assert_eq!(parse_debug_string("ALL", DEBUG_KEYS), GC_FRIENDLY_FLAG);
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(parse_debug_string("", DEBUG_KEYS), 0);
    }

    #[test]
    fn test_init_shutdown_balance() {
        init();
        init();
        shutdown();
        shutdown();
    }
}
