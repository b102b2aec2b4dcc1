// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # HPGM - Pragmatic General Multicast in pure Rust
//!
//! Receive-path implementation of the PGM reliable-multicast transport
//! (RFC 3208): the per-session receive window with loss detection,
//! NAK-phase bookkeeping, APDU reassembly, and Reed-Solomon parity
//! recovery.
//!
//! ## Quick start
//!
//! ```rust
//! use hpgm::{Msgv, RxWindow, SequenceNumber, SkBuff, Tsi};
//!
//! let tsi = Tsi::new([1, 2, 3, 4, 5, 6], 7500);
//! let mut window = RxWindow::with_sqns(tsi, 1500, 128);
//!
//! // transport delivers parsed packets
//! let trail = SequenceNumber::new(1);
//! window.add(SkBuff::data(tsi, SequenceNumber::new(1), trail, b"hello".to_vec()), 1);
//!
//! // application drains ordered messages
//! let mut msgv = vec![Msgv::default(); 16];
//! let bytes = window.readv(&mut msgv);
//! assert_eq!(bytes, Some(5));
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                        Application                           |
//! |                 readv() -> Msgv scatter/gather               |
//! +--------------------------------------------------------------+
//! |                      Receive window (rxw)                    |
//! |  admission | state machine | reassembly | parity recovery    |
//! +--------------------------------------------------------------+
//! |  seq: serial arithmetic   | packet: skb + options            |
//! |  fec: RS(255,k) erasure   | time: monotonic clock            |
//! +--------------------------------------------------------------+
//! ```
//!
//! ## Key types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`RxWindow`] | Per-session receive window, the core of the crate |
//! | [`SkBuff`] | One parsed transport PDU |
//! | [`SequenceNumber`] | RFC 1982 serial number, the only legal ordering |
//! | [`RxwStatus`] | Classification of every admission and confirmation |
//! | [`Msgv`] | One reassembled APDU handed to the application |
//! | [`ReedSolomon`] | GF(2^8) erasure codec behind parity recovery |
//!
//! The NAK engine, socket layer, and timers live above this crate; see
//! the `rxw` module docs for the exact division of labour.

/// Reed-Solomon erasure coding over GF(2^8).
pub mod fec;
/// Process-wide debug switches (`PGM_DEBUG`).
pub mod mem;
/// Packet buffers, option bitmap, session identifiers.
pub mod packet;
/// The receive window.
pub mod rxw;
/// Serial sequence-number arithmetic.
pub mod seq;
/// Monotonic clock.
pub mod time;

pub use fec::ReedSolomon;
pub use packet::{FragmentInfo, SkBuff, Tsi};
pub use rxw::{Msgv, PacketState, RxPacket, RxWindow, RxwStats, RxwStatus, SockError};
pub use seq::SequenceNumber;
pub use time::Timestamp;
