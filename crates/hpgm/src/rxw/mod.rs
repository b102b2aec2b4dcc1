// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Receive window
//!
//! Per-source-session sliding window reassembling sequenced packets
//! into ordered application messages in the face of loss, reordering,
//! duplication, and parity-backed recovery.
//!
//! ## Protocol flow
//!
//! ```text
//! Source                                     Receiver
//!   |                                           |
//!   |--- ODATA (sqn=1) ------------------------>| add() -> APPENDED
//!   |--- ODATA (sqn=2) --------X (lost)         |
//!   |--- ODATA (sqn=3) ------------------------>| add() -> MISSING (placeholder sqn=2)
//!   |                                           |
//!   |<-- NAK (sqn=2) ---------------------------|   BACK-OFF -> WAIT-NCF
//!   |--- NCF (sqn=2) -------------------------->| confirm() -> WAIT-DATA
//!   |--- RDATA (sqn=2) ------------------------>| add() -> INSERTED
//!   |                                           | readv() -> APDUs 1..3
//! ```
//!
//! ## Components
//!
//! | Component | Role |
//! |-----------|------|
//! | [`RxWindow`] | Ring storage, admission, window edges |
//! | [`PacketState`] | Eight-state per-slot retransmit machine |
//! | retransmit queues | Intrusive FIFOs per NAK phase, walked by the NAK engine |
//! | reassembly | APDU completeness, parity reconstruction, commit loop |
//! | [`Msgv`] | Scatter/gather vector handed to the application |
//!
//! The window never performs socket I/O, sends NAKs, or drives timers:
//! expiry timestamps are recorded in per-slot state and serviced
//! externally. One transport thread serialises every call; separate
//! sessions use disjoint windows.

mod reassembly;
mod state;
mod window;

pub use state::{PacketState, RxwStatus};
pub use window::{Msgv, RxPacket, RxWindow, RxwStats, SockError};
