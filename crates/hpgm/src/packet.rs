// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Packet buffers for the receive path.
//!
//! A [`SkBuff`] is one received (or window-allocated) transport PDU:
//! the parsed PGM data-header fields the window cares about, the
//! optional fragment option, and the payload. Wire parsing happens
//! upstream; sequence numbers and lengths arrive here in host order.
//!
//! Placeholders (slots fabricated by the window when a gap is detected)
//! carry the *null TSI* of all zeroes to distinguish them from real
//! received data. Reconstructed packets produced by parity recovery are
//! window-allocated too and share the marker.

use std::fmt;

use crate::mem;
use crate::seq::SequenceNumber;
use crate::time::{self, Timestamp};

// ============================================================================
// Option bitmap
// ============================================================================

/// One or more option extensions follow the data header.
pub const OPT_PRESENT: u16 = 0x01;
/// Options are network-significant.
pub const OPT_NETWORK: u16 = 0x02;
/// Packet options of this transmission group are FEC-encoded.
pub const OP_ENCODED: u16 = 0x08;
/// Transmission group carries variable-length packets.
pub const OPT_VAR_PKTLEN: u16 = 0x40;
/// Packet is proactive or on-demand parity.
pub const OPT_PARITY: u16 = 0x80;

/// Maximum APDU size in bytes.
pub const MAX_APDU: u32 = 16 * 1024 * 1024;
/// Maximum number of TPDU fragments per APDU.
pub const MAX_FRAGMENTS: usize = 2048;

// ============================================================================
// Transport session identifier
// ============================================================================

/// Transport session identifier: 6-byte GSI plus source port.
///
/// The window holds but never interprets it. The all-zero TSI is
/// reserved for window-allocated packet buffers (placeholders and
/// reconstructed packets).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tsi([u8; 8]);

impl Tsi {
    /// The null TSI.
    pub const NULL: Tsi = Tsi([0; 8]);

    /// Build from a globally-unique source identifier and source port.
    #[must_use]
    pub fn new(gsi: [u8; 6], sport: u16) -> Self {
        let mut raw = [0; 8];
        raw[..6].copy_from_slice(&gsi);
        raw[6..].copy_from_slice(&sport.to_be_bytes());
        Self(raw)
    }

    /// True for the all-zero TSI marking window-allocated buffers.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == [0; 8]
    }
}

impl fmt::Display for Tsi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sport = u16::from_be_bytes([self.0[6], self.0[7]]);
        write!(
            f,
            "{}.{}.{}.{}.{}.{}.{}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5], sport
        )
    }
}

// ============================================================================
// Fragment option
// ============================================================================

/// `OPT_FRAGMENT`: the packet is one fragment of a larger APDU.
///
/// All fragments of one APDU share `apdu_first_sqn` and `apdu_len`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentInfo {
    /// Sequence number of the APDU's first fragment.
    pub apdu_first_sqn: SequenceNumber,
    /// Byte offset of this fragment within the APDU.
    pub frag_offset: u32,
    /// Total APDU length in bytes.
    pub apdu_len: u32,
}

impl FragmentInfo {
    /// Size of the big-endian wire image, as FEC-encoded across a
    /// transmission group.
    pub const WIRE_LEN: usize = 12;

    /// Big-endian wire image (used when options are parity-encoded).
    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::WIRE_LEN] {
        let mut buf = [0; Self::WIRE_LEN];
        buf[0..4].copy_from_slice(&self.apdu_first_sqn.get().to_be_bytes());
        buf[4..8].copy_from_slice(&self.frag_offset.to_be_bytes());
        buf[8..12].copy_from_slice(&self.apdu_len.to_be_bytes());
        buf
    }

    /// Parse a big-endian wire image.
    #[must_use]
    pub fn from_bytes(buf: &[u8; Self::WIRE_LEN]) -> Self {
        Self {
            apdu_first_sqn: SequenceNumber::new(u32::from_be_bytes([
                buf[0], buf[1], buf[2], buf[3],
            ])),
            frag_offset: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            apdu_len: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        }
    }
}

// ============================================================================
// Packet buffer
// ============================================================================

/// One transport PDU owned by the receive window.
///
/// Between admission and release the window owns the buffer exclusively;
/// `Readv` hands shared ownership of committed buffers to the
/// application via `Arc`.
#[derive(Debug, Clone)]
pub struct SkBuff {
    /// Session identity; null for window-allocated buffers.
    pub tsi: Tsi,
    /// Data-header sequence number.
    pub sequence: SequenceNumber,
    /// Arrival (or allocation) time.
    pub tstamp: Timestamp,
    /// PGM option bitmap (`OPT_*`).
    pub options: u16,
    /// Sender's TSDU length; the fixed group length for parity packets.
    pub tsdu_length: u16,
    /// Advertised transmit-window trail from the data header.
    pub trail: SequenceNumber,
    /// Fragment option, when the packet is part of a multi-TPDU APDU.
    pub fragment: Option<FragmentInfo>,
    payload: Vec<u8>,
}

impl SkBuff {
    /// An original data packet.
    #[must_use]
    pub fn data(
        tsi: Tsi,
        sequence: SequenceNumber,
        trail: SequenceNumber,
        payload: Vec<u8>,
    ) -> Self {
        let tsdu_length = payload.len() as u16;
        Self {
            tsi,
            sequence,
            tstamp: time::now(),
            options: 0,
            tsdu_length,
            trail,
            fragment: None,
            payload,
        }
    }

    /// A parity packet for the transmission group containing `sequence`.
    #[must_use]
    pub fn parity(
        tsi: Tsi,
        sequence: SequenceNumber,
        trail: SequenceNumber,
        payload: Vec<u8>,
    ) -> Self {
        let mut skb = Self::data(tsi, sequence, trail, payload);
        skb.options |= OPT_PARITY;
        skb
    }

    /// A zero-payload placeholder for a detected gap.
    #[must_use]
    pub(crate) fn placeholder(sequence: SequenceNumber) -> Self {
        Self {
            tsi: Tsi::NULL,
            sequence,
            tstamp: time::now(),
            options: 0,
            tsdu_length: 0,
            trail: SequenceNumber::default(),
            fragment: None,
            payload: Vec::new(),
        }
    }

    /// A packet rebuilt by parity recovery.
    #[must_use]
    pub(crate) fn recovered(
        sequence: SequenceNumber,
        options: u16,
        fragment: Option<FragmentInfo>,
        payload: Vec<u8>,
    ) -> Self {
        let tsdu_length = payload.len() as u16;
        Self {
            tsi: Tsi::NULL,
            sequence,
            tstamp: time::now(),
            options,
            tsdu_length,
            trail: SequenceNumber::default(),
            fragment,
            payload,
        }
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// True for zero-length payloads (placeholders, zero-length TSDUs).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// True when the packet carries parity rather than original data.
    #[must_use]
    pub fn is_parity(&self) -> bool {
        self.options & OPT_PARITY != 0
    }

    /// True when the packet carries a payload-significant option.
    #[must_use]
    pub fn has_payload_op(&self) -> bool {
        self.fragment.is_some() || self.options & OP_ENCODED != 0
    }
}

impl Drop for SkBuff {
    fn drop(&mut self) {
        if mem::gc_friendly() {
            self.payload.fill(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tsi_null_marker() {
        assert!(Tsi::NULL.is_null());
        assert!(!Tsi::new([1, 2, 3, 4, 5, 6], 7500).is_null());
    }

    #[test]
    fn test_tsi_display() {
        let tsi = Tsi::new([9, 8, 7, 6, 5, 4], 3055);
        assert_eq!(tsi.to_string(), "9.8.7.6.5.4.3055");
    }

    #[test]
    fn test_fragment_wire_roundtrip() {
        let frag = FragmentInfo {
            apdu_first_sqn: SequenceNumber::new(0xdead_beef),
            frag_offset: 1500,
            apdu_len: 4500,
        };
        assert_eq!(FragmentInfo::from_bytes(&frag.to_bytes()), frag);
    }

    #[test]
    fn test_skb_data_fields() {
        let tsi = Tsi::new([1, 1, 1, 1, 1, 1], 1);
        let skb = SkBuff::data(
            tsi,
            SequenceNumber::new(10),
            SequenceNumber::new(5),
            b"hello".to_vec(),
        );

        assert_eq!(skb.len(), 5);
        assert_eq!(skb.tsdu_length, 5);
        assert!(!skb.is_parity());
        assert!(!skb.has_payload_op());
    }

    #[test]
    fn test_skb_parity_flag() {
        let skb = SkBuff::parity(
            Tsi::new([1, 1, 1, 1, 1, 1], 1),
            SequenceNumber::new(0),
            SequenceNumber::new(0),
            vec![0; 8],
        );
        assert!(skb.is_parity());
    }

    #[test]
    fn test_skb_placeholder_is_null_tsi() {
        let skb = SkBuff::placeholder(SequenceNumber::new(3));
        assert!(skb.tsi.is_null());
        assert!(skb.is_empty());
    }
}
