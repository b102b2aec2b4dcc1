// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-packet states and window return codes.
//!
//! Every live window slot is in exactly one [`PacketState`]; all
//! transitions funnel through the window's single transition routine so
//! the per-state counters and retransmit queues never drift from the
//! slot states themselves.

use std::fmt;

/// Retransmission/delivery state of one window slot.
///
/// ```text
///                      NAK sent          NCF received
///   (gap) -> BACK-OFF ----------> WAIT-NCF ----------> WAIT-DATA
///               |                    |                     |
///               |     data/parity arrives (any queued)     |
///               +--------------------+---------------------+
///                                    |
///                                    v                timeout (any queued)
///                      HAVE-DATA / HAVE-PARITY   ------>  LOST-DATA
///                           |
///                           | consumed by readv
///                           v
///                      COMMIT-DATA -> (freed once released)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketState {
    /// Gap detected, awaiting NAK transmission.
    BackOff,
    /// NAK sent, awaiting confirmation.
    WaitNcf,
    /// NCF received, awaiting retransmitted data.
    WaitData,
    /// Original data present, not yet committed.
    HaveData,
    /// Parity substitute present for a still-missing packet.
    HaveParity,
    /// Handed to the application, awaiting release.
    CommitData,
    /// Recovery abandoned.
    LostData,
    /// Momentarily unlinked during installation; never externally
    /// observable.
    Error,
}

impl PacketState {
    /// True for the three states parked on a retransmit queue.
    #[must_use]
    pub fn is_queued(self) -> bool {
        matches!(self, Self::BackOff | Self::WaitNcf | Self::WaitData)
    }
}

impl fmt::Display for PacketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BackOff => "BACK-OFF",
            Self::WaitNcf => "WAIT-NCF",
            Self::WaitData => "WAIT-DATA",
            Self::HaveData => "HAVE-DATA",
            Self::HaveParity => "HAVE-PARITY",
            Self::CommitData => "COMMIT-DATA",
            Self::LostData => "LOST-DATA",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Classification returned by the window's mutating entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxwStatus {
    /// Nothing to do (e.g. confirm on an undefined window).
    Ok,
    /// Packet filled a waiting placeholder; buffer consumed.
    Inserted,
    /// Packet advanced the window lead; buffer consumed.
    Appended,
    /// Retransmit state upgraded for an in-window sequence.
    Updated,
    /// Lead advanced with placeholders created for detected losses.
    Missing,
    /// Re-transmission of a previously seen packet.
    Duplicate,
    /// Corrupted or protocol-invalid packet.
    Malformed,
    /// Packet out of window bounds.
    Bounds,
    /// Commit window blocks the advance; application must drain.
    SlowConsumer,
    /// Unclassified failure.
    Unknown,
}

impl fmt::Display for RxwStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "OK",
            Self::Inserted => "INSERTED",
            Self::Appended => "APPENDED",
            Self::Updated => "UPDATED",
            Self::Missing => "MISSING",
            Self::Duplicate => "DUPLICATE",
            Self::Malformed => "MALFORMED",
            Self::Bounds => "BOUNDS",
            Self::SlowConsumer => "SLOW-CONSUMER",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_queued_partition() {
        assert!(PacketState::BackOff.is_queued());
        assert!(PacketState::WaitNcf.is_queued());
        assert!(PacketState::WaitData.is_queued());
        assert!(!PacketState::HaveData.is_queued());
        assert!(!PacketState::HaveParity.is_queued());
        assert!(!PacketState::CommitData.is_queued());
        assert!(!PacketState::LostData.is_queued());
        assert!(!PacketState::Error.is_queued());
    }

    #[test]
    fn test_state_display_names() {
        assert_eq!(PacketState::BackOff.to_string(), "BACK-OFF");
        assert_eq!(PacketState::CommitData.to_string(), "COMMIT-DATA");
    }

    #[test]
    fn test_status_display_names() {
        assert_eq!(RxwStatus::SlowConsumer.to_string(), "SLOW-CONSUMER");
        assert_eq!(RxwStatus::Inserted.to_string(), "INSERTED");
    }
}
