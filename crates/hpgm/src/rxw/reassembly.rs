// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! APDU reassembly, parity reconstruction, and the commit protocol.
//!
//! Reads walk the incoming window from `commit_lead`, classifying one
//! APDU at a time:
//!
//! - every fragment present: commit the APDU into the caller's
//!   scatter/gather vector;
//! - fragments missing but the transmission group holds `tg_size`
//!   packets counting parity: decode the group once and retry;
//! - otherwise the APDU is pending (or abandoned, when its metadata is
//!   inconsistent or its first fragment is gone).
//!
//! Committed buffers stay in the window so later parity decodes of the
//! same group can still read them; the trail advances only when the
//! application releases its references.

use std::sync::Arc;

use log::{debug, warn};

use crate::packet::{FragmentInfo, SkBuff, MAX_FRAGMENTS, OPT_PRESENT, OPT_VAR_PKTLEN};
use crate::seq::SequenceNumber;

use super::state::{PacketState, RxwStatus};
use super::window::{Msgv, RxWindow};

impl RxWindow {
    // ------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------

    /// Pull contiguous complete APDUs into `msgv`.
    ///
    /// Returns the payload bytes committed, `Some(0)` when the head APDU
    /// is present but still incomplete, and `None` when nothing can be
    /// delivered. Committed buffers are reference-shared with the
    /// caller; the slots stay in COMMIT-DATA until released.
    pub fn readv(&mut self, msgv: &mut [Msgv]) -> Option<usize> {
        debug_assert!(!msgv.is_empty());

        self.sock_err.lost_count = 0;

        if self.incoming_is_empty() {
            return None;
        }

        let state = self.slot(self.commit_lead).state();
        match state {
            PacketState::HaveData => {
                let (bytes, messages) = self.incoming_read(msgv);
                if messages == 0 {
                    None // head APDU present but still incomplete
                } else {
                    Some(bytes)
                }
            }
            PacketState::LostData => {
                // purge the abandoned run when no commit pins the trail
                if self.commit_is_empty() {
                    let dropped = self.remove_trail_internal();
                    self.sock_err.lost_count += dropped;
                }
                None
            }
            PacketState::BackOff
            | PacketState::WaitNcf
            | PacketState::WaitData
            | PacketState::HaveParity => None,
            PacketState::CommitData | PacketState::Error => {
                unreachable!("commit lead observed in {state}")
            }
        }
    }

    fn incoming_read(&mut self, msgv: &mut [Msgv]) -> (usize, usize) {
        debug_assert!(!self.incoming_is_empty());

        let mut bytes = 0;
        let mut messages = 0;
        while messages < msgv.len() && !self.incoming_is_empty() {
            let first = {
                let slot = self.slot(self.commit_lead);
                slot.skb()
                    .fragment
                    .map_or(slot.sequence(), |frag| frag.apdu_first_sqn)
            };
            if self.is_apdu_complete(first, msgv.len() - messages) {
                bytes += self.read_apdu(&mut msgv[messages]);
                messages += 1;
            } else {
                break;
            }
        }
        (bytes, messages)
    }

    /// Commit one complete APDU starting at `commit_lead`.
    fn read_apdu(&mut self, msg: &mut Msgv) -> usize {
        debug_assert!(!self.incoming_is_empty());

        let apdu_len = {
            let slot = self.slot(self.commit_lead);
            slot.skb()
                .fragment
                .map_or(slot.skb().len(), |frag| frag.apdu_len as usize)
        };

        msg.skbs.clear();
        let mut bytes = 0;
        loop {
            let sequence = self.commit_lead;
            debug_assert_eq!(self.slot(sequence).state(), PacketState::HaveData);
            self.unlink(sequence);
            self.set_state(sequence, PacketState::CommitData);

            let (skb, len) = {
                let slot = self.slot(sequence);
                (Arc::clone(slot.skb_shared()), slot.skb().len())
            };
            msg.skbs.push(skb);
            bytes += len;

            self.commit_lead = self.commit_lead.next();

            // a fully committed group may shed lost slots at its tail
            if self.is_last_of_tg(sequence) {
                self.remove_tg_lost(self.tg_sqn(sequence));
            }

            if bytes >= apdu_len {
                break;
            }
        }

        msg.len = bytes;
        bytes
    }

    // ------------------------------------------------------------------
    // APDU classification
    // ------------------------------------------------------------------

    /// True when the transmission group opened by `tg` can no longer be
    /// recovered from parity.
    fn is_tg_sqn_lost(&self, tg: SequenceNumber) -> bool {
        debug_assert_eq!(self.pkt_sqn(tg), 0);
        if self.is_empty() {
            return true;
        }
        tg.lt(self.trail)
    }

    /// Walk the fragments of the APDU starting at `first_sequence` and
    /// decide whether it can be committed.
    ///
    /// `max_len` caps the fragments considered this read. When the walk
    /// stalls on a missing fragment inside a recoverable transmission
    /// group holding `tg_size` packets, the group is decoded and the
    /// walk restarts over the recovered data.
    pub(super) fn is_apdu_complete(
        &mut self,
        first_sequence: SequenceNumber,
        max_len: usize,
    ) -> bool {
        debug_assert!(max_len > 0);

        let (apdu_size, first_frag) = match self.peek(first_sequence) {
            Some(slot) => (
                slot.skb()
                    .fragment
                    .map_or(slot.skb().len(), |frag| frag.apdu_len as usize),
                slot.skb().fragment,
            ),
            None => return false,
        };

        // sanity: an APDU wider than the window can never complete
        if first_frag.is_some()
            && apdu_size as u64 > u64::from(self.max_len()) * u64::from(self.max_tpdu())
        {
            self.mark_lost_any(first_sequence);
            return false;
        }

        let mut sequence = first_sequence;
        let mut contiguous_tpdus: usize = 0;
        let mut contiguous_size: usize = 0;
        // group under parity consideration, anchored at the first
        // missing fragment
        let mut parity_tg: Option<SequenceNumber> = None;

        loop {
            let Some(slot) = self.peek(sequence) else {
                return false; // pending
            };
            let state = slot.state();
            let frag = slot.skb().fragment;
            let len = slot.skb().len();

            if parity_tg.is_none() && state != PacketState::HaveData {
                let tg = self.tg_sqn(sequence);
                if self.is_fec_available && !self.is_tg_sqn_lost(tg) {
                    parity_tg = Some(tg);
                    // every group slot before the stall holds data,
                    // committed or walked this call; they count toward
                    // the reconstruction threshold
                    contiguous_tpdus = sequence.diff(tg) as usize;
                } else {
                    return false; // pending
                }
            }

            if let Some(tg) = parity_tg {
                if self.tg_sqn(sequence) != tg {
                    return false; // group exhausted, recovery pending
                }
                if matches!(state, PacketState::HaveData | PacketState::HaveParity) {
                    contiguous_tpdus += 1;
                }
                if contiguous_tpdus >= self.tg_size as usize {
                    self.reconstruct(tg);
                    return self.is_apdu_complete(first_sequence, max_len);
                }
            } else {
                // a packet without a fragment option is a complete APDU
                if state == PacketState::HaveData && frag.is_none() {
                    return true;
                }
                let Some(frag) = frag else {
                    return false;
                };
                if frag.apdu_first_sqn != first_sequence {
                    self.mark_lost_any(first_sequence);
                    return false;
                }
                if frag.apdu_len as usize != apdu_size {
                    self.mark_lost_any(first_sequence);
                    return false;
                }
                contiguous_tpdus += 1;
                if contiguous_tpdus > MAX_FRAGMENTS {
                    self.mark_lost_any(first_sequence);
                    return false;
                }
                if contiguous_tpdus > max_len {
                    return false; // caller lacks message slots
                }
                contiguous_size += len;
                if apdu_size == contiguous_size {
                    return true;
                }
                if apdu_size < contiguous_size {
                    self.mark_lost_any(first_sequence);
                    return false;
                }
            }

            sequence = sequence.next();
        }
    }

    // ------------------------------------------------------------------
    // Parity reconstruction
    // ------------------------------------------------------------------

    /// Decode the transmission group opened by `tg` and reinstall every
    /// missing packet through the regular insert path.
    ///
    /// Only called once the group holds `tg_size` packets counting
    /// parity, so at least one parity packet is present and supplies the
    /// group geometry.
    fn reconstruct(&mut self, tg: SequenceNumber) {
        debug_assert_eq!(self.pkt_sqn(tg), 0);
        let Some(rs) = self.rs.clone() else {
            debug_assert!(false, "reconstruct without FEC geometry");
            return;
        };
        let k = rs.k();
        let n = rs.n();

        // group geometry comes from a parity packet's header
        let mut geometry = None;
        for j in 0..k {
            let sequence = tg + j as u32;
            if let Some(slot) = self.peek(sequence) {
                if slot.state() == PacketState::HaveParity {
                    geometry = Some((slot.skb().options, usize::from(slot.skb().tsdu_length)));
                    break;
                }
            }
        }
        let Some((parity_options, parity_length)) = geometry else {
            warn!("reconstruct of group {tg} without a parity packet");
            return;
        };
        let is_var_pktlen = parity_options & OPT_VAR_PKTLEN != 0;
        let is_op_encoded = parity_options & OPT_PRESENT != 0;

        // gather the group into zero-padded scratch buffers; committed
        // packets still participate as decode inputs
        let mut blocks: Vec<Vec<u8>> = vec![Vec::new(); n];
        let mut opts: Vec<Vec<u8>> = vec![vec![0u8; FragmentInfo::WIRE_LEN]; n];
        let mut offsets = vec![0usize; k];
        let mut rs_h = 0usize;
        let mut missing: Vec<(usize, SequenceNumber)> = Vec::new();

        for (j, offset) in offsets.iter_mut().enumerate() {
            let sequence = tg + j as u32;
            let Some(slot) = self.peek(sequence) else {
                warn!("reconstruct of group {tg} not fully inside the window");
                return;
            };
            let state = slot.state();
            let skb = slot.skb();
            match state {
                PacketState::HaveData | PacketState::CommitData => {
                    let mut buf = vec![0u8; parity_length];
                    let len = skb.len().min(parity_length);
                    buf[..len].copy_from_slice(&skb.payload()[..len]);
                    if is_var_pktlen && parity_length >= 2 {
                        // the encoder sees each packet's true length in
                        // the final two bytes of its padded image
                        buf[parity_length - 2..]
                            .copy_from_slice(&(skb.len() as u16).to_be_bytes());
                    }
                    blocks[j] = buf;
                    if let Some(frag) = skb.fragment {
                        opts[j] = frag.to_bytes().to_vec();
                    }
                    *offset = j;
                }
                PacketState::HaveParity => {
                    if rs_h >= n - k {
                        warn!("group {tg} carries more parity than geometry allows");
                        return;
                    }
                    let mut buf = vec![0u8; parity_length];
                    let len = skb.len().min(parity_length);
                    buf[..len].copy_from_slice(&skb.payload()[..len]);
                    blocks[k + rs_h] = buf;
                    if let Some(frag) = skb.fragment {
                        opts[k + rs_h] = frag.to_bytes().to_vec();
                    }
                    *offset = k + rs_h;
                    rs_h += 1;
                    blocks[j] = vec![0u8; parity_length];
                    missing.push((j, sequence));
                }
                _ => {
                    warn!("reconstruct of group {tg}: slot {sequence} is {state}");
                    return;
                }
            }
        }

        debug!("reconstruct group {tg}: {rs_h} parity packets fill {} gaps", missing.len());

        rs.decode_parity_appended(&mut blocks, &offsets);
        if is_op_encoded {
            rs.decode_parity_appended(&mut opts, &offsets);
        }

        for (position, &(j, sequence)) in missing.iter().enumerate() {
            let mut payload = std::mem::take(&mut blocks[j]);

            if is_var_pktlen {
                let pktlen = if payload.len() >= 2 {
                    usize::from(u16::from_be_bytes([
                        payload[payload.len() - 2],
                        payload[payload.len() - 1],
                    ]))
                } else {
                    parity_length + 1
                };
                if pktlen > parity_length {
                    warn!(
                        "invalid encoded variable packet length in reconstructed \
                         packet, dropping entire transmission group"
                    );
                    for &(_, abandoned) in &missing[position..] {
                        self.mark_lost_any(abandoned);
                    }
                    break;
                }
                payload.truncate(pktlen);
            }

            let fragment = if is_op_encoded {
                let mut image = [0u8; FragmentInfo::WIRE_LEN];
                image.copy_from_slice(&opts[j][..FragmentInfo::WIRE_LEN]);
                Self::decoded_fragment(&image)
            } else {
                None
            };

            let mut options = 0u16;
            if is_var_pktlen {
                options |= OPT_VAR_PKTLEN;
            }
            if is_op_encoded {
                options |= OPT_PRESENT;
            }

            let skb = SkBuff::recovered(sequence, options, fragment, payload);
            let status = self.insert(skb);
            debug_assert_eq!(
                status,
                RxwStatus::Inserted,
                "reconstructed packet must fill its slot"
            );
        }
    }

    // ------------------------------------------------------------------
    // Trail maintenance
    // ------------------------------------------------------------------

    /// Purge the run of abandoned sequences at the trailing edge.
    ///
    /// No-op (returning 0) unless the commit window is empty and the
    /// incoming window is not; the purged count is added to the
    /// cumulative losses.
    pub fn remove_trail(&mut self) -> u32 {
        if !self.commit_is_empty() || self.incoming_is_empty() {
            debug_assert!(false, "remove_trail with commits pending or nothing held");
            return 0;
        }
        self.remove_trail_internal()
    }

    pub(super) fn remove_trail_internal(&mut self) -> u32 {
        debug_assert!(self.commit_is_empty());
        debug_assert!(!self.incoming_is_empty());

        let mut dropped = 0;
        loop {
            let lost = match self.peek(self.trail) {
                Some(slot) => self.is_slot_apdu_lost(slot),
                None => break,
            };
            if !lost {
                break;
            }
            let sequence = self.trail;
            self.unlink(sequence);
            self.free_slot(sequence);
            self.trail = self.trail.next();
            self.commit_lead = self.trail;
            dropped += 1;
            if self.incoming_is_empty() {
                break;
            }
        }

        self.add_cumulative_losses(dropped);
        dropped
    }

    /// Release the commit window: the application has dropped its
    /// references to every delivered buffer. Advances the trail to
    /// `commit_lead` and returns the count of slots freed.
    pub fn remove_commit(&mut self) -> u32 {
        let mut released = 0;
        while !self.commit_is_empty() {
            let sequence = self.trail;
            debug_assert_eq!(self.slot(sequence).state(), PacketState::CommitData);
            self.unlink(sequence);
            self.free_slot(sequence);
            self.trail = self.trail.next();
            released += 1;
        }
        released
    }

    /// Shed abandoned slots at the trail belonging to a transmission
    /// group whose last packet just committed; parity for the group can
    /// no longer matter.
    fn remove_tg_lost(&mut self, tg: SequenceNumber) {
        while !self.commit_is_empty() && self.tg_sqn(self.trail) == tg {
            let lost = match self.peek(self.trail) {
                Some(slot) => self.is_slot_apdu_lost(slot),
                None => false,
            };
            if !lost {
                break;
            }
            let sequence = self.trail;
            self.unlink(sequence);
            self.free_slot(sequence);
            self.trail = self.trail.next();
            self.add_cumulative_losses(1);
        }
    }
}
