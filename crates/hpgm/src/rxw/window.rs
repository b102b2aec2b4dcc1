// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Receive-window storage, admission, and edge maintenance.
//!
//! The window is a fixed-capacity ring indexed by `sequence % capacity`
//! plus three intrusive FIFOs threading the slots in a retransmit phase.
//! Every mutation of a slot's state funnels through
//! [`RxWindow::set_state`]/[`RxWindow::unlink`] so the per-state
//! counters, the queues, and the slot states can never drift apart.
//!
//! ```text
//!  |     commit       |   incoming   |
//!  |<---------------->|<------------>|
//!  |                  |              |
//! trail          commit_lead        lead
//! ```
//!
//! Commit buffers are held by the application; the trail cannot advance
//! while they remain. Incoming buffers are waiting to be reassembled and
//! passed up.

use std::sync::Arc;

use log::{debug, trace};

use crate::packet::{FragmentInfo, SkBuff, MAX_APDU};
use crate::seq::SequenceNumber;
use crate::time::Timestamp;

use super::state::{PacketState, RxwStatus};

// ============================================================================
// Intrusive retransmit queues
// ============================================================================

/// Per-slot links for the retransmit FIFOs. `next` walks toward the
/// tail (older entries), `prev` toward the head.
#[derive(Debug, Default, Clone, Copy)]
struct QueueLink {
    next: Option<SequenceNumber>,
    prev: Option<SequenceNumber>,
}

/// One retransmit-phase FIFO. Node storage lives in the window slots;
/// the queue itself is only the endpoints.
#[derive(Debug, Default)]
struct NakQueue {
    head: Option<SequenceNumber>,
    tail: Option<SequenceNumber>,
    len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueId {
    BackOff,
    WaitNcf,
    WaitData,
}

// ============================================================================
// Window slot
// ============================================================================

/// One live window slot: the packet buffer plus its retransmit record.
///
/// The record survives the placeholder-to-data hand-over: when real data
/// fills a gap, only the buffer is swapped and the accumulated NAK state
/// stays with the slot.
#[derive(Debug)]
pub struct RxPacket {
    sequence: SequenceNumber,
    skb: Arc<SkBuff>,
    state: PacketState,
    /// When the back-off phase ends and a NAK should go out.
    pub nak_rb_expiry: Timestamp,
    /// When waiting for repair data times out.
    pub nak_rdata_expiry: Timestamp,
    /// NAKs sent for this sequence so far.
    pub nak_transmit_count: u8,
    /// Set on the opener of a transmission group received without gaps.
    pub(crate) is_contiguous: bool,
    link: QueueLink,
}

impl RxPacket {
    fn new(sequence: SequenceNumber, skb: Arc<SkBuff>) -> Self {
        Self {
            sequence,
            skb,
            state: PacketState::Error,
            nak_rb_expiry: 0,
            nak_rdata_expiry: 0,
            nak_transmit_count: 0,
            is_contiguous: false,
            link: QueueLink::default(),
        }
    }

    /// Sequence this slot stands for.
    #[must_use]
    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> PacketState {
        self.state
    }

    /// The packet buffer.
    #[must_use]
    pub fn skb(&self) -> &SkBuff {
        &self.skb
    }

    pub(super) fn skb_shared(&self) -> &Arc<SkBuff> {
        &self.skb
    }
}

// ============================================================================
// Delivery vector and error surface
// ============================================================================

/// One application message: the scatter/gather vector of committed
/// packet buffers making up a single APDU.
#[derive(Debug, Default, Clone)]
pub struct Msgv {
    /// Fragments in sequence order; single entry for unfragmented data.
    pub skbs: Vec<Arc<SkBuff>>,
    /// Total payload bytes across `skbs`.
    pub len: usize,
}

/// Loss surface reported to the transport on each read.
#[derive(Debug, Default, Clone, Copy)]
pub struct SockError {
    /// Sequences abandoned and purged by the last read.
    pub lost_count: u32,
}

/// Session-long window statistics snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct RxwStats {
    /// Sequences lost for good over the session lifetime.
    pub cumulative_losses: u32,
    /// Fastest gap fill, detection to arrival (microseconds).
    pub min_fill_time: Timestamp,
    /// Slowest gap fill (microseconds).
    pub max_fill_time: Timestamp,
    /// Fewest NAKs needed to repair a sequence.
    pub min_nak_transmit_count: u32,
    /// Most NAKs needed to repair a sequence.
    pub max_nak_transmit_count: u32,
}

pub(super) enum PlaceholderOutcome {
    /// Placeholders created up to the requested sequence.
    Added(u32),
    /// The commit window blocks the extension.
    SlowConsumer,
}

// ============================================================================
// Receive window
// ============================================================================

/// Per-session receive window.
///
/// Single-threaded by contract: one transport thread serialises
/// admission, NAK bookkeeping, and reads. Sessions never share windows.
#[derive(Debug)]
pub struct RxWindow {
    tsi: crate::packet::Tsi,
    max_tpdu: u16,
    alloc: u32,
    pdata: Vec<Option<Box<RxPacket>>>,

    pub(super) trail: SequenceNumber,
    pub(super) commit_lead: SequenceNumber,
    pub(super) lead: SequenceNumber,
    pub(super) rxw_trail: SequenceNumber,
    pub(super) rxw_trail_init: SequenceNumber,
    pub(super) is_defined: bool,
    pub(super) is_constrained: bool,

    pub(super) is_fec_available: bool,
    pub(super) rs: Option<crate::fec::ReedSolomon>,
    pub(super) tg_size: u32,
    tg_sqn_shift: u32,

    backoff_queue: NakQueue,
    wait_ncf_queue: NakQueue,
    wait_data_queue: NakQueue,

    fragment_count: u32,
    parity_count: u32,
    committed_count: u32,
    lost_count: u32,
    size: usize,

    is_waiting: bool,
    pub(super) sock_err: SockError,

    cumulative_losses: u32,
    min_fill_time: Timestamp,
    max_fill_time: Timestamp,
    min_nak_transmit_count: u32,
    max_nak_transmit_count: u32,
}

impl RxWindow {
    /// Window sized directly in sequence numbers.
    ///
    /// # Panics
    ///
    /// Zero-length windows are not permitted.
    #[must_use]
    pub fn with_sqns(tsi: crate::packet::Tsi, max_tpdu: u16, sqns: u32) -> Self {
        Self::with_alloc(tsi, max_tpdu, sqns)
    }

    /// Window sized from a time span and the sender's maximum rate.
    ///
    /// # Panics
    ///
    /// When the derived capacity rounds to zero.
    #[must_use]
    pub fn with_rate(tsi: crate::packet::Tsi, max_tpdu: u16, secs: u32, max_rte: u32) -> Self {
        assert!(secs > 0 && max_rte > 0, "rate-sized window needs both terms");
        let alloc = (u64::from(secs) * u64::from(max_rte)) / u64::from(max_tpdu);
        Self::with_alloc(tsi, max_tpdu, alloc as u32)
    }

    fn with_alloc(tsi: crate::packet::Tsi, max_tpdu: u16, alloc: u32) -> Self {
        assert!(max_tpdu > 0, "maximum TPDU size must be non-zero");
        assert!(alloc > 0, "zero-length windows are not permitted");
        assert_eq!(alloc & 0x8000_0000, 0, "window exceeds the ordering span");

        debug!("init (tsi:{tsi} max-tpdu:{max_tpdu} sqns:{alloc})");

        let trail = SequenceNumber::new(0);
        Self {
            tsi,
            max_tpdu,
            alloc,
            pdata: (0..alloc).map(|_| None).collect(),
            trail,
            commit_lead: trail,
            lead: trail.prev(),
            rxw_trail: trail,
            rxw_trail_init: trail,
            is_defined: false,
            // limit retransmit requests on late session joining
            is_constrained: true,
            is_fec_available: false,
            rs: None,
            tg_size: 0,
            tg_sqn_shift: 0,
            backoff_queue: NakQueue::default(),
            wait_ncf_queue: NakQueue::default(),
            wait_data_queue: NakQueue::default(),
            fragment_count: 0,
            parity_count: 0,
            committed_count: 0,
            lost_count: 0,
            size: 0,
            is_waiting: false,
            sock_err: SockError::default(),
            cumulative_losses: 0,
            min_fill_time: 0,
            max_fill_time: 0,
            min_nak_transmit_count: 0,
            max_nak_transmit_count: 0,
        }
    }

    /// Enable parity recovery with the advertised `(n, k)` group
    /// geometry. `k` is the transmission-group size and must be a power
    /// of two.
    ///
    /// # Panics
    ///
    /// On invalid geometry.
    pub fn set_fec(&mut self, rs_n: u8, rs_k: u8) {
        assert!(rs_k > 0 && rs_k.is_power_of_two(), "tg size must be 2^n");
        assert!(rs_n > rs_k, "parity geometry needs n > k");

        self.rs = Some(crate::fec::ReedSolomon::new(rs_n as usize, rs_k as usize));
        self.tg_size = u32::from(rs_k);
        self.tg_sqn_shift = u32::from(rs_k).trailing_zeros();
        self.is_fec_available = true;
    }

    // ------------------------------------------------------------------
    // Geometry
    // ------------------------------------------------------------------

    /// Ring capacity in sequences.
    #[must_use]
    pub fn max_len(&self) -> u32 {
        self.alloc
    }

    /// Count of live sequences, `trail..=lead`.
    #[must_use]
    pub fn len(&self) -> u32 {
        self.lead.next().diff(self.trail)
    }

    /// True when no sequence is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when every ring slot is occupied.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() == self.alloc
    }

    /// Payload bytes held across all slots.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Oldest sequence still referenced by the window.
    #[must_use]
    pub fn trail(&self) -> SequenceNumber {
        self.trail
    }

    /// One past the last sequence released to the application.
    #[must_use]
    pub fn commit_lead(&self) -> SequenceNumber {
        self.commit_lead
    }

    /// Highest sequence ever admitted.
    #[must_use]
    pub fn lead(&self) -> SequenceNumber {
        self.lead
    }

    /// The sequence an in-order append would occupy next.
    #[must_use]
    pub fn next_lead(&self) -> SequenceNumber {
        self.lead.next()
    }

    pub(super) fn commit_len(&self) -> u32 {
        self.commit_lead.diff(self.trail)
    }

    pub(super) fn commit_is_empty(&self) -> bool {
        self.commit_len() == 0
    }

    pub(super) fn incoming_len(&self) -> u32 {
        self.lead.next().diff(self.commit_lead)
    }

    pub(super) fn incoming_is_empty(&self) -> bool {
        self.incoming_len() == 0
    }

    fn tg_sqn_mask(&self) -> u32 {
        u32::MAX << self.tg_sqn_shift
    }

    /// Transmission-group opener for `sequence`.
    pub(super) fn tg_sqn(&self, sequence: SequenceNumber) -> SequenceNumber {
        SequenceNumber::new(sequence.get() & self.tg_sqn_mask())
    }

    /// Packet index within its transmission group.
    pub(super) fn pkt_sqn(&self, sequence: SequenceNumber) -> u32 {
        sequence.get() & !self.tg_sqn_mask()
    }

    pub(super) fn is_first_of_tg(&self, sequence: SequenceNumber) -> bool {
        self.pkt_sqn(sequence) == 0
    }

    pub(super) fn is_last_of_tg(&self, sequence: SequenceNumber) -> bool {
        self.pkt_sqn(sequence) == self.tg_size.wrapping_sub(1)
    }

    // ------------------------------------------------------------------
    // Slot access
    // ------------------------------------------------------------------

    pub(super) fn index_of(&self, sequence: SequenceNumber) -> usize {
        (sequence.get() % self.alloc) as usize
    }

    /// The slot at `sequence`, or `None` outside `trail..=lead`.
    #[must_use]
    pub fn peek(&self, sequence: SequenceNumber) -> Option<&RxPacket> {
        if self.is_empty() {
            return None;
        }
        if sequence.gte(self.trail) && sequence.lte(self.lead) {
            self.pdata[self.index_of(sequence)].as_deref()
        } else {
            None
        }
    }

    /// Mutable slot access for the NAK engine (expiries, NAK counts).
    #[must_use]
    pub fn peek_mut(&mut self, sequence: SequenceNumber) -> Option<&mut RxPacket> {
        if self.is_empty() {
            return None;
        }
        if sequence.gte(self.trail) && sequence.lte(self.lead) {
            let idx = self.index_of(sequence);
            self.pdata[idx].as_deref_mut()
        } else {
            None
        }
    }

    /// In-range slot access; in-range is the caller's invariant.
    pub(super) fn slot(&self, sequence: SequenceNumber) -> &RxPacket {
        self.pdata[self.index_of(sequence)]
            .as_deref()
            .expect("window slot missing inside trail..=lead")
    }

    pub(super) fn slot_mut(&mut self, sequence: SequenceNumber) -> &mut RxPacket {
        let idx = self.index_of(sequence);
        self.pdata[idx]
            .as_deref_mut()
            .expect("window slot missing inside trail..=lead")
    }

    fn two_slots_mut(&mut self, a: usize, b: usize) -> (&mut RxPacket, &mut RxPacket) {
        debug_assert_ne!(a, b);
        let missing = "window slot missing inside trail..=lead";
        if a < b {
            let (left, right) = self.pdata.split_at_mut(b);
            (
                left[a].as_deref_mut().expect(missing),
                right[0].as_deref_mut().expect(missing),
            )
        } else {
            let (left, right) = self.pdata.split_at_mut(a);
            (
                right[0].as_deref_mut().expect(missing),
                left[b].as_deref_mut().expect(missing),
            )
        }
    }

    pub(super) fn free_slot(&mut self, sequence: SequenceNumber) {
        let idx = self.index_of(sequence);
        if let Some(pkt) = self.pdata[idx].take() {
            self.size -= pkt.skb.len();
        }
    }

    // ------------------------------------------------------------------
    // Queues
    // ------------------------------------------------------------------

    fn queue(&self, id: QueueId) -> &NakQueue {
        match id {
            QueueId::BackOff => &self.backoff_queue,
            QueueId::WaitNcf => &self.wait_ncf_queue,
            QueueId::WaitData => &self.wait_data_queue,
        }
    }

    fn queue_mut(&mut self, id: QueueId) -> &mut NakQueue {
        match id {
            QueueId::BackOff => &mut self.backoff_queue,
            QueueId::WaitNcf => &mut self.wait_ncf_queue,
            QueueId::WaitData => &mut self.wait_data_queue,
        }
    }

    fn queue_push_head(&mut self, id: QueueId, sequence: SequenceNumber) {
        let old_head = self.queue(id).head;
        {
            let slot = self.slot_mut(sequence);
            slot.link.prev = None;
            slot.link.next = old_head;
        }
        if let Some(head) = old_head {
            self.slot_mut(head).link.prev = Some(sequence);
        }
        let queue = self.queue_mut(id);
        queue.head = Some(sequence);
        if queue.tail.is_none() {
            queue.tail = Some(sequence);
        }
        queue.len += 1;
    }

    fn queue_unlink(&mut self, id: QueueId, sequence: SequenceNumber) {
        let QueueLink { next, prev } = self.slot(sequence).link;
        match prev {
            Some(prev) => self.slot_mut(prev).link.next = next,
            None => self.queue_mut(id).head = next,
        }
        match next {
            Some(next) => self.slot_mut(next).link.prev = prev,
            None => self.queue_mut(id).tail = prev,
        }
        let queue = self.queue_mut(id);
        debug_assert!(queue.len > 0, "unlink from empty queue");
        queue.len -= 1;
        self.slot_mut(sequence).link = QueueLink::default();
    }

    /// Sequences currently in the back-off phase.
    #[must_use]
    pub fn backoff_len(&self) -> usize {
        self.backoff_queue.len
    }

    /// Sequences awaiting NAK confirmation.
    #[must_use]
    pub fn wait_ncf_len(&self) -> usize {
        self.wait_ncf_queue.len
    }

    /// Sequences awaiting repair data.
    #[must_use]
    pub fn wait_data_len(&self) -> usize {
        self.wait_data_queue.len
    }

    /// Oldest back-off entry, next in line for a NAK.
    #[must_use]
    pub fn oldest_backoff(&self) -> Option<SequenceNumber> {
        self.backoff_queue.tail
    }

    /// Oldest entry awaiting NAK confirmation.
    #[must_use]
    pub fn oldest_wait_ncf(&self) -> Option<SequenceNumber> {
        self.wait_ncf_queue.tail
    }

    /// Oldest entry awaiting repair data.
    #[must_use]
    pub fn oldest_wait_data(&self) -> Option<SequenceNumber> {
        self.wait_data_queue.tail
    }

    // ------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------

    /// Transition the slot at `sequence` to `new_state`, updating the
    /// counter or queue the state owns.
    ///
    /// The slot must be unlinked (see [`RxWindow::unlink`]) before
    /// re-entering a queued or counted state.
    pub fn set_state(&mut self, sequence: SequenceNumber, new_state: PacketState) {
        match new_state {
            PacketState::BackOff => self.queue_push_head(QueueId::BackOff, sequence),
            PacketState::WaitNcf => self.queue_push_head(QueueId::WaitNcf, sequence),
            PacketState::WaitData => self.queue_push_head(QueueId::WaitData, sequence),
            PacketState::HaveData => {
                self.fragment_count += 1;
                debug_assert!(self.fragment_count <= self.len());
            }
            PacketState::HaveParity => {
                self.parity_count += 1;
                debug_assert!(self.parity_count <= self.len());
            }
            PacketState::CommitData => {
                self.committed_count += 1;
                debug_assert!(self.committed_count <= self.len());
            }
            PacketState::LostData => {
                self.lost_count += 1;
                self.cumulative_losses += 1;
                self.is_waiting = true;
                debug_assert!(self.lost_count <= self.len());
                debug!("sequence {sequence} abandoned as lost");
            }
            PacketState::Error => {}
        }
        self.slot_mut(sequence).state = new_state;
    }

    /// Remove the slot at `sequence` from its queue or counter and park
    /// it in `Error` pending re-installation.
    pub fn unlink(&mut self, sequence: SequenceNumber) {
        let state = self.slot(sequence).state;
        match state {
            PacketState::BackOff => self.queue_unlink(QueueId::BackOff, sequence),
            PacketState::WaitNcf => self.queue_unlink(QueueId::WaitNcf, sequence),
            PacketState::WaitData => self.queue_unlink(QueueId::WaitData, sequence),
            PacketState::HaveData => {
                debug_assert!(self.fragment_count > 0);
                self.fragment_count -= 1;
            }
            PacketState::HaveParity => {
                debug_assert!(self.parity_count > 0);
                self.parity_count -= 1;
            }
            PacketState::CommitData => {
                debug_assert!(self.committed_count > 0);
                self.committed_count -= 1;
            }
            PacketState::LostData => {
                debug_assert!(self.lost_count > 0);
                self.lost_count -= 1;
            }
            PacketState::Error => {}
        }
        self.slot_mut(sequence).state = PacketState::Error;
    }

    /// Abandon recovery of a queued sequence.
    ///
    /// # Panics
    ///
    /// The slot must be in a retransmit phase (BACK-OFF, WAIT-NCF or
    /// WAIT-DATA); anything else is a protocol-engine defect.
    pub fn lost(&mut self, sequence: SequenceNumber) {
        let state = self.slot(sequence).state;
        assert!(state.is_queued(), "lost() on {state} slot");
        self.unlink(sequence);
        self.set_state(sequence, PacketState::LostData);
    }

    /// Like [`RxWindow::lost`] for internal sanity failures where the
    /// slot may hold data already.
    pub(super) fn mark_lost_any(&mut self, sequence: SequenceNumber) {
        let Some(slot) = self.peek(sequence) else {
            return;
        };
        if matches!(slot.state, PacketState::LostData | PacketState::CommitData) {
            return;
        }
        self.unlink(sequence);
        self.set_state(sequence, PacketState::LostData);
    }

    /// Edge-triggered loss signal: set on any transition to LOST-DATA,
    /// cleared by the transport after waking the application.
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.is_waiting
    }

    /// Acknowledge the loss signal.
    pub fn clear_waiting(&mut self) {
        self.is_waiting = false;
    }

    // ------------------------------------------------------------------
    // Admission
    // ------------------------------------------------------------------

    /// Admit one received data or parity packet.
    ///
    /// Placeholders are created for every gap detected on the way; the
    /// advertised trail carried in the data header updates the window
    /// edges first.
    pub fn add(&mut self, mut skb: SkBuff, nak_rb_expiry: Timestamp) -> RxwStatus {
        debug_assert!(!skb.tsi.is_null(), "received packets carry a real TSI");
        debug_assert!(nak_rb_expiry > 0);

        trace!(
            "add (tsi:{} sequence:{} len:{})",
            skb.tsi,
            skb.sequence,
            skb.len()
        );

        // fragment-option sanity for original data; parity packets carry
        // an encoded fragment header instead
        if !skb.is_parity() {
            if let Some(frag) = skb.fragment {
                if (frag.apdu_len as usize) < skb.len() {
                    return RxwStatus::Malformed;
                }
                if frag.apdu_first_sqn.gt(skb.sequence) {
                    return RxwStatus::Malformed;
                }
                if frag.apdu_len > MAX_APDU {
                    return RxwStatus::Malformed;
                }
                // single-fragment APDUs are plain packets
                if frag.apdu_len as usize == skb.len() {
                    skb.fragment = None;
                }
            }
        }

        // first packet of a session defines the window
        if !self.is_defined {
            self.define(skb.sequence);
        } else {
            self.update_trail(skb.trail);
        }

        if skb.is_parity() {
            self.add_parity(skb, nak_rb_expiry)
        } else {
            self.add_data(skb, nak_rb_expiry)
        }
    }

    /// Parity bounds-checking happens at transmission-group granularity.
    fn add_parity(&mut self, skb: SkBuff, nak_rb_expiry: Timestamp) -> RxwStatus {
        let tg = self.tg_sqn(skb.sequence);

        if tg.lt(self.tg_sqn(self.commit_lead)) {
            return RxwStatus::Duplicate;
        }
        if tg.lt(self.tg_sqn(self.lead)) {
            return self.insert(skb);
        }
        if tg == self.tg_sqn(self.lead) {
            // a fully occupied group takes parity only into a still
            // missing slot
            if self.is_last_of_tg(self.lead) {
                return self.insert(skb);
            }
            let contiguous = self.peek(tg).map_or(true, |first| first.is_contiguous);
            if contiguous {
                return self.append(skb, true);
            }
            return self.insert(skb);
        }

        match self.add_placeholder_range(tg, nak_rb_expiry) {
            PlaceholderOutcome::SlowConsumer => RxwStatus::SlowConsumer,
            PlaceholderOutcome::Added(added) => match self.append(skb, false) {
                RxwStatus::Appended if added > 0 => RxwStatus::Missing,
                other => other,
            },
        }
    }

    fn add_data(&mut self, skb: SkBuff, nak_rb_expiry: Timestamp) -> RxwStatus {
        // strictly below commit_lead: the slot at commit_lead itself is
        // the head of the incoming window and may still need repair
        if skb.sequence.lt(self.commit_lead) {
            return RxwStatus::Duplicate;
        }
        if skb.sequence.lte(self.lead) {
            return self.insert(skb);
        }
        if skb.sequence == self.next_lead() {
            let contiguous = self.is_first_of_tg(skb.sequence);
            return self.append(skb, contiguous);
        }

        match self.add_placeholder_range(skb.sequence, nak_rb_expiry) {
            PlaceholderOutcome::SlowConsumer => RxwStatus::SlowConsumer,
            PlaceholderOutcome::Added(added) => match self.append(skb, false) {
                RxwStatus::Appended if added > 0 => RxwStatus::Missing,
                other => other,
            },
        }
    }

    // ------------------------------------------------------------------
    // Window edges
    // ------------------------------------------------------------------

    /// Update both edges from an SPM announcement; defines the window if
    /// this is the first word from the source. Returns placeholders
    /// created toward the advertised lead.
    pub fn update(
        &mut self,
        txw_trail: SequenceNumber,
        txw_lead: SequenceNumber,
        nak_rb_expiry: Timestamp,
    ) -> u32 {
        debug_assert!(nak_rb_expiry > 0);
        if !self.is_defined {
            self.define(txw_lead);
        }
        self.update_trail(txw_trail);
        self.update_lead(txw_lead, nak_rb_expiry)
    }

    pub(super) fn define(&mut self, lead: SequenceNumber) {
        debug_assert!(!self.is_defined);
        debug_assert!(self.is_empty());

        self.lead = lead.prev();
        self.trail = lead;
        self.commit_lead = self.trail;
        self.rxw_trail = self.trail;
        self.rxw_trail_init = self.trail;
        self.is_constrained = true;
        self.is_defined = true;
    }

    pub(super) fn update_trail(&mut self, txw_trail: SequenceNumber) {
        // retransmit requests stay constrained after a late join until
        // the advertised trail passes the first data sequence
        if self.is_constrained {
            if txw_trail.gt(self.rxw_trail_init) {
                self.is_constrained = false;
            } else {
                return;
            }
        }

        if txw_trail.lte(self.rxw_trail) {
            return;
        }
        self.rxw_trail = txw_trail;

        if self.rxw_trail.lte(self.trail) {
            return;
        }

        // jump the entire window when it holds nothing
        if self.is_empty() {
            let distance = self.rxw_trail.diff(self.trail);
            self.trail += distance;
            self.commit_lead = self.trail;
            self.lead += distance;
            self.cumulative_losses += distance;
            debug!("advertised trail jumped empty window by {distance}");
            return;
        }

        // sequences behind the advertised trail will never be repaired
        let mut sequence = self.commit_lead;
        while self.rxw_trail.gt(sequence) && sequence.lte(self.lead) {
            let queued = self
                .peek(sequence)
                .is_some_and(|slot| slot.state.is_queued());
            if queued {
                self.unlink(sequence);
                self.set_state(sequence, PacketState::LostData);
            }
            sequence = sequence.next();
        }

        debug_assert!(!self.is_full());
    }

    pub(super) fn update_lead(
        &mut self,
        txw_lead: SequenceNumber,
        nak_rb_expiry: Timestamp,
    ) -> u32 {
        if txw_lead.lte(self.lead) {
            return 0;
        }

        // committed packets pin the trail; the lead stops short of
        // overrunning them
        let target = if !self.commit_is_empty() && txw_lead.diff(self.trail) >= self.alloc {
            let clamped = self.trail + (self.alloc - 1);
            if clamped == self.lead {
                return 0;
            }
            clamped
        } else {
            txw_lead
        };

        let mut added = 0;
        while self.lead != target {
            if !self.reclaim_trail() {
                break;
            }
            self.add_placeholder(nak_rb_expiry);
            added += 1;
        }
        added
    }

    /// Make room for one more slot. True when the window is not full,
    /// or a run of lost sequences could be purged off the trail.
    pub(super) fn reclaim_trail(&mut self) -> bool {
        if !self.is_full() {
            return true;
        }
        if !self.commit_is_empty() {
            return false;
        }
        self.remove_trail_internal() > 0
    }

    fn add_placeholder(&mut self, nak_rb_expiry: Timestamp) {
        debug_assert!(!self.is_full());

        self.lead = self.lead.next();
        let sequence = self.lead;

        // a gap means the group no longer opens fully received
        if !self.is_first_of_tg(sequence) {
            let tg = self.tg_sqn(sequence);
            if let Some(first) = self.peek_mut(tg) {
                first.is_contiguous = false;
            }
        }

        let mut pkt = RxPacket::new(sequence, Arc::new(SkBuff::placeholder(sequence)));
        pkt.nak_rb_expiry = nak_rb_expiry;
        let idx = self.index_of(sequence);
        debug_assert!(self.pdata[idx].is_none(), "placeholder over a live slot");
        self.pdata[idx] = Some(Box::new(pkt));
        self.set_state(sequence, PacketState::BackOff);
    }

    pub(super) fn add_placeholder_range(
        &mut self,
        target: SequenceNumber,
        nak_rb_expiry: Timestamp,
    ) -> PlaceholderOutcome {
        debug_assert!(target.gt(self.lead));

        // the commit window caps how far the lead may extend
        let span = target.next().diff(self.trail);
        if !self.commit_is_empty() && span >= self.alloc {
            self.update_lead(target, nak_rb_expiry);
            return PlaceholderOutcome::SlowConsumer;
        }

        let mut added = 0;
        while self.next_lead() != target {
            if !self.reclaim_trail() {
                return PlaceholderOutcome::SlowConsumer;
            }
            self.add_placeholder(nak_rb_expiry);
            added += 1;
        }
        PlaceholderOutcome::Added(added)
    }

    // ------------------------------------------------------------------
    // Insert and append
    // ------------------------------------------------------------------

    /// First missing packet sequence in the transmission group opened by
    /// `tg`, or `None` when the group needs nothing.
    fn find_missing(&self, tg: SequenceNumber) -> Option<SequenceNumber> {
        let mut sequence = tg;
        for _ in 0..self.tg_size {
            if let Some(slot) = self.peek(sequence) {
                match slot.state {
                    PacketState::BackOff
                    | PacketState::WaitNcf
                    | PacketState::WaitData
                    | PacketState::LostData => return Some(sequence),
                    PacketState::HaveData
                    | PacketState::HaveParity
                    | PacketState::CommitData => {}
                    PacketState::Error => debug_assert!(false, "observed ERROR slot"),
                }
            }
            sequence = sequence.next();
        }
        None
    }

    /// True for a parity packet whose length contradicts the fixed
    /// packet length of its transmission group.
    fn is_invalid_var_pktlen(&self, skb: &SkBuff) -> bool {
        if !self.is_fec_available {
            return false;
        }
        if skb.options & crate::packet::OPT_VAR_PKTLEN != 0 {
            return false;
        }
        let tg = self.tg_sqn(skb.sequence);
        if tg == skb.sequence {
            return false;
        }
        match self.peek(tg) {
            // group opener fell out of the window: unrecoverable
            None => true,
            Some(first) => match first.state {
                PacketState::HaveData | PacketState::HaveParity | PacketState::CommitData => {
                    first.skb.len() != skb.len()
                }
                // nothing received yet to compare against
                _ => false,
            },
        }
    }

    /// True when payload-significant options disagree with the
    /// transmission group.
    fn is_invalid_payload_op(&self, skb: &SkBuff) -> bool {
        if !self.is_fec_available {
            return false;
        }
        let tg = self.tg_sqn(skb.sequence);
        if tg == skb.sequence {
            return false;
        }
        match self.peek(tg) {
            None => true,
            Some(first) => match first.state {
                PacketState::HaveData | PacketState::HaveParity | PacketState::CommitData => {
                    first.skb.has_payload_op() != skb.has_payload_op()
                }
                _ => false,
            },
        }
    }

    /// APDU-lost check for a packet not yet installed: only its fragment
    /// references can be inspected.
    fn is_apdu_lost_incoming(&self, skb: &SkBuff) -> bool {
        let Some(frag) = skb.fragment else {
            return false;
        };
        // the first fragment vouches for itself
        if frag.apdu_first_sqn == skb.sequence {
            return false;
        }
        match self.peek(frag.apdu_first_sqn) {
            None => true,
            Some(first) => first.state == PacketState::LostData,
        }
    }

    /// APDU-lost check for an installed slot.
    pub(super) fn is_slot_apdu_lost(&self, slot: &RxPacket) -> bool {
        if slot.state == PacketState::LostData {
            return true;
        }
        // parity substitutes carry encoded fragment headers; they speak
        // for the group, not for any one APDU
        if slot.state == PacketState::HaveParity {
            return false;
        }
        let Some(frag) = slot.skb.fragment else {
            return false;
        };
        if frag.apdu_first_sqn == slot.sequence {
            return false;
        }
        match self.peek(frag.apdu_first_sqn) {
            None => true,
            Some(first) => first.state == PacketState::LostData,
        }
    }

    /// Fill a waiting slot inside the window. The target carries the
    /// accumulated retransmit record; only the buffer is exchanged.
    pub(super) fn insert(&mut self, new_skb: SkBuff) -> RxwStatus {
        debug_assert!(!self.incoming_is_empty());

        // reconstructed packets were built from validated group state
        let trusted = new_skb.tsi.is_null();
        if !trusted && (self.is_invalid_var_pktlen(&new_skb) || self.is_invalid_payload_op(&new_skb))
        {
            return RxwStatus::Malformed;
        }

        let target = if new_skb.is_parity() {
            match self.find_missing(self.tg_sqn(new_skb.sequence)) {
                Some(sequence) => sequence,
                None => return RxwStatus::Duplicate,
            }
        } else {
            if self.slot(new_skb.sequence).state == PacketState::HaveData {
                return RxwStatus::Duplicate;
            }
            new_skb.sequence
        };

        // fragments of an abandoned APDU are dead on arrival
        if !new_skb.is_parity() && new_skb.fragment.is_some() && self.is_apdu_lost_incoming(&new_skb)
        {
            if self.slot(target).state.is_queued() {
                self.unlink(target);
                self.set_state(target, PacketState::LostData);
            }
            return RxwStatus::Bounds;
        }

        let state = self.slot(target).state;
        match state {
            PacketState::BackOff
            | PacketState::WaitNcf
            | PacketState::WaitData
            | PacketState::LostData => self.unlink(target),
            PacketState::HaveParity => {
                if !self.shuffle_parity(target) {
                    self.unlink(target);
                }
            }
            _ => unreachable!("insert into {state} slot"),
        }

        // gap-fill statistics
        let placeholder_tstamp = self.slot(target).skb.tstamp;
        let nak_count = u32::from(self.slot(target).nak_transmit_count);
        let fill_time = new_skb.tstamp.saturating_sub(placeholder_tstamp);
        if self.max_fill_time == 0 {
            self.max_fill_time = fill_time;
            self.min_fill_time = fill_time;
        } else if fill_time > self.max_fill_time {
            self.max_fill_time = fill_time;
        } else if fill_time < self.min_fill_time {
            self.min_fill_time = fill_time;
        }
        if self.max_nak_transmit_count == 0 {
            self.max_nak_transmit_count = nak_count;
            self.min_nak_transmit_count = nak_count;
        } else if nak_count > self.max_nak_transmit_count {
            self.max_nak_transmit_count = nak_count;
        } else if nak_count < self.min_nak_transmit_count {
            self.min_nak_transmit_count = nak_count;
        }

        // swap the buffer in; the retransmit record stays with the slot
        let is_parity = new_skb.is_parity();
        let new_len = new_skb.len();
        let old_len = self.slot(target).skb.len();
        self.slot_mut(target).skb = Arc::new(new_skb);
        self.size = self.size - old_len + new_len;
        self.set_state(
            target,
            if is_parity {
                PacketState::HaveParity
            } else {
                PacketState::HaveData
            },
        );

        RxwStatus::Inserted
    }

    /// Move the parity buffer occupying `data_sequence` into another
    /// still-missing slot of the same group, so arriving original data
    /// can take its place. Parity buffers only ever occupy slots whose
    /// data has not arrived.
    fn shuffle_parity(&mut self, data_sequence: SequenceNumber) -> bool {
        let Some(missing) = self.find_missing(self.tg_sqn(data_sequence)) else {
            return false;
        };
        debug_assert_ne!(missing, data_sequence);

        self.unlink(data_sequence);
        self.unlink(missing);
        {
            let di = self.index_of(data_sequence);
            let mi = self.index_of(missing);
            let (a, b) = self.two_slots_mut(di, mi);
            std::mem::swap(&mut a.skb, &mut b.skb);
            std::mem::swap(&mut a.nak_rb_expiry, &mut b.nak_rb_expiry);
            std::mem::swap(&mut a.nak_rdata_expiry, &mut b.nak_rdata_expiry);
            std::mem::swap(&mut a.nak_transmit_count, &mut b.nak_transmit_count);
            std::mem::swap(&mut a.is_contiguous, &mut b.is_contiguous);
        }
        self.set_state(missing, PacketState::HaveParity);
        true
    }

    /// Advance the lead by one slot and install `skb` there.
    pub(super) fn append(&mut self, skb: SkBuff, is_contiguous: bool) -> RxwStatus {
        if skb.is_parity() {
            debug_assert_eq!(self.tg_sqn(skb.sequence), self.tg_sqn(self.next_lead()));
        } else {
            debug_assert_eq!(skb.sequence, self.next_lead());
        }

        let trusted = skb.tsi.is_null();
        if !trusted && (self.is_invalid_var_pktlen(&skb) || self.is_invalid_payload_op(&skb)) {
            return RxwStatus::Malformed;
        }

        if !self.reclaim_trail() {
            return RxwStatus::SlowConsumer;
        }

        // fragments of an abandoned APDU still claim their slot, as lost
        if !skb.is_parity() && skb.fragment.is_some() && self.is_apdu_lost_incoming(&skb) {
            self.lead = self.lead.next();
            let sequence = self.lead;
            let pkt = RxPacket::new(sequence, Arc::new(SkBuff::placeholder(sequence)));
            let idx = self.index_of(sequence);
            debug_assert!(self.pdata[idx].is_none());
            self.pdata[idx] = Some(Box::new(pkt));
            self.set_state(sequence, PacketState::LostData);
            return RxwStatus::Bounds;
        }

        self.lead = self.lead.next();
        let sequence = self.lead;
        let is_parity = skb.is_parity();
        let len = skb.len();
        let mut pkt = RxPacket::new(sequence, Arc::new(skb));
        pkt.is_contiguous = is_contiguous;
        let idx = self.index_of(sequence);
        debug_assert!(self.pdata[idx].is_none());
        self.pdata[idx] = Some(Box::new(pkt));
        self.size += len;
        self.set_state(
            sequence,
            if is_parity {
                PacketState::HaveParity
            } else {
                PacketState::HaveData
            },
        );

        RxwStatus::Appended
    }

    // ------------------------------------------------------------------
    // NAK confirmation
    // ------------------------------------------------------------------

    /// Process an NCF for `sequence`: upgrade the retransmit phase, or
    /// extend the window when the confirmation runs ahead of the data.
    pub fn confirm(
        &mut self,
        sequence: SequenceNumber,
        nak_rdata_expiry: Timestamp,
        nak_rb_expiry: Timestamp,
    ) -> RxwStatus {
        // NCFs do not define the window
        if !self.is_defined {
            return RxwStatus::Ok;
        }
        if sequence.lt(self.commit_lead) {
            return RxwStatus::Ok;
        }
        if sequence.lte(self.lead) {
            return self.recovery_update(sequence, nak_rdata_expiry);
        }
        if sequence == self.next_lead() {
            return self.recovery_append(nak_rdata_expiry);
        }
        match self.add_placeholder_range(sequence, nak_rb_expiry) {
            PlaceholderOutcome::SlowConsumer => RxwStatus::SlowConsumer,
            PlaceholderOutcome::Added(_) => self.recovery_append(nak_rdata_expiry),
        }
    }

    fn recovery_update(
        &mut self,
        sequence: SequenceNumber,
        nak_rdata_expiry: Timestamp,
    ) -> RxwStatus {
        let state = self.slot(sequence).state;
        match state {
            PacketState::BackOff | PacketState::WaitNcf => {
                self.unlink(sequence);
                self.set_state(sequence, PacketState::WaitData);
                self.slot_mut(sequence).nak_rdata_expiry = nak_rdata_expiry;
                RxwStatus::Updated
            }
            PacketState::WaitData => {
                self.slot_mut(sequence).nak_rdata_expiry = nak_rdata_expiry;
                RxwStatus::Updated
            }
            PacketState::HaveData
            | PacketState::HaveParity
            | PacketState::CommitData
            | PacketState::LostData => RxwStatus::Duplicate,
            PacketState::Error => unreachable!("observed ERROR slot"),
        }
    }

    /// Append a WAIT-DATA placeholder at the next lead: the source has
    /// confirmed a sequence the window has not seen announced.
    fn recovery_append(&mut self, nak_rdata_expiry: Timestamp) -> RxwStatus {
        if !self.reclaim_trail() {
            return RxwStatus::SlowConsumer;
        }

        self.lead = self.lead.next();
        let sequence = self.lead;
        let mut pkt = RxPacket::new(sequence, Arc::new(SkBuff::placeholder(sequence)));
        pkt.nak_rdata_expiry = nak_rdata_expiry;
        let idx = self.index_of(sequence);
        debug_assert!(self.pdata[idx].is_none());
        self.pdata[idx] = Some(Box::new(pkt));
        self.set_state(sequence, PacketState::WaitData);

        RxwStatus::Appended
    }

    // ------------------------------------------------------------------
    // Statistics
    // ------------------------------------------------------------------

    /// Count of slots holding original data awaiting commit.
    #[must_use]
    pub fn fragment_count(&self) -> u32 {
        self.fragment_count
    }

    /// Count of slots holding parity substitutes.
    #[must_use]
    pub fn parity_count(&self) -> u32 {
        self.parity_count
    }

    /// Count of slots handed to the application and not yet released.
    #[must_use]
    pub fn committed_count(&self) -> u32 {
        self.committed_count
    }

    /// Count of slots abandoned as lost and not yet purged.
    #[must_use]
    pub fn lost_count(&self) -> u32 {
        self.lost_count
    }

    /// Sequences lost for good over the session lifetime.
    #[must_use]
    pub fn cumulative_losses(&self) -> u32 {
        self.cumulative_losses
    }

    pub(super) fn add_cumulative_losses(&mut self, count: u32) {
        self.cumulative_losses += count;
    }

    /// Loss surface from the most recent read.
    #[must_use]
    pub fn sock_err(&self) -> SockError {
        self.sock_err
    }

    /// Session statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> RxwStats {
        RxwStats {
            cumulative_losses: self.cumulative_losses,
            min_fill_time: self.min_fill_time,
            max_fill_time: self.max_fill_time,
            min_nak_transmit_count: self.min_nak_transmit_count,
            max_nak_transmit_count: self.max_nak_transmit_count,
        }
    }

    /// Session identity the window was created for.
    #[must_use]
    pub fn tsi(&self) -> crate::packet::Tsi {
        self.tsi
    }

    /// Maximum transport PDU size.
    #[must_use]
    pub fn max_tpdu(&self) -> u16 {
        self.max_tpdu
    }

    /// Build the recovered-packet fragment option from decoded bytes; an
    /// all-zero image means the original carried no fragment option.
    pub(super) fn decoded_fragment(bytes: &[u8; FragmentInfo::WIRE_LEN]) -> Option<FragmentInfo> {
        let frag = FragmentInfo::from_bytes(bytes);
        if frag.apdu_len == 0 {
            None
        } else {
            Some(frag)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Tsi;

    const BASE: u32 = 100;

    fn tsi() -> Tsi {
        Tsi::new([9, 9, 9, 9, 9, 9], 9000)
    }

    fn sqn(value: u32) -> SequenceNumber {
        SequenceNumber::new(value)
    }

    fn data(sequence: u32, payload: &[u8]) -> SkBuff {
        SkBuff::data(tsi(), sqn(sequence), sqn(BASE), payload.to_vec())
    }

    fn fragment(sequence: u32, first: u32, apdu_len: u32, payload: &[u8]) -> SkBuff {
        let mut skb = data(sequence, payload);
        skb.fragment = Some(FragmentInfo {
            apdu_first_sqn: sqn(first),
            frag_offset: sequence.wrapping_sub(first) * payload.len() as u32,
            apdu_len,
        });
        skb
    }

    /// Counter identity: every live slot is on exactly one queue or in
    /// exactly one counted state.
    fn check_invariants(window: &RxWindow) {
        let queued = window.backoff_len() + window.wait_ncf_len() + window.wait_data_len();
        let counted = window.fragment_count()
            + window.parity_count()
            + window.committed_count()
            + window.lost_count();
        assert_eq!(
            counted as usize + queued,
            window.len() as usize,
            "state counters and queues must cover every live slot exactly once"
        );
        assert!(window.len() <= window.max_len());
        assert!(window.commit_lead().gte(window.trail()));
        assert!(window.next_lead().gte(window.commit_lead()));
    }

    #[test]
    fn test_window_init_empty() {
        let window = RxWindow::with_sqns(tsi(), 1500, 32);
        assert_eq!(window.max_len(), 32);
        assert_eq!(window.len(), 0);
        assert!(window.is_empty());
        assert!(!window.is_full());
        assert_eq!(window.size(), 0);
    }

    #[test]
    fn test_window_sized_from_rate() {
        let window = RxWindow::with_rate(tsi(), 1500, 2, 150_000);
        assert_eq!(window.max_len(), 200);
    }

    #[test]
    fn test_first_packet_defines_window() {
        let mut window = RxWindow::with_sqns(tsi(), 1500, 32);
        assert_eq!(window.add(data(BASE, b"A"), 1), RxwStatus::Appended);

        assert_eq!(window.trail(), sqn(BASE));
        assert_eq!(window.commit_lead(), sqn(BASE));
        assert_eq!(window.lead(), sqn(BASE));
        assert_eq!(window.fragment_count(), 1);
        assert_eq!(window.len(), 1);
        check_invariants(&window);
    }

    #[test]
    fn test_in_order_appends() {
        let mut window = RxWindow::with_sqns(tsi(), 1500, 32);
        for i in 0..5 {
            assert_eq!(window.add(data(BASE + i, b"x"), 1), RxwStatus::Appended);
        }
        assert_eq!(window.lead(), sqn(BASE + 4));
        assert_eq!(window.fragment_count(), 5);
        assert_eq!(window.size(), 5);
        check_invariants(&window);
    }

    #[test]
    fn test_gap_creates_placeholders() {
        let mut window = RxWindow::with_sqns(tsi(), 1500, 32);
        assert_eq!(window.add(data(BASE, b"A"), 1), RxwStatus::Appended);
        assert_eq!(window.add(data(BASE + 3, b"D"), 1), RxwStatus::Missing);

        assert_eq!(window.backoff_len(), 2);
        assert_eq!(window.peek(sqn(BASE + 1)).unwrap().state(), PacketState::BackOff);
        assert_eq!(window.peek(sqn(BASE + 2)).unwrap().state(), PacketState::BackOff);
        assert_eq!(
            window.oldest_backoff(),
            Some(sqn(BASE + 1)),
            "queue tail is the oldest gap, first in line for a NAK"
        );
        assert_eq!(window.peek(sqn(BASE + 1)).unwrap().nak_rb_expiry, 1);
        check_invariants(&window);
    }

    #[test]
    fn test_insert_fills_placeholder() {
        let mut window = RxWindow::with_sqns(tsi(), 1500, 32);
        window.add(data(BASE, b"A"), 1);
        window.add(data(BASE + 2, b"C"), 1);

        assert_eq!(window.add(data(BASE + 1, b"B"), 1), RxwStatus::Inserted);
        assert_eq!(window.backoff_len(), 0);
        assert_eq!(window.fragment_count(), 3);
        assert_eq!(window.peek(sqn(BASE + 1)).unwrap().state(), PacketState::HaveData);
        check_invariants(&window);
    }

    #[test]
    fn test_duplicate_leaves_state_identical() {
        let mut window = RxWindow::with_sqns(tsi(), 1500, 32);
        assert_eq!(window.add(data(BASE, b"A"), 1), RxwStatus::Appended);

        let before = (
            window.trail(),
            window.commit_lead(),
            window.lead(),
            window.fragment_count(),
            window.size(),
        );
        assert_eq!(window.add(data(BASE, b"A"), 1), RxwStatus::Duplicate);
        let after = (
            window.trail(),
            window.commit_lead(),
            window.lead(),
            window.fragment_count(),
            window.size(),
        );
        assert_eq!(before, after, "a duplicate must not disturb the window");
        check_invariants(&window);
    }

    #[test]
    fn test_malformed_fragment_rejected_before_define() {
        let mut window = RxWindow::with_sqns(tsi(), 1500, 32);

        // apdu shorter than the fragment itself
        assert_eq!(
            window.add(fragment(BASE, BASE, 2, b"toolong"), 1),
            RxwStatus::Malformed
        );
        // first fragment after this sequence
        assert_eq!(
            window.add(fragment(BASE, BASE + 1, 64, b"x"), 1),
            RxwStatus::Malformed
        );
        // apdu over the protocol ceiling
        assert_eq!(
            window.add(fragment(BASE, BASE, MAX_APDU + 1, b"x"), 1),
            RxwStatus::Malformed
        );
        assert!(window.is_empty(), "no slot may be installed for malformed data");
    }

    #[test]
    fn test_single_fragment_apdu_normalised() {
        let mut window = RxWindow::with_sqns(tsi(), 1500, 32);
        assert_eq!(
            window.add(fragment(BASE, BASE, 5, b"hello"), 1),
            RxwStatus::Appended
        );
        assert!(
            window.peek(sqn(BASE)).unwrap().skb().fragment.is_none(),
            "apdu_len == len clears the fragment option"
        );
    }

    #[test]
    fn test_confirm_upgrades_backoff_to_wait_data() {
        let mut window = RxWindow::with_sqns(tsi(), 1500, 32);
        window.add(data(BASE, b"A"), 1);
        window.add(data(BASE + 2, b"C"), 1);

        assert_eq!(window.confirm(sqn(BASE + 1), 900, 1), RxwStatus::Updated);
        assert_eq!(window.backoff_len(), 0);
        assert_eq!(window.wait_data_len(), 1);
        let slot = window.peek(sqn(BASE + 1)).unwrap();
        assert_eq!(slot.state(), PacketState::WaitData);
        assert_eq!(slot.nak_rdata_expiry, 900);
        check_invariants(&window);
    }

    #[test]
    fn test_confirm_on_received_data_is_duplicate() {
        let mut window = RxWindow::with_sqns(tsi(), 1500, 32);
        window.add(data(BASE, b"A"), 1);
        window.add(data(BASE + 1, b"B"), 1);
        assert_eq!(window.confirm(sqn(BASE + 1), 900, 1), RxwStatus::Duplicate);
    }

    #[test]
    fn test_confirm_beyond_lead_extends_window() {
        let mut window = RxWindow::with_sqns(tsi(), 1500, 32);
        for i in 0..4 {
            window.add(data(BASE + i, b"x"), 1);
        }
        assert_eq!(window.confirm(sqn(BASE + 5), 900, 1), RxwStatus::Appended);

        assert_eq!(window.lead(), sqn(BASE + 5));
        assert_eq!(window.backoff_len(), 1, "the skipped sequence waits in back-off");
        assert_eq!(window.wait_data_len(), 1, "the confirmed sequence awaits repair");
        assert_eq!(
            window.peek(sqn(BASE + 5)).unwrap().state(),
            PacketState::WaitData
        );
        check_invariants(&window);
    }

    #[test]
    fn test_confirm_undefined_window_noop() {
        let mut window = RxWindow::with_sqns(tsi(), 1500, 32);
        assert_eq!(window.confirm(sqn(BASE), 900, 1), RxwStatus::Ok);
        assert!(window.is_empty());
    }

    #[test]
    fn test_lost_sets_waiting_edge() {
        let mut window = RxWindow::with_sqns(tsi(), 1500, 32);
        window.add(data(BASE, b"A"), 1);
        window.add(data(BASE + 2, b"C"), 1);
        assert!(!window.is_waiting());

        window.lost(sqn(BASE + 1));
        assert_eq!(window.lost_count(), 1);
        assert_eq!(window.cumulative_losses(), 1);
        assert!(window.is_waiting(), "loss must raise the wake-up edge");
        window.clear_waiting();
        assert!(!window.is_waiting());
        check_invariants(&window);
    }

    #[test]
    fn test_update_defines_and_jumps_empty_window() {
        let mut window = RxWindow::with_sqns(tsi(), 1500, 32);
        // SPM defines at lead 99, then advertises trail 100: the whole
        // span is already unrecoverable
        let added = window.update(sqn(BASE), sqn(BASE - 1), 1);
        assert_eq!(added, 0);
        assert_eq!(window.trail(), sqn(BASE));
        assert_eq!(window.lead(), sqn(BASE - 1));
        assert!(window.is_empty());
        assert_eq!(window.cumulative_losses(), 1);
    }

    #[test]
    fn test_update_trail_marks_queued_lost() {
        let mut window = RxWindow::with_sqns(tsi(), 1500, 32);
        window.add(data(BASE, b"A"), 1);
        window.add(data(BASE + 3, b"D"), 1);

        // source advertises trail past the gap at BASE+1
        let mut skb = data(BASE + 4, b"E");
        skb.trail = sqn(BASE + 2);
        assert_eq!(window.add(skb, 1), RxwStatus::Appended);

        assert_eq!(
            window.peek(sqn(BASE + 1)).unwrap().state(),
            PacketState::LostData,
            "sequences behind the advertised trail cannot be repaired"
        );
        assert_eq!(
            window.peek(sqn(BASE + 2)).unwrap().state(),
            PacketState::BackOff,
            "sequences at or past the trail stay recoverable"
        );
        assert_eq!(window.lost_count(), 1);
        check_invariants(&window);
    }

    #[test]
    fn test_update_lead_adds_placeholders() {
        let mut window = RxWindow::with_sqns(tsi(), 1500, 32);
        window.add(data(BASE, b"A"), 1);

        let added = window.update(sqn(BASE), sqn(BASE + 5), 1);
        assert_eq!(added, 5);
        assert_eq!(window.lead(), sqn(BASE + 5));
        assert_eq!(window.backoff_len(), 5);
        check_invariants(&window);
    }

    #[test]
    fn test_slow_consumer_commit_window_blocks_jump() {
        let mut window = RxWindow::with_sqns(tsi(), 1500, 4);
        for i in 0..4 {
            window.add(data(BASE + i, b"x"), 1);
        }
        let mut msgv = vec![Msgv::default(); 8];
        assert_eq!(window.readv(&mut msgv), Some(4));
        assert_eq!(window.committed_count(), 4);

        // application holds the whole window; a far-future packet cannot
        // be accommodated
        assert_eq!(window.add(data(BASE + 100, b"y"), 1), RxwStatus::SlowConsumer);
        assert_eq!(window.lead(), sqn(BASE + 3), "lead is pinned by the commit window");
        assert_eq!(window.trail(), sqn(BASE), "trail never advances past commits");
        check_invariants(&window);
    }

    #[test]
    fn test_slow_consumer_full_of_unread_data() {
        let mut window = RxWindow::with_sqns(tsi(), 1500, 4);
        for i in 0..4 {
            window.add(data(BASE + i, b"x"), 1);
        }
        // no readv at all: nothing is reclaimable
        assert_eq!(window.add(data(BASE + 4, b"y"), 1), RxwStatus::SlowConsumer);
        assert_eq!(window.trail(), sqn(BASE));
        assert_eq!(window.fragment_count(), 4);
        check_invariants(&window);
    }

    #[test]
    fn test_unlink_middle_of_queue() {
        let mut window = RxWindow::with_sqns(tsi(), 1500, 32);
        window.add(data(BASE, b"A"), 1);
        window.add(data(BASE + 4, b"E"), 1); // gaps at +1 +2 +3

        assert_eq!(window.backoff_len(), 3);
        assert_eq!(window.confirm(sqn(BASE + 2), 900, 1), RxwStatus::Updated);
        assert_eq!(window.backoff_len(), 2);
        assert_eq!(window.oldest_backoff(), Some(sqn(BASE + 1)));
        window.add(data(BASE + 1, b"B"), 1);
        assert_eq!(window.oldest_backoff(), Some(sqn(BASE + 3)));
        check_invariants(&window);
    }

    #[test]
    fn test_parity_fills_missing_slot() {
        let mut window = RxWindow::with_sqns(tsi(), 1500, 32);
        window.set_fec(5, 4);
        window.add(data(BASE, b"aaaa"), 1);
        window.add(data(BASE + 2, b"cccc"), 1);
        window.add(data(BASE + 3, b"dddd"), 1);

        let parity = SkBuff::parity(tsi(), sqn(BASE + 1), sqn(BASE), vec![0xAB; 4]);
        assert_eq!(window.add(parity, 1), RxwStatus::Inserted);
        assert_eq!(
            window.peek(sqn(BASE + 1)).unwrap().state(),
            PacketState::HaveParity
        );
        assert_eq!(window.parity_count(), 1);
        check_invariants(&window);
    }

    #[test]
    fn test_parity_redundant_for_complete_group() {
        let mut window = RxWindow::with_sqns(tsi(), 1500, 32);
        window.set_fec(5, 4);
        for i in 0..4 {
            window.add(data(BASE + i, b"xxxx"), 1);
        }
        let parity = SkBuff::parity(tsi(), sqn(BASE), sqn(BASE), vec![0xAB; 4]);
        assert_eq!(window.add(parity, 1), RxwStatus::Duplicate);
        check_invariants(&window);
    }

    #[test]
    fn test_shuffle_parity_moves_to_next_gap() {
        let mut window = RxWindow::with_sqns(tsi(), 1500, 32);
        window.set_fec(5, 4);
        window.add(data(BASE, b"aaaa"), 1);
        window.add(data(BASE + 3, b"dddd"), 1); // gaps at +1 +2

        let parity = SkBuff::parity(tsi(), sqn(BASE), sqn(BASE), vec![0xAB; 4]);
        assert_eq!(window.add(parity, 1), RxwStatus::Inserted);
        assert_eq!(
            window.peek(sqn(BASE + 1)).unwrap().state(),
            PacketState::HaveParity
        );

        // the original data for the parity-occupied slot arrives
        assert_eq!(window.add(data(BASE + 1, b"bbbb"), 1), RxwStatus::Inserted);
        assert_eq!(
            window.peek(sqn(BASE + 1)).unwrap().state(),
            PacketState::HaveData
        );
        assert_eq!(
            window.peek(sqn(BASE + 2)).unwrap().state(),
            PacketState::HaveParity,
            "parity shuffles into the remaining gap"
        );
        assert_eq!(window.peek(sqn(BASE + 2)).unwrap().skb().payload(), &[0xAB; 4]);
        assert_eq!(window.parity_count(), 1);
        assert_eq!(window.fragment_count(), 3);
        check_invariants(&window);
    }

    #[test]
    fn test_fill_statistics_recorded() {
        let mut window = RxWindow::with_sqns(tsi(), 1500, 32);
        window.add(data(BASE, b"A"), 1);
        window.add(data(BASE + 2, b"C"), 1);
        window.peek_mut(sqn(BASE + 1)).unwrap().nak_transmit_count = 3;
        window.add(data(BASE + 1, b"B"), 1);

        let stats = window.stats();
        assert_eq!(stats.max_nak_transmit_count, 3);
        assert_eq!(stats.min_nak_transmit_count, 3);
    }

    #[test]
    fn test_window_wraps_sequence_space() {
        let mut window = RxWindow::with_sqns(tsi(), 1500, 8);
        let start = u32::MAX - 1;
        let trail = sqn(start);
        for i in 0..4u32 {
            let sequence = sqn(start) + i;
            let skb = SkBuff::data(tsi(), sequence, trail, b"w".to_vec());
            assert_eq!(window.add(skb, 1), RxwStatus::Appended, "append {i} across wrap");
        }
        assert_eq!(window.len(), 4);
        assert_eq!(window.lead(), sqn(1));
        assert_eq!(window.trail(), sqn(u32::MAX - 1));
        check_invariants(&window);
    }
}
