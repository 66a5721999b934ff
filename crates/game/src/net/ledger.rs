use std::collections::VecDeque;
use std::time::Instant;

use super::protocol::{Packet, PacketHeader, PacketType};
use super::stats::NetworkStats;

/// Sent-packet slot count; must be a power of two.
const SENT_SLOTS: usize = 128;
/// Width of the receive window, in sequences.
const WINDOW_BITS: u32 = 64;
const RTT_SAMPLE_CAP: usize = 16;

#[derive(Debug, Clone, Copy)]
struct SentSlot {
    sequence: u32,
    sent_at: Option<Instant>,
    acked: bool,
}

const EMPTY_SLOT: SentSlot = SentSlot {
    sequence: 0,
    sent_at: None,
    acked: false,
};

/// Per-link wire bookkeeping, used identically by both ends of a
/// connection: stamps outgoing sequences and ack fields, filters replayed
/// datagrams, turns the remote's acks into delivery confirmations, and
/// keeps delivery statistics.
///
/// Outgoing packets occupy a fixed slot table keyed by the low sequence
/// bits; a slot reclaimed while still unacked counts its packet as lost.
/// The receive side is one 64-wide bitmask anchored at the newest sequence
/// seen — the same mask answers "is this a replay?" and supplies the
/// 32-bit ack field reported back to the remote. Sequences start at 1, so
/// an all-zero ack field from a remote that has received nothing can never
/// confirm a real packet.
#[derive(Debug)]
pub struct PacketLedger {
    next_sequence: u32,
    sent: [SentSlot; SENT_SLOTS],
    newest_received: Option<u32>,
    received_window: u64,
    rtt_samples: VecDeque<f32>,
    packets_stamped: u64,
    packets_accepted: u64,
    packets_acked: u64,
    packets_lost: u64,
}

impl Default for PacketLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketLedger {
    pub fn new() -> Self {
        Self {
            next_sequence: 1,
            sent: [EMPTY_SLOT; SENT_SLOTS],
            newest_received: None,
            received_window: 0,
            rtt_samples: VecDeque::with_capacity(RTT_SAMPLE_CAP),
            packets_stamped: 0,
            packets_accepted: 0,
            packets_acked: 0,
            packets_lost: 0,
        }
    }

    fn slot(sequence: u32) -> usize {
        sequence as usize & (SENT_SLOTS - 1)
    }

    /// Wraps a payload in a header carrying the next sequence and the
    /// current ack state, and begins tracking it for delivery.
    pub fn stamp(&mut self, payload: PacketType) -> Packet {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        if self.next_sequence == 0 {
            self.next_sequence = 1;
        }

        let slot = &mut self.sent[Self::slot(sequence)];
        if slot.sent_at.is_some() && !slot.acked {
            self.packets_lost += 1;
        }
        *slot = SentSlot {
            sequence,
            sent_at: Some(Instant::now()),
            acked: false,
        };
        self.packets_stamped += 1;

        let (ack, ack_bitfield) = self.ack_fields();
        Packet::new(PacketHeader::new(sequence, ack, ack_bitfield), payload)
    }

    /// Admits an incoming header. Returns false for a replayed or
    /// out-of-window sequence; a fresh one also has its ack fields applied
    /// to our sent slots.
    pub fn accept(&mut self, header: &PacketHeader) -> bool {
        if !self.admit_sequence(header.sequence) {
            return false;
        }
        self.packets_accepted += 1;
        self.apply_acks(header.ack, header.ack_bitfield);
        true
    }

    fn admit_sequence(&mut self, sequence: u32) -> bool {
        let Some(newest) = self.newest_received else {
            self.newest_received = Some(sequence);
            self.received_window = 1;
            return true;
        };

        if sequence == newest {
            return false;
        }

        let ahead = sequence.wrapping_sub(newest);
        if ahead < u32::MAX / 2 {
            self.received_window = if ahead >= WINDOW_BITS {
                1
            } else {
                (self.received_window << ahead) | 1
            };
            self.newest_received = Some(sequence);
            return true;
        }

        let behind = newest.wrapping_sub(sequence);
        if behind >= WINDOW_BITS {
            // Too old to distinguish from a replay.
            return false;
        }
        let bit = 1u64 << behind;
        if self.received_window & bit != 0 {
            return false;
        }
        self.received_window |= bit;
        true
    }

    /// Ack field layout: `ack` names the newest sequence received;
    /// bitfield bit i confirms `ack - 1 - i`. That is exactly the receive
    /// window shifted past its anchor bit.
    fn ack_fields(&self) -> (u32, u32) {
        match self.newest_received {
            None => (0, 0),
            Some(newest) => (newest, (self.received_window >> 1) as u32),
        }
    }

    fn apply_acks(&mut self, ack: u32, ack_bitfield: u32) {
        let now = Instant::now();
        for offset in 0..=32u32 {
            if offset > 0 && ack_bitfield & (1 << (offset - 1)) == 0 {
                continue;
            }
            let sequence = ack.wrapping_sub(offset);
            let slot = &mut self.sent[Self::slot(sequence)];
            if slot.sequence != sequence || slot.acked {
                continue;
            }
            let Some(sent_at) = slot.sent_at else {
                continue;
            };

            slot.acked = true;
            self.packets_acked += 1;

            if self.rtt_samples.len() >= RTT_SAMPLE_CAP {
                self.rtt_samples.pop_front();
            }
            self.rtt_samples
                .push_back(now.duration_since(sent_at).as_secs_f32() * 1000.0);
        }
    }

    /// Median of the recent samples. Robust to the odd retransmit-inflated
    /// outlier without smoothing constants to tune.
    pub fn rtt_ms(&self) -> f32 {
        if self.rtt_samples.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f32> = self.rtt_samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        sorted[sorted.len() / 2]
    }

    /// Spread of the recent samples, a rough jitter figure.
    pub fn rtt_spread_ms(&self) -> f32 {
        let mut lo = f32::INFINITY;
        let mut hi = f32::NEG_INFINITY;
        for &sample in &self.rtt_samples {
            lo = lo.min(sample);
            hi = hi.max(sample);
        }
        if lo > hi {
            0.0
        } else {
            hi - lo
        }
    }

    pub fn acked(&self) -> u64 {
        self.packets_acked
    }

    /// Byte counters belong to the socket owner; everything else is here.
    pub fn stats(&self) -> NetworkStats {
        let packet_loss_percent = if self.packets_stamped > 0 {
            self.packets_lost as f32 / self.packets_stamped as f32 * 100.0
        } else {
            0.0
        };
        NetworkStats {
            packets_sent: self.packets_stamped,
            packets_received: self.packets_accepted,
            packets_lost: self.packets_lost,
            bytes_sent: 0,
            bytes_received: 0,
            rtt_ms: self.rtt_ms(),
            rtt_variance: self.rtt_spread_ms(),
            packet_loss_percent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(sequence: u32, ack: u32, ack_bitfield: u32) -> PacketHeader {
        PacketHeader::new(sequence, ack, ack_bitfield)
    }

    fn ping() -> PacketType {
        PacketType::Ping { timestamp: 0 }
    }

    #[test]
    fn sequences_start_at_one() {
        let mut ledger = PacketLedger::new();
        assert_eq!(ledger.stamp(ping()).header.sequence, 1);
        assert_eq!(ledger.stamp(ping()).header.sequence, 2);

        // Nothing received yet, so nothing to ack.
        let packet = ledger.stamp(ping());
        assert_eq!(packet.header.ack, 0);
        assert_eq!(packet.header.ack_bitfield, 0);
    }

    #[test]
    fn replays_are_rejected() {
        let mut ledger = PacketLedger::new();
        assert!(ledger.accept(&header(5, 0, 0)));
        assert!(!ledger.accept(&header(5, 0, 0)));
        assert!(ledger.accept(&header(4, 0, 0)));
        assert!(!ledger.accept(&header(4, 0, 0)));
        assert!(ledger.accept(&header(6, 0, 0)));
    }

    #[test]
    fn sequences_behind_the_window_are_dropped() {
        let mut ledger = PacketLedger::new();
        assert!(ledger.accept(&header(200, 0, 0)));
        // 100 is 100 behind the newest; indistinguishable from a replay.
        assert!(!ledger.accept(&header(100, 0, 0)));
        // 150 is inside the 64-wide window and unseen.
        assert!(ledger.accept(&header(150, 0, 0)));
    }

    #[test]
    fn far_jump_resets_the_window() {
        let mut ledger = PacketLedger::new();
        assert!(ledger.accept(&header(1, 0, 0)));
        assert!(ledger.accept(&header(1_000, 0, 0)));
        // The old anchor is gone, but the window tracks the new one.
        assert!(ledger.accept(&header(999, 0, 0)));
        assert!(!ledger.accept(&header(999, 0, 0)));
    }

    #[test]
    fn ack_fields_rebuild_out_of_order_arrivals() {
        let mut ledger = PacketLedger::new();
        ledger.accept(&header(1, 0, 0));
        ledger.accept(&header(3, 0, 0));
        ledger.accept(&header(2, 0, 0));

        let packet = ledger.stamp(ping());
        assert_eq!(packet.header.ack, 3);
        // Bits 0 and 1 confirm sequences 2 and 1.
        assert_eq!(packet.header.ack_bitfield & 0b11, 0b11);
    }

    #[test]
    fn two_ledgers_confirm_delivery() {
        let mut a = PacketLedger::new();
        let mut b = PacketLedger::new();

        let outbound = a.stamp(ping());
        assert!(b.accept(&outbound.header));

        let reply = b.stamp(ping());
        assert!(a.accept(&reply.header));

        assert_eq!(a.acked(), 1);
        assert!(a.stats().rtt_ms >= 0.0);
        assert_eq!(b.acked(), 0);
    }

    #[test]
    fn bitfield_acks_cover_older_packets() {
        let mut a = PacketLedger::new();
        let mut b = PacketLedger::new();

        let first = a.stamp(ping());
        let second = a.stamp(ping());
        let third = a.stamp(ping());
        // All three arrive before b speaks.
        b.accept(&first.header);
        b.accept(&second.header);
        b.accept(&third.header);

        let reply = b.stamp(ping());
        a.accept(&reply.header);
        assert_eq!(a.acked(), 3);
    }

    #[test]
    fn reclaimed_unacked_slots_count_as_lost() {
        let mut ledger = PacketLedger::new();
        for _ in 0..129 {
            ledger.stamp(ping());
        }
        assert_eq!(ledger.stats().packets_lost, 1);
    }
}
