//
// Copyright 2025 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! The send-side ledger: what was sent, when, and how big, keyed by transport-wide
//! sequence number, until feedback for it arrives or it gets too old to matter.

use std::collections::BTreeMap;

use log::*;
use tcc_common::{expand_truncated_counter, DataSize, Duration, Instant};

use crate::packet_feedback::{PacketFeedback, NOT_RECEIVED};

pub const DEFAULT_HISTORY_HORIZON: Duration = Duration::from_secs(60);

/// One sequence number as reported by the receiver.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReportedPacket {
    pub sequence_number: u16,
    /// None if the receiver reported the packet as not received.
    pub arrival_time_ms: Option<i64>,
}

impl ReportedPacket {
    pub fn received(sequence_number: u16, arrival_time_ms: i64) -> Self {
        Self {
            sequence_number,
            arrival_time_ms: Some(arrival_time_ms),
        }
    }

    pub fn lost(sequence_number: u16) -> Self {
        Self {
            sequence_number,
            arrival_time_ms: None,
        }
    }
}

/// The outcome of [`PacketFeedbackHistory::on_sent_packet`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SendConfirmation {
    Confirmed(PacketFeedback),
    /// The packet already had a send time; nothing changed.
    Duplicate,
    /// No such packet in the ledger.
    Unknown,
}

#[derive(Debug)]
struct Entry {
    feedback: PacketFeedback,
    creation_time: Instant,
    in_flight: bool,
}

#[derive(Debug)]
pub struct PacketFeedbackHistory {
    horizon: Duration,
    entries: BTreeMap<u64, Entry>,
    /// Sequence numbers evicted for age, with the time of eviction.
    expired: BTreeMap<u64, Instant>,
    max_sequence_number: u64,
    /// Everything at or below this has been covered by feedback.
    last_acked: Option<u64>,
    in_flight: DataSize,
}

impl Default for PacketFeedbackHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_HORIZON)
    }
}

impl PacketFeedbackHistory {
    pub fn new(horizon: Duration) -> Self {
        Self {
            horizon,
            entries: BTreeMap::new(),
            expired: BTreeMap::new(),
            max_sequence_number: 0,
            last_acked: None,
            in_flight: DataSize::ZERO,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Data that was confirmed sent and is not yet covered by feedback.
    pub fn outstanding_data(&self) -> DataSize {
        self.in_flight
    }

    fn expand_for_lookup(&self, sequence_number: u16) -> u64 {
        let mut max = self.max_sequence_number;
        expand_truncated_counter(sequence_number, &mut max, 16)
    }

    /// Records a packet that is about to be sent. Entries older than the horizon, measured
    /// from `creation_time`, are evicted.
    pub fn add_packet(&mut self, mut packet: PacketFeedback, creation_time: Instant) {
        self.evict_older_than(creation_time);

        let long_sequence_number =
            expand_truncated_counter(packet.sequence_number, &mut self.max_sequence_number, 16);
        packet.long_sequence_number = long_sequence_number;
        self.expired.remove(&long_sequence_number);

        let entry = Entry {
            feedback: packet,
            creation_time,
            in_flight: false,
        };
        if let Some(replaced) = self.entries.insert(long_sequence_number, entry) {
            warn!(
                "transport sequence number {} added twice; replacing the earlier packet",
                replaced.feedback.sequence_number
            );
            if replaced.in_flight {
                self.in_flight = self
                    .in_flight
                    .saturating_sub(DataSize::from_bytes(replaced.feedback.payload_size as u64));
            }
        }
    }

    fn evict_older_than(&mut self, now: Instant) {
        while let Some(oldest) = self.entries.first_entry() {
            if now.saturating_duration_since(oldest.get().creation_time) <= self.horizon {
                break;
            }
            let (long_sequence_number, evicted) = oldest.remove_entry();
            if evicted.in_flight {
                self.in_flight = self
                    .in_flight
                    .saturating_sub(DataSize::from_bytes(evicted.feedback.payload_size as u64));
            }
            self.expired.insert(long_sequence_number, now);
        }

        while let Some(oldest) = self.expired.first_entry() {
            if now.saturating_duration_since(*oldest.get()) <= self.horizon {
                break;
            }
            oldest.remove();
        }
    }

    /// Stamps the send time on a packet that the socket layer reports as sent.
    pub fn on_sent_packet(&mut self, sequence_number: u16, send_time_ms: i64) -> SendConfirmation {
        let long_sequence_number = self.expand_for_lookup(sequence_number);
        let already_acked = self
            .last_acked
            .is_some_and(|acked| long_sequence_number <= acked);
        match self.entries.get_mut(&long_sequence_number) {
            None => SendConfirmation::Unknown,
            Some(entry) if entry.feedback.has_send_time() => SendConfirmation::Duplicate,
            Some(entry) => {
                entry.feedback.send_time_ms = send_time_ms;
                if !already_acked {
                    entry.in_flight = true;
                    self.in_flight += DataSize::from_bytes(entry.feedback.payload_size as u64);
                }
                SendConfirmation::Confirmed(entry.feedback.clone())
            }
        }
    }

    fn acknowledge_through(&mut self, long_sequence_number: u64) {
        let first_unacked = self.last_acked.map_or(0, |acked| acked + 1);
        if first_unacked > long_sequence_number {
            return;
        }
        for entry in self
            .entries
            .range_mut(first_unacked..=long_sequence_number)
            .map(|(_, entry)| entry)
            .filter(|entry| entry.in_flight)
        {
            entry.in_flight = false;
            self.in_flight = self
                .in_flight
                .saturating_sub(DataSize::from_bytes(entry.feedback.payload_size as u64));
        }
        self.last_acked = Some(long_sequence_number);
    }

    /// Merges one feedback report into the ledger and returns the merged record for every
    /// reported sequence number that could be found, in report order.
    ///
    /// Received packets leave the ledger; packets reported as not received stay, since a
    /// later report may still acknowledge them. Sequence numbers that expired are reported
    /// without send information. Unknown sequence numbers are left out.
    pub fn get_packets_and_apply_feedback(
        &mut self,
        report: &[ReportedPacket],
    ) -> Vec<PacketFeedback> {
        if let Some(newest) = report
            .iter()
            .map(|reported| self.expand_for_lookup(reported.sequence_number))
            .max()
        {
            self.acknowledge_through(newest);
        }

        let mut packets = Vec::with_capacity(report.len());
        let mut failed_lookups = 0usize;
        for reported in report {
            let long_sequence_number = self.expand_for_lookup(reported.sequence_number);
            match reported.arrival_time_ms {
                Some(arrival_time_ms) => {
                    if let Some(entry) = self.entries.remove(&long_sequence_number) {
                        packets.push(PacketFeedback {
                            arrival_time_ms,
                            ..entry.feedback
                        });
                    } else if self.expired.remove(&long_sequence_number).is_some() {
                        packets.push(PacketFeedback::expired(
                            reported.sequence_number,
                            long_sequence_number,
                            arrival_time_ms,
                        ));
                    } else {
                        failed_lookups += 1;
                    }
                }
                None => {
                    if let Some(entry) = self.entries.get(&long_sequence_number) {
                        packets.push(PacketFeedback {
                            arrival_time_ms: NOT_RECEIVED,
                            ..entry.feedback.clone()
                        });
                    } else if self.expired.contains_key(&long_sequence_number) {
                        packets.push(PacketFeedback::expired(
                            reported.sequence_number,
                            long_sequence_number,
                            NOT_RECEIVED,
                        ));
                    } else {
                        failed_lookups += 1;
                    }
                }
            }
        }

        if failed_lookups > 0 {
            warn!(
                "Failed to lookup send time for {} packet{}. Send time history too small?",
                failed_lookups,
                if failed_lookups == 1 { "" } else { "s" }
            );
        }
        packets
    }

    pub fn get_packet(&self, sequence_number: u16) -> Option<&PacketFeedback> {
        self.entries
            .get(&self.expand_for_lookup(sequence_number))
            .map(|entry| &entry.feedback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet_feedback::{PacedPacketInfo, NO_SEND_TIME};

    fn packet(sequence_number: u16, payload_size: usize) -> PacketFeedback {
        PacketFeedback::new(sequence_number, payload_size, PacedPacketInfo::default())
    }

    fn sequence_numbers(packets: &[PacketFeedback]) -> Vec<u16> {
        packets.iter().map(|packet| packet.sequence_number).collect()
    }

    #[test]
    fn confirm_send() {
        let now = Instant::now();
        let mut history = PacketFeedbackHistory::default();
        history.add_packet(packet(1, 100), now);

        match history.on_sent_packet(1, 42) {
            SendConfirmation::Confirmed(confirmed) => {
                assert_eq!(1, confirmed.sequence_number);
                assert_eq!(42, confirmed.send_time_ms);
                assert_eq!(100, confirmed.payload_size);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(SendConfirmation::Duplicate, history.on_sent_packet(1, 43));
        assert_eq!(Some(42), history.get_packet(1).map(|p| p.send_time_ms));
        assert_eq!(SendConfirmation::Unknown, history.on_sent_packet(2, 44));
    }

    #[test]
    fn received_packets_leave_and_lost_packets_stay() {
        let now = Instant::now();
        let mut history = PacketFeedbackHistory::default();
        for seqnum in 0..4 {
            history.add_packet(packet(seqnum, 100), now);
            history.on_sent_packet(seqnum, seqnum as i64);
        }

        let packets = history.get_packets_and_apply_feedback(&[
            ReportedPacket::received(0, 100),
            ReportedPacket::lost(1),
            ReportedPacket::received(2, 120),
        ]);
        assert_eq!(vec![0, 1, 2], sequence_numbers(&packets));
        assert_eq!(
            vec![100, NOT_RECEIVED, 120],
            packets.iter().map(|p| p.arrival_time_ms).collect::<Vec<_>>()
        );
        assert!(history.get_packet(0).is_none());
        assert!(history.get_packet(1).is_some());
        assert!(history.get_packet(2).is_none());
        assert_eq!(2, history.len());

        // A later report can still acknowledge the packet reported lost.
        let packets = history.get_packets_and_apply_feedback(&[
            ReportedPacket::received(1, 130),
            ReportedPacket::received(3, 140),
        ]);
        assert_eq!(vec![1, 3], sequence_numbers(&packets));
        assert_eq!(1, packets[0].send_time_ms);
        assert_eq!(100, packets[0].payload_size);
        assert!(history.is_empty());
    }

    #[test]
    fn unknown_packets_are_left_out() {
        let now = Instant::now();
        let mut history = PacketFeedbackHistory::default();
        history.add_packet(packet(5, 100), now);

        let packets = history.get_packets_and_apply_feedback(&[
            ReportedPacket::received(3, 10),
            ReportedPacket::lost(4),
            ReportedPacket::received(5, 12),
        ]);
        assert_eq!(vec![5], sequence_numbers(&packets));
    }

    #[test]
    fn expired_packets_are_reported_without_send_info() {
        let start = Instant::now();
        let mut history = PacketFeedbackHistory::new(Duration::SECOND);
        history.add_packet(packet(0, 100), start);
        history.on_sent_packet(0, 0);
        history.add_packet(packet(1, 100), start + Duration::from_millis(500));
        history.on_sent_packet(1, 500);
        assert_eq!(DataSize::from_bytes(200), history.outstanding_data());

        history.add_packet(packet(2, 100), start + Duration::from_millis(1200));
        assert!(history.get_packet(0).is_none());
        assert!(history.get_packet(1).is_some());
        assert_eq!(DataSize::from_bytes(100), history.outstanding_data());

        let packets = history.get_packets_and_apply_feedback(&[
            ReportedPacket::received(0, 300),
            ReportedPacket::received(1, 800),
        ]);
        assert_eq!(vec![0, 1], sequence_numbers(&packets));
        assert_eq!(NO_SEND_TIME, packets[0].send_time_ms);
        assert_eq!(0, packets[0].payload_size);
        assert_eq!(PacedPacketInfo::default(), packets[0].pacing_info);
        assert_eq!(300, packets[0].arrival_time_ms);
        assert_eq!(500, packets[1].send_time_ms);
    }

    #[test]
    fn expired_markers_are_eventually_forgotten() {
        let start = Instant::now();
        let mut history = PacketFeedbackHistory::new(Duration::SECOND);
        history.add_packet(packet(0, 100), start);
        history.add_packet(packet(1, 100), start + Duration::from_secs(2));
        history.add_packet(packet(2, 100), start + Duration::from_secs(4));

        let packets = history.get_packets_and_apply_feedback(&[ReportedPacket::lost(0)]);
        assert!(packets.is_empty());
        let packets = history.get_packets_and_apply_feedback(&[ReportedPacket::lost(1)]);
        assert_eq!(vec![1], sequence_numbers(&packets));
    }

    #[test]
    fn sequence_numbers_roll_over() {
        let now = Instant::now();
        let mut history = PacketFeedbackHistory::default();
        for seqnum in [0xFFFE, 0xFFFF, 0, 1] {
            history.add_packet(packet(seqnum, 100), now);
        }
        let packets = history.get_packets_and_apply_feedback(&[
            ReportedPacket::received(0xFFFE, 1),
            ReportedPacket::received(0xFFFF, 2),
            ReportedPacket::received(0, 3),
            ReportedPacket::received(1, 4),
        ]);
        assert_eq!(
            vec![0xFFFE, 0xFFFF, 0x1_0000, 0x1_0001],
            packets
                .iter()
                .map(|p| p.long_sequence_number)
                .collect::<Vec<_>>()
        );
        assert!(history.is_empty());
    }

    #[test]
    fn feedback_covers_data_in_flight() {
        let now = Instant::now();
        let mut history = PacketFeedbackHistory::default();
        for seqnum in 0..3 {
            history.add_packet(packet(seqnum, 100), now);
            history.on_sent_packet(seqnum, 0);
        }
        assert_eq!(DataSize::from_bytes(300), history.outstanding_data());

        history.get_packets_and_apply_feedback(&[
            ReportedPacket::lost(0),
            ReportedPacket::received(1, 10),
        ]);
        assert_eq!(DataSize::from_bytes(100), history.outstanding_data());

        // Feedback for a newer packet covers older ones that were never reported.
        history.add_packet(packet(3, 100), now);
        history.get_packets_and_apply_feedback(&[ReportedPacket::received(3, 20)]);
        assert_eq!(DataSize::ZERO, history.outstanding_data());
    }

    #[test]
    fn adding_twice_replaces() {
        let now = Instant::now();
        let mut history = PacketFeedbackHistory::default();
        history.add_packet(packet(7, 100), now);
        history.on_sent_packet(7, 0);
        history.add_packet(packet(7, 250), now);
        assert_eq!(1, history.len());
        assert_eq!(DataSize::ZERO, history.outstanding_data());
        assert_eq!(Some(250), history.get_packet(7).map(|p| p.payload_size));
        assert!(matches!(
            history.on_sent_packet(7, 5),
            SendConfirmation::Confirmed(_)
        ));
    }
}
