//
// Copyright 2025 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Value types passed between the pacer, the socket layer, the feedback adapter
//! and whatever consumes its output.

use std::cmp::Ordering;

use tcc_common::{DataSize, Instant};

/// `send_time_ms` before the socket layer has confirmed the send, or after the record expired.
pub const NO_SEND_TIME: i64 = -1;
/// `arrival_time_ms` when no feedback has arrived yet or the packet was reported lost.
/// Rebuilt arrival times may be negative, so this is out of their range and sorts last.
pub const NOT_RECEIVED: i64 = i64::MAX;
pub const NOT_A_PROBE: i32 = -1;

/// Pacing metadata, carried through to the output untouched.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct PacedPacketInfo {
    pub probe_cluster_id: i32,
    pub probe_cluster_min_probes: i32,
    pub probe_cluster_min_bytes: i32,
}

impl Default for PacedPacketInfo {
    fn default() -> Self {
        Self {
            probe_cluster_id: NOT_A_PROBE,
            probe_cluster_min_probes: -1,
            probe_cluster_min_bytes: -1,
        }
    }
}

impl PacedPacketInfo {
    pub fn new(
        probe_cluster_id: i32,
        probe_cluster_min_probes: i32,
        probe_cluster_min_bytes: i32,
    ) -> Self {
        Self {
            probe_cluster_id,
            probe_cluster_min_probes,
            probe_cluster_min_bytes,
        }
    }

    pub fn is_probe(&self) -> bool {
        self.probe_cluster_id != NOT_A_PROBE
    }
}

/// The local and remote network ids of the route a packet was sent on.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct NetworkRoute {
    pub local_net_id: u16,
    pub remote_net_id: u16,
}

/// Everything known about one packet with a transport-wide sequence number.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PacketFeedback {
    pub sequence_number: u16,
    /// `sequence_number` with rollovers counted.
    pub long_sequence_number: u64,
    pub send_time_ms: i64,
    pub arrival_time_ms: i64,
    /// Includes transport overhead.
    pub payload_size: usize,
    pub pacing_info: PacedPacketInfo,
    pub ssrc: Option<u32>,
    pub rtp_sequence_number: u16,
    pub network_route: NetworkRoute,
}

impl PacketFeedback {
    pub fn new(sequence_number: u16, payload_size: usize, pacing_info: PacedPacketInfo) -> Self {
        Self {
            sequence_number,
            long_sequence_number: sequence_number as u64,
            send_time_ms: NO_SEND_TIME,
            arrival_time_ms: NOT_RECEIVED,
            payload_size,
            pacing_info,
            ssrc: None,
            rtp_sequence_number: 0,
            network_route: NetworkRoute::default(),
        }
    }

    /// What is reported for a packet that was acknowledged after its record expired.
    pub fn expired(sequence_number: u16, long_sequence_number: u64, arrival_time_ms: i64) -> Self {
        Self {
            long_sequence_number,
            arrival_time_ms,
            ..Self::new(sequence_number, 0, PacedPacketInfo::default())
        }
    }

    pub fn is_received(&self) -> bool {
        self.arrival_time_ms != NOT_RECEIVED
    }

    pub fn has_send_time(&self) -> bool {
        self.send_time_ms != NO_SEND_TIME
    }
}

/// Orders by arrival time, then send time, then sequence number.
pub fn compare_by_arrival(a: &PacketFeedback, b: &PacketFeedback) -> Ordering {
    a.arrival_time_ms
        .cmp(&b.arrival_time_ms)
        .then(a.send_time_ms.cmp(&b.send_time_ms))
        .then(a.long_sequence_number.cmp(&b.long_sequence_number))
}

/// What the pacer knows about a packet when it hands it to the transport.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PacketSendInfo {
    pub transport_sequence_number: u16,
    pub ssrc: Option<u32>,
    pub rtp_sequence_number: u16,
    pub length: usize,
    pub pacing_info: PacedPacketInfo,
}

/// What the socket layer reports after a packet left.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SocketSentPacket {
    /// None for packets without a transport-wide sequence number.
    pub packet_id: Option<u16>,
    pub send_time: Instant,
    pub size: usize,
    /// Whether the packet counts against the send budget even without feedback.
    pub included_in_allocation: bool,
}

/// A confirmed send, as consumed by the bandwidth estimator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SentPacket {
    pub sequence_number: u64,
    pub send_time_ms: i64,
    pub size: DataSize,
    /// Untracked data sent since the previous tracked packet.
    pub prior_unacked_data: DataSize,
    /// Tracked data sent but not yet covered by feedback, including this packet.
    pub data_in_flight: DataSize,
    pub pacing_info: PacedPacketInfo,
}

/// One entry of the per-stream summary sent to stream feedback observers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StreamPacketInfo {
    pub ssrc: u32,
    pub rtp_sequence_number: u16,
    pub transport_sequence_number: u16,
    pub received: bool,
    pub payload_size: usize,
}

/// The result of processing one feedback message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransportPacketsFeedback {
    pub feedback_time: Instant,
    pub prior_in_flight: DataSize,
    pub data_in_flight: DataSize,
    /// In sequence number order.
    pub packet_feedbacks: Vec<PacketFeedback>,
}

impl TransportPacketsFeedback {
    pub fn received_with_send_info(&self) -> impl Iterator<Item = &PacketFeedback> {
        self.packet_feedbacks
            .iter()
            .filter(|packet| packet.is_received() && packet.has_send_time())
    }

    pub fn lost_with_send_info(&self) -> impl Iterator<Item = &PacketFeedback> {
        self.packet_feedbacks
            .iter()
            .filter(|packet| !packet.is_received() && packet.has_send_time())
    }

    pub fn sorted_by_arrival(&self) -> Vec<PacketFeedback> {
        let mut packets = self.packet_feedbacks.clone();
        packets.sort_by(compare_by_arrival);
        packets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(sequence_number: u16, send_time_ms: i64, arrival_time_ms: i64) -> PacketFeedback {
        PacketFeedback {
            send_time_ms,
            arrival_time_ms,
            ..PacketFeedback::new(sequence_number, 100, PacedPacketInfo::default())
        }
    }

    #[test]
    fn defaults() {
        let packet = PacketFeedback::new(7, 1200, PacedPacketInfo::new(2, 5, 4000));
        assert!(!packet.is_received());
        assert!(!packet.has_send_time());
        assert!(packet.pacing_info.is_probe());
        assert!(!PacedPacketInfo::default().is_probe());
    }

    #[test]
    fn expired_packets_have_no_send_info() {
        let packet = PacketFeedback::expired(3, 0x1_0003, 250);
        assert_eq!(NO_SEND_TIME, packet.send_time_ms);
        assert_eq!(0, packet.payload_size);
        assert_eq!(PacedPacketInfo::default(), packet.pacing_info);
        assert_eq!(0x1_0003, packet.long_sequence_number);
        assert!(packet.is_received());
    }

    #[test]
    fn arrival_order() {
        let feedback = TransportPacketsFeedback {
            feedback_time: Instant::now(),
            prior_in_flight: DataSize::ZERO,
            data_in_flight: DataSize::ZERO,
            packet_feedbacks: vec![
                packet(1, 10, 200),
                packet(2, 20, 150),
                packet(3, 15, 150),
                packet(4, 15, 150),
                packet(5, 30, NOT_RECEIVED),
            ],
        };
        assert_eq!(
            vec![3, 4, 2, 1, 5],
            feedback
                .sorted_by_arrival()
                .iter()
                .map(|packet| packet.sequence_number)
                .collect::<Vec<_>>()
        );
        assert_eq!(4, feedback.received_with_send_info().count());
        assert_eq!(1, feedback.lost_with_send_info().count());
    }
}
