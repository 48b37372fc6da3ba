//
// Copyright 2025 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Replays a trace of send-side events through a [`TransportFeedbackAdapter`].
//!
//! A trace is a file of JSON objects, one per line, each tagged by its `event` field:
//!
//! ```text
//! {"event":"add","at_ms":0,"transport_sequence_number":1,"ssrc":7,"length":1200}
//! {"event":"sent","at_ms":1,"transport_sequence_number":1,"size":1228}
//! {"event":"feedback","at_ms":90,"arrivals":[{"sequence_number":1,"arrival_us":41000}]}
//! {"event":"rtcp","at_ms":95,"packet":"8fcd0005..."}
//! ```
//!
//! `feedback` events are encoded into RTCP messages before being replayed, `rtcp` events
//! carry a captured message as hex.

use std::{
    io::BufRead,
    sync::{mpsc, Arc},
};

use anyhow::{Context, Result};
use log::*;
use serde::{Deserialize, Serialize};
use tcc_common::{Duration, Instant};

use crate::{
    adapter::TransportFeedbackAdapter,
    config::{AdapterConfig, Config},
    packet_feedback::{PacedPacketInfo, PacketSendInfo, SocketSentPacket},
    transportcc::TransportFeedback,
};

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    Route {
        at_ms: u64,
        local_net_id: u16,
        remote_net_id: u16,
    },
    Add {
        at_ms: u64,
        transport_sequence_number: u16,
        #[serde(default)]
        ssrc: Option<u32>,
        #[serde(default)]
        rtp_sequence_number: u16,
        length: usize,
        #[serde(default)]
        overhead: usize,
        #[serde(default)]
        probe_cluster_id: Option<i32>,
    },
    Sent {
        at_ms: u64,
        #[serde(default)]
        transport_sequence_number: Option<u16>,
        size: usize,
        #[serde(default)]
        included_in_allocation: bool,
    },
    Feedback {
        at_ms: u64,
        arrivals: Vec<Arrival>,
    },
    Rtcp {
        at_ms: u64,
        #[serde(with = "hex::serde")]
        packet: Vec<u8>,
    },
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arrival {
    pub sequence_number: u16,
    pub arrival_us: i64,
}

/// Counts of what happened during a replay.
#[derive(Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplaySummary {
    pub packets_added: usize,
    pub packets_sent: usize,
    pub feedback_messages: usize,
    pub malformed_feedback: usize,
    pub unmatched_feedback: usize,
    pub packets_received: usize,
    pub packets_lost: usize,
    pub stream_feedback_vectors: usize,
}

/// Reads one event per non-empty line.
pub fn read_trace(reader: impl BufRead) -> impl Iterator<Item = Result<TraceEvent>> {
    reader
        .lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let line = match line {
                Ok(line) => line,
                Err(err) => return Some(Err(err.into())),
            };
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            Some(serde_json::from_str(line).with_context(|| format!("trace line {}", index + 1)))
        })
}

/// Packs the arrivals into as many feedback messages as needed, in order.
pub fn encode_arrivals(arrivals: &[Arrival], feedback_count: &mut u8) -> Vec<TransportFeedback> {
    let mut messages = Vec::new();
    let mut current: Option<TransportFeedback> = None;
    for arrival in arrivals {
        loop {
            let feedback = current.get_or_insert_with(|| {
                let mut feedback = TransportFeedback::new();
                feedback.set_base(arrival.sequence_number, arrival.arrival_us);
                feedback.set_feedback_packet_count(*feedback_count);
                *feedback_count = feedback_count.wrapping_add(1);
                feedback
            });
            if feedback.add_received_packet(arrival.sequence_number, arrival.arrival_us) {
                break;
            }
            if feedback.packet_status_count() == 0 {
                warn!(
                    "cannot encode arrival of transport sequence number {}",
                    arrival.sequence_number
                );
                current = None;
                break;
            }
            messages.extend(current.take());
        }
    }
    messages.extend(current);
    messages
}

struct Replayer<'a> {
    adapter: &'a TransportFeedbackAdapter,
    epoch: Instant,
    feedback_count: u8,
    log_vectors: bool,
    summary: ReplaySummary,
}

impl Replayer<'_> {
    fn at(&self, at_ms: u64) -> Instant {
        self.epoch + Duration::from_millis(at_ms)
    }

    fn apply(&mut self, event: TraceEvent) {
        match event {
            TraceEvent::Route {
                at_ms: _,
                local_net_id,
                remote_net_id,
            } => {
                self.adapter.set_network_ids(local_net_id, remote_net_id);
            }
            TraceEvent::Add {
                at_ms,
                transport_sequence_number,
                ssrc,
                rtp_sequence_number,
                length,
                overhead,
                probe_cluster_id,
            } => {
                let pacing_info = probe_cluster_id.map_or_else(PacedPacketInfo::default, |id| {
                    PacedPacketInfo {
                        probe_cluster_id: id,
                        ..Default::default()
                    }
                });
                self.adapter.add_packet(
                    &PacketSendInfo {
                        transport_sequence_number,
                        ssrc,
                        rtp_sequence_number,
                        length,
                        pacing_info,
                    },
                    overhead,
                    self.at(at_ms),
                );
                self.summary.packets_added += 1;
            }
            TraceEvent::Sent {
                at_ms,
                transport_sequence_number,
                size,
                included_in_allocation,
            } => {
                let sent = self.adapter.process_sent_packet(&SocketSentPacket {
                    packet_id: transport_sequence_number,
                    send_time: self.at(at_ms),
                    size,
                    included_in_allocation,
                });
                if sent.is_some() {
                    self.summary.packets_sent += 1;
                }
            }
            TraceEvent::Feedback { at_ms, arrivals } => {
                for feedback in encode_arrivals(&arrivals, &mut self.feedback_count) {
                    self.process_rtcp(at_ms, &feedback.build());
                }
            }
            TraceEvent::Rtcp { at_ms, packet } => self.process_rtcp(at_ms, &packet),
        }
    }

    fn process_rtcp(&mut self, at_ms: u64, packet: &[u8]) {
        let feedback = match TransportFeedback::parse(packet) {
            Ok(feedback) => feedback,
            Err(err) => {
                warn!("dropping transport feedback at {}ms: {}", at_ms, err);
                self.summary.malformed_feedback += 1;
                return;
            }
        };
        self.summary.feedback_messages += 1;

        let Some(result) = self
            .adapter
            .process_transport_feedback(&feedback, self.at(at_ms))
        else {
            self.summary.unmatched_feedback += 1;
            return;
        };
        let received = result
            .packet_feedbacks
            .iter()
            .filter(|packet| packet.is_received())
            .count();
        self.summary.packets_received += received;
        self.summary.packets_lost += result.packet_feedbacks.len() - received;

        if self.log_vectors {
            for packet in result.sorted_by_arrival() {
                let arrived = if packet.is_received() {
                    packet.arrival_time_ms.to_string()
                } else {
                    "never".to_string()
                };
                info!(
                    "seqnum {} ({}) sent {} arrived {} size {} probe {}",
                    packet.sequence_number,
                    packet.long_sequence_number,
                    packet.send_time_ms,
                    arrived,
                    packet.payload_size,
                    packet.pacing_info.probe_cluster_id
                );
            }
        }
        debug!(
            "feedback at {}ms: {} received, {} lost, {:?} in flight",
            at_ms,
            received,
            result.packet_feedbacks.len() - received,
            result.data_in_flight
        );
    }
}

/// Replays `events` through a new adapter configured by `config`.
pub fn replay(
    events: impl IntoIterator<Item = Result<TraceEvent>>,
    config: &Config,
) -> Result<ReplaySummary> {
    let epoch = Instant::now();
    let adapter = TransportFeedbackAdapter::new(AdapterConfig::from(config), epoch);
    let (sender, receiver) = mpsc::channel();
    let registration = if config.observe_ssrcs.is_empty() {
        None
    } else {
        Some(
            adapter
                .register_stream_feedback_observer(config.observe_ssrcs.clone(), Arc::new(sender))?,
        )
    };

    let mut replayer = Replayer {
        adapter: &adapter,
        epoch,
        feedback_count: 0,
        log_vectors: config.log_vectors,
        summary: ReplaySummary::default(),
    };
    for event in events {
        replayer.apply(event?);
    }

    drop(registration);
    let mut summary = replayer.summary;
    summary.stream_feedback_vectors = receiver.try_iter().count();
    Ok(summary)
}
