//
// Copyright 2025 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Turns incoming transport feedback messages into per-packet send/arrival records.
//!
//! The pacer reports each packet it hands to the transport with
//! [`TransportFeedbackAdapter::add_packet`], the socket layer confirms each send with
//! [`TransportFeedbackAdapter::process_sent_packet`], and each RTCP feedback message is
//! merged with [`TransportFeedbackAdapter::process_transport_feedback`]. Arrival times are
//! rebuilt on the local clock from the message's 24-bit reference time, so they are only
//! meaningful relative to each other.

use std::sync::{mpsc, Arc};

use log::*;
#[cfg(test)]
use mockall::automock;
use parking_lot::Mutex;
use tcc_common::{DataSize, Instant};
use thiserror::Error;

use crate::{
    config::AdapterConfig,
    feedback_history::{PacketFeedbackHistory, ReportedPacket, SendConfirmation},
    packet_feedback::{
        NetworkRoute, PacketFeedback, PacketSendInfo, SentPacket, SocketSentPacket,
        StreamPacketInfo, TransportPacketsFeedback,
    },
    transportcc::TransportFeedback,
};

#[derive(Error, Debug, Eq, PartialEq)]
pub enum AdapterError {
    #[error("observer is already registered")]
    ObserverAlreadyRegistered,
}

/// Receives the feedback for the packets of a set of streams.
///
/// Called without any adapter lock held, but must not call back into the adapter.
#[cfg_attr(test, automock)]
pub trait StreamFeedbackObserver: Send + Sync {
    fn on_packet_feedback_vector(&self, packets: Vec<StreamPacketInfo>);
}

impl StreamFeedbackObserver for mpsc::Sender<Vec<StreamPacketInfo>> {
    fn on_packet_feedback_vector(&self, packets: Vec<StreamPacketInfo>) {
        if self.send(packets).is_err() {
            debug!("stream feedback receiver is gone");
        }
    }
}

type ObserverList = Vec<(Vec<u32>, Arc<dyn StreamFeedbackObserver>)>;

fn is_same_observer(a: &Arc<dyn StreamFeedbackObserver>, b: &Arc<dyn StreamFeedbackObserver>) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

/// Keeps an observer registered until dropped.
#[must_use]
pub struct ObserverRegistration<'a> {
    observers: &'a Mutex<ObserverList>,
    observer: Arc<dyn StreamFeedbackObserver>,
}

impl ObserverRegistration<'_> {
    /// Same as dropping the registration.
    pub fn deregister(self) {}
}

impl Drop for ObserverRegistration<'_> {
    fn drop(&mut self) {
        self.observers
            .lock()
            .retain(|(_, registered)| !is_same_observer(registered, &self.observer));
    }
}

/// Rebuilds arrival times from the reference times of consecutive feedback messages.
#[derive(Debug, Default)]
struct FeedbackTimeBase {
    last_timestamp_us: Option<i64>,
    current_offset_ms: i64,
}

impl FeedbackTimeBase {
    fn reported_packets(
        &mut self,
        feedback: &TransportFeedback,
        feedback_receive_time_ms: i64,
    ) -> Vec<ReportedPacket> {
        match self.last_timestamp_us {
            None => self.current_offset_ms = feedback_receive_time_ms,
            Some(last_timestamp_us) => {
                self.current_offset_ms += feedback.base_delta_us(last_timestamp_us) / 1000
            }
        }
        self.last_timestamp_us = Some(feedback.base_time_us());

        let current_offset_ms = self.current_offset_ms;
        let mut offset_us = 0i64;
        feedback
            .packets()
            .map(|(sequence_number, delta_us)| match delta_us {
                Some(delta_us) => {
                    offset_us += delta_us;
                    ReportedPacket::received(sequence_number, current_offset_ms + offset_us / 1000)
                }
                None => ReportedPacket::lost(sequence_number),
            })
            .collect()
    }
}

#[derive(Debug)]
struct LedgerState {
    history: PacketFeedbackHistory,
    time_base: FeedbackTimeBase,
    network_route: NetworkRoute,
    /// Data sent without a transport sequence number since the last tracked packet.
    pending_untracked: DataSize,
    last_packet_feedback_vector: Vec<PacketFeedback>,
}

pub struct TransportFeedbackAdapter {
    /// Times are reported in milliseconds since this instant.
    epoch: Instant,
    state: Mutex<LedgerState>,
    observers: Mutex<ObserverList>,
}

impl TransportFeedbackAdapter {
    pub fn new(config: AdapterConfig, epoch: Instant) -> Self {
        Self {
            epoch,
            state: Mutex::new(LedgerState {
                history: PacketFeedbackHistory::new(config.history_horizon),
                time_base: FeedbackTimeBase::default(),
                network_route: NetworkRoute::default(),
                pending_untracked: DataSize::ZERO,
                last_packet_feedback_vector: Vec::new(),
            }),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Registers `observer` for the packets of the given SSRCs.
    pub fn register_stream_feedback_observer(
        &self,
        ssrcs: Vec<u32>,
        observer: Arc<dyn StreamFeedbackObserver>,
    ) -> Result<ObserverRegistration<'_>, AdapterError> {
        let mut observers = self.observers.lock();
        if observers
            .iter()
            .any(|(_, registered)| is_same_observer(registered, &observer))
        {
            return Err(AdapterError::ObserverAlreadyRegistered);
        }
        observers.push((ssrcs, observer.clone()));
        Ok(ObserverRegistration {
            observers: &self.observers,
            observer,
        })
    }

    /// Records a packet the pacer is about to send. `overhead_bytes` is added to its size.
    pub fn add_packet(&self, info: &PacketSendInfo, overhead_bytes: usize, creation_time: Instant) {
        let mut state = self.state.lock();
        let packet = PacketFeedback {
            ssrc: info.ssrc,
            rtp_sequence_number: info.rtp_sequence_number,
            network_route: state.network_route,
            ..PacketFeedback::new(
                info.transport_sequence_number,
                info.length + overhead_bytes,
                info.pacing_info,
            )
        };
        state.history.add_packet(packet, creation_time);
    }

    /// Confirms that a packet left the socket. Returns the send record for packets that
    /// were added with [`Self::add_packet`] and not confirmed before.
    pub fn process_sent_packet(&self, sent: &SocketSentPacket) -> Option<SentPacket> {
        let send_time_ms = sent.send_time.millis_since(self.epoch);
        let mut state = self.state.lock();
        let Some(sequence_number) = sent.packet_id else {
            if sent.included_in_allocation {
                state.pending_untracked += DataSize::from_bytes(sent.size as u64);
            }
            return None;
        };

        match state.history.on_sent_packet(sequence_number, send_time_ms) {
            SendConfirmation::Confirmed(packet) => Some(SentPacket {
                sequence_number: packet.long_sequence_number,
                send_time_ms,
                size: DataSize::from_bytes(packet.payload_size as u64),
                prior_unacked_data: std::mem::take(&mut state.pending_untracked),
                data_in_flight: state.history.outstanding_data(),
                pacing_info: packet.pacing_info,
            }),
            SendConfirmation::Duplicate => {
                debug!(
                    "ignoring repeated send of transport sequence number {}",
                    sequence_number
                );
                None
            }
            SendConfirmation::Unknown => {
                debug!(
                    "send of unknown transport sequence number {}",
                    sequence_number
                );
                None
            }
        }
    }

    /// Merges a feedback message received at `feedback_receive_time`.
    ///
    /// Returns None if none of the reported packets could be matched to a sent packet.
    pub fn process_transport_feedback(
        &self,
        feedback: &TransportFeedback,
        feedback_receive_time: Instant,
    ) -> Option<TransportPacketsFeedback> {
        let packets = {
            let mut state = self.state.lock();
            let report = state
                .time_base
                .reported_packets(feedback, feedback_receive_time.millis_since(self.epoch));
            let prior_in_flight = state.history.outstanding_data();
            let route = state.network_route;
            let mut packets = state.history.get_packets_and_apply_feedback(&report);
            packets.retain(|packet| packet.network_route == route);
            state.last_packet_feedback_vector = packets.clone();

            if packets.is_empty() {
                debug!(
                    "no known packets in feedback for {} sequence numbers starting at {}",
                    report.len(),
                    feedback.base_sequence()
                );
                None
            } else {
                Some(TransportPacketsFeedback {
                    feedback_time: feedback_receive_time,
                    prior_in_flight,
                    data_in_flight: state.history.outstanding_data(),
                    packet_feedbacks: packets,
                })
            }
        };

        if let Some(packets) = &packets {
            self.notify_observers(&packets.packet_feedbacks);
        }
        packets
    }

    fn notify_observers(&self, packets: &[PacketFeedback]) {
        let observers = self.observers.lock().clone();
        for (ssrcs, observer) in observers {
            let selected: Vec<StreamPacketInfo> = packets
                .iter()
                .filter_map(|packet| {
                    let ssrc = packet.ssrc.filter(|ssrc| ssrcs.contains(ssrc))?;
                    Some(StreamPacketInfo {
                        ssrc,
                        rtp_sequence_number: packet.rtp_sequence_number,
                        transport_sequence_number: packet.sequence_number,
                        received: packet.is_received(),
                        payload_size: packet.payload_size,
                    })
                })
                .collect();
            if !selected.is_empty() {
                observer.on_packet_feedback_vector(selected);
            }
        }
    }

    /// The merged records of the most recent feedback message.
    pub fn transport_feedback_vector(&self) -> Vec<PacketFeedback> {
        self.state.lock().last_packet_feedback_vector.clone()
    }

    /// Packets added from now on are sent on this route; feedback for packets sent on any
    /// other route is ignored.
    pub fn set_network_ids(&self, local_net_id: u16, remote_net_id: u16) {
        self.state.lock().network_route = NetworkRoute {
            local_net_id,
            remote_net_id,
        };
    }

    pub fn outstanding_data(&self) -> DataSize {
        self.state.lock().history.outstanding_data()
    }

    /// The ledger record for a packet that has not been acknowledged yet.
    pub fn packet(&self, sequence_number: u16) -> Option<PacketFeedback> {
        self.state
            .lock()
            .history
            .get_packet(sequence_number)
            .cloned()
    }
}
