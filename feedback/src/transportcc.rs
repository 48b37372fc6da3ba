//
// Copyright 2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Implementation of the RTCP transport feedback message detailed here
//! https://datatracker.ietf.org/doc/html/draft-holmer-rmcat-transport-wide-cc-extensions-01
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|  FMT=15 |    PT=205     |           length              |
//! |                     SSRC of packet sender                     |
//! |                      SSRC of media source                     |
//! |      base sequence number     |      packet status count      |
//! |                 reference time                | fb pkt. count |
//! |          packet chunk         |         packet chunk          |
//! .                                                               .
//! |         packet chunk          |  recv delta   |  recv delta   |
//! .                                                               .
//! |           recv delta          |  recv delta   | zero padding  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

mod status_chunks;

use byteorder::{ByteOrder, BE};
use log::*;
use tcc_common::{BitError, BitReader, I24};
use thiserror::Error;

pub use status_chunks::PacketStatus;
use status_chunks::{StatusChunk, StatusChunks};

/// Receive deltas are in multiples of 250us.
pub const DELTA_SCALE_FACTOR_US: i64 = 250;
/// The reference time is in multiples of 64ms.
pub const BASE_SCALE_FACTOR_US: i64 = DELTA_SCALE_FACTOR_US * 256;
/// The 24-bit reference time wraps around after this long.
pub const TIME_WRAP_PERIOD_US: i64 = (1 << 24) * BASE_SCALE_FACTOR_US;

const RTCP_VERSION: u32 = 2;
const FEEDBACK_MESSAGE_TYPE: u32 = 15;
const RTPFB_PAYLOAD_TYPE: u8 = 205;

const RTCP_HEADER_SIZE: usize = 4;
// Both SSRCs, base sequence number, status count, reference time and feedback count.
const FIXED_FIELDS_SIZE: usize = 16;
const MIN_SIZE: usize = RTCP_HEADER_SIZE + FIXED_FIELDS_SIZE;
const CHUNK_SIZE: usize = 2;
const MAX_STATUS_COUNT: usize = 0xFFFF;
const MAX_SIZE: usize = (1 << 16) * 4;

#[derive(Error, Eq, PartialEq, Debug, Copy, Clone)]
pub enum FeedbackParseError {
    #[error("RTCP version {0} is not supported")]
    UnsupportedVersion(u32),
    #[error("not a transport feedback message: FMT={format}, PT={payload_type}")]
    NotTransportFeedback { format: u32, payload_type: u8 },
    #[error("header declares {declared} bytes but only {available} are available")]
    LengthExceedsBuffer { declared: usize, available: usize },
    #[error("invalid padding length {0}")]
    InvalidPadding(usize),
    #[error("{0} bytes is too short for a transport feedback message")]
    TooShort(usize),
    #[error("a transport feedback message must report at least one packet")]
    Empty,
    #[error("reserved packet status symbol")]
    ReservedStatus,
    #[error("truncated: {0}")]
    Truncated(#[from] BitError),
}

/// A packet the feedback reports as received, with its receive delta in 250us ticks.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReceivedPacket {
    sequence_number: u16,
    delta_ticks: i16,
}

impl ReceivedPacket {
    pub fn sequence_number(&self) -> u16 {
        self.sequence_number
    }

    pub fn delta_ticks(&self) -> i16 {
        self.delta_ticks
    }

    pub fn delta_us(&self) -> i64 {
        self.delta_ticks as i64 * DELTA_SCALE_FACTOR_US
    }

    fn status(&self) -> PacketStatus {
        if (0..=u8::MAX as i16).contains(&self.delta_ticks) {
            PacketStatus::ReceivedSmallDelta
        } else {
            PacketStatus::ReceivedLargeOrNegativeDelta
        }
    }
}

/// Returns true if `a` comes after `b`, taking wrap-around into account.
pub fn is_newer_sequence_number(a: u16, b: u16) -> bool {
    let diff = a.wrapping_sub(b);
    if diff == 0x8000 {
        a > b
    } else {
        diff != 0 && diff < 0x8000
    }
}

/// A transport feedback message, either being built by a receiver or parsed by a sender.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TransportFeedback {
    sender_ssrc: u32,
    media_ssrc: u32,
    base_sequence: u16,
    base_time_ticks: I24,
    feedback_packet_count: u8,
    statuses: Vec<PacketStatus>,
    chunks: StatusChunks,
    received: Vec<ReceivedPacket>,
    encoded_deltas_size: usize,
    // The receive time of the last received packet, accumulated from the reference time.
    last_timestamp_us: i64,
}

impl TransportFeedback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sender_ssrc(&self) -> u32 {
        self.sender_ssrc
    }

    pub fn set_sender_ssrc(&mut self, ssrc: u32) {
        self.sender_ssrc = ssrc;
    }

    pub fn media_ssrc(&self) -> u32 {
        self.media_ssrc
    }

    pub fn set_media_ssrc(&mut self, ssrc: u32) {
        self.media_ssrc = ssrc;
    }

    pub fn feedback_packet_count(&self) -> u8 {
        self.feedback_packet_count
    }

    pub fn set_feedback_packet_count(&mut self, count: u8) {
        self.feedback_packet_count = count;
    }

    /// Sets the first sequence number and the reference time. Must be called before any
    /// packets are added. The reference time is quantized down to 64ms.
    pub fn set_base(&mut self, base_sequence: u16, reference_time_us: i64) {
        debug_assert!(self.statuses.is_empty());
        self.base_sequence = base_sequence;
        self.base_time_ticks = I24::truncate(
            reference_time_us.rem_euclid(TIME_WRAP_PERIOD_US) / BASE_SCALE_FACTOR_US,
        );
        self.last_timestamp_us = self.base_time_us();
    }

    /// Adds a received packet, marking any skipped sequence numbers as not received.
    ///
    /// Returns false, leaving the message unchanged, if the packet does not fit: it is not
    /// newer than the last one, its receive delta is out of range, or the message is full.
    /// The caller should then send this message and start a new one.
    pub fn add_received_packet(&mut self, sequence_number: u16, timestamp_us: i64) -> bool {
        let next_sequence = self.next_sequence();
        if !is_newer_sequence_number(sequence_number, next_sequence.wrapping_sub(1)) {
            return false;
        }
        let skipped = sequence_number.wrapping_sub(next_sequence) as usize;
        if self.statuses.len() + skipped + 1 > MAX_STATUS_COUNT {
            trace!("transport feedback is full of statuses");
            return false;
        }

        let mut delta_us = (timestamp_us - self.last_timestamp_us) % TIME_WRAP_PERIOD_US;
        if delta_us > TIME_WRAP_PERIOD_US / 2 {
            delta_us -= TIME_WRAP_PERIOD_US;
        } else if delta_us < -TIME_WRAP_PERIOD_US / 2 {
            delta_us += TIME_WRAP_PERIOD_US;
        }
        // Round to the nearest tick.
        delta_us += if delta_us < 0 {
            -DELTA_SCALE_FACTOR_US / 2
        } else {
            DELTA_SCALE_FACTOR_US / 2
        };
        let Ok(delta_ticks) = i16::try_from(delta_us / DELTA_SCALE_FACTOR_US) else {
            trace!(
                "receive delta of {}us does not fit in transport feedback",
                delta_us
            );
            return false;
        };
        let packet = ReceivedPacket {
            sequence_number,
            delta_ticks,
        };

        // Every skipped run adds at most one chunk per 8191 statuses, plus one for a split.
        let worst_case_size =
            self.size_bytes() + CHUNK_SIZE * (skipped.div_ceil(0x1FFF) + 3) + 2 + 3;
        if worst_case_size > MAX_SIZE {
            trace!("transport feedback is full");
            return false;
        }

        for _ in 0..skipped {
            self.push_status(PacketStatus::NotReceived);
        }
        self.push_status(packet.status());
        self.encoded_deltas_size += packet.status().delta_size();
        self.received.push(packet);
        self.last_timestamp_us += packet.delta_us();
        true
    }

    fn push_status(&mut self, status: PacketStatus) {
        self.statuses.push(status);
        self.chunks.push(status);
    }

    fn next_sequence(&self) -> u16 {
        self.base_sequence.wrapping_add(self.statuses.len() as u16)
    }

    pub fn base_sequence(&self) -> u16 {
        self.base_sequence
    }

    /// The reference time. It is a signed 24-bit value, so it may be negative.
    pub fn base_time_us(&self) -> i64 {
        i64::from(self.base_time_ticks) * BASE_SCALE_FACTOR_US
    }

    /// The difference between this message's reference time and `prev_timestamp_us`, taking
    /// the shortest way around the 24-bit wrap.
    pub fn base_delta_us(&self, prev_timestamp_us: i64) -> i64 {
        let mut delta = self.base_time_us() - prev_timestamp_us;
        if (delta - TIME_WRAP_PERIOD_US).abs() < delta.abs() {
            delta -= TIME_WRAP_PERIOD_US;
        }
        if (delta + TIME_WRAP_PERIOD_US).abs() < delta.abs() {
            delta += TIME_WRAP_PERIOD_US;
        }
        delta
    }

    pub fn packet_status_count(&self) -> usize {
        self.statuses.len()
    }

    pub fn status_vector(&self) -> &[PacketStatus] {
        &self.statuses
    }

    pub fn received_packets(&self) -> &[ReceivedPacket] {
        &self.received
    }

    /// Every sequence number covered by this message, in order, with the receive delta in
    /// microseconds for those that were received.
    pub fn packets(&self) -> impl Iterator<Item = (u16, Option<i64>)> + '_ {
        let mut received = self.received.iter();
        self.statuses
            .iter()
            .enumerate()
            .map(move |(index, status)| {
                let sequence_number = self.base_sequence.wrapping_add(index as u16);
                let delta_us = if status.is_received() {
                    received.next().map(ReceivedPacket::delta_us)
                } else {
                    None
                };
                (sequence_number, delta_us)
            })
    }

    fn unpadded_size_bytes(&self) -> usize {
        MIN_SIZE + CHUNK_SIZE * self.chunks.len() + self.encoded_deltas_size
    }

    /// The size of the serialized message, including padding.
    pub fn size_bytes(&self) -> usize {
        self.unpadded_size_bytes().next_multiple_of(4)
    }

    pub fn build(&self) -> Vec<u8> {
        let unpadded_size = self.unpadded_size_bytes();
        let size = self.size_bytes();
        let padding = size - unpadded_size;
        let mut out = vec![0u8; size];

        out[0] = ((RTCP_VERSION as u8) << 6)
            | (((padding > 0) as u8) << 5)
            | FEEDBACK_MESSAGE_TYPE as u8;
        out[1] = RTPFB_PAYLOAD_TYPE;
        BE::write_u16(&mut out[2..4], (size / 4 - 1) as u16);
        BE::write_u32(&mut out[4..8], self.sender_ssrc);
        BE::write_u32(&mut out[8..12], self.media_ssrc);
        BE::write_u16(&mut out[12..14], self.base_sequence);
        BE::write_u16(&mut out[14..16], self.statuses.len() as u16);
        BE::write_i24(&mut out[16..19], i32::from(self.base_time_ticks));
        out[19] = self.feedback_packet_count;

        let mut offset = MIN_SIZE;
        for chunk in self.chunks.encoded() {
            BE::write_u16(&mut out[offset..offset + CHUNK_SIZE], chunk);
            offset += CHUNK_SIZE;
        }
        // Deltas take the width their status declares, which a parsed message may have
        // chosen wider than needed.
        let received_statuses = self.statuses.iter().filter(|status| status.is_received());
        for (status, packet) in received_statuses.zip(&self.received) {
            match status {
                PacketStatus::ReceivedSmallDelta => {
                    out[offset] = packet.delta_ticks as u8;
                }
                PacketStatus::ReceivedLargeOrNegativeDelta => {
                    BE::write_i16(&mut out[offset..offset + 2], packet.delta_ticks);
                }
                PacketStatus::NotReceived => {}
            }
            offset += status.delta_size();
        }

        if padding > 0 {
            out[size - 1] = padding as u8;
        }
        out
    }

    /// Parses a single RTCP transport feedback message. Bytes after the length given
    /// in the RTCP header are ignored.
    pub fn parse(packet: &[u8]) -> Result<Self, FeedbackParseError> {
        let mut reader = BitReader::new(packet);
        let version = reader.read_bits(2)?;
        if version != RTCP_VERSION {
            return Err(FeedbackParseError::UnsupportedVersion(version));
        }
        let has_padding = reader.read_bool()?;
        let format = reader.read_bits(5)?;
        let payload_type = reader.read_u8()?;
        if format != FEEDBACK_MESSAGE_TYPE || payload_type != RTPFB_PAYLOAD_TYPE {
            return Err(FeedbackParseError::NotTransportFeedback {
                format,
                payload_type,
            });
        }
        let declared = (reader.read_u16()? as usize + 1) * 4;
        if declared > packet.len() {
            return Err(FeedbackParseError::LengthExceedsBuffer {
                declared,
                available: packet.len(),
            });
        }
        let mut end = declared;
        if has_padding {
            let padding = packet[declared - 1] as usize;
            if padding == 0 || padding > declared - RTCP_HEADER_SIZE {
                return Err(FeedbackParseError::InvalidPadding(padding));
            }
            end -= padding;
        }
        if end < MIN_SIZE {
            return Err(FeedbackParseError::TooShort(end));
        }

        let mut reader = BitReader::new(&packet[RTCP_HEADER_SIZE..end]);
        let mut feedback = Self {
            sender_ssrc: reader.read_u32()?,
            media_ssrc: reader.read_u32()?,
            base_sequence: reader.read_u16()?,
            ..Default::default()
        };
        let status_count = reader.read_u16()? as usize;
        feedback.base_time_ticks = I24::from_bits(reader.read_bits(24)?);
        feedback.feedback_packet_count = reader.read_u8()?;
        if status_count == 0 {
            return Err(FeedbackParseError::Empty);
        }

        while feedback.statuses.len() < status_count {
            let chunk =
                StatusChunk::decode(reader.read_u16()?).ok_or(FeedbackParseError::ReservedStatus)?;
            for status in chunk
                .statuses()
                .take(status_count - feedback.statuses.len())
            {
                feedback.push_status(status.ok_or(FeedbackParseError::ReservedStatus)?);
            }
        }

        feedback.last_timestamp_us = feedback.base_time_us();
        let mut sequence_number = feedback.base_sequence;
        for index in 0..feedback.statuses.len() {
            let status = feedback.statuses[index];
            let delta_ticks = match status {
                PacketStatus::NotReceived => None,
                PacketStatus::ReceivedSmallDelta => Some(reader.read_u8()? as i16),
                PacketStatus::ReceivedLargeOrNegativeDelta => Some(reader.read_u16()? as i16),
            };
            if let Some(delta_ticks) = delta_ticks {
                let packet = ReceivedPacket {
                    sequence_number,
                    delta_ticks,
                };
                feedback.encoded_deltas_size += status.delta_size();
                feedback.last_timestamp_us += packet.delta_us();
                feedback.received.push(packet);
            }
            sequence_number = sequence_number.wrapping_add(1);
        }
        Ok(feedback)
    }
}
