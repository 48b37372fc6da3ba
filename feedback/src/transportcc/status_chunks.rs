//
// Copyright 2025 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Packet status chunks: the run-length and status-vector encodings of
//! the per-packet receive status in a transport feedback message.

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[repr(u8)]
pub enum PacketStatus {
    NotReceived = 0,
    /// Followed by an unsigned 8-bit receive delta.
    ReceivedSmallDelta = 1,
    /// Followed by a signed 16-bit receive delta.
    ReceivedLargeOrNegativeDelta = 2,
}

impl PacketStatus {
    /// Decodes a 2-bit status symbol. The fourth symbol is reserved.
    pub fn from_bits(bits: u16) -> Option<Self> {
        match bits & 0b11 {
            0b00 => Some(PacketStatus::NotReceived),
            0b01 => Some(PacketStatus::ReceivedSmallDelta),
            0b10 => Some(PacketStatus::ReceivedLargeOrNegativeDelta),
            _ => None,
        }
    }

    pub fn is_received(self) -> bool {
        self != PacketStatus::NotReceived
    }

    /// Number of bytes of receive delta this status carries.
    pub fn delta_size(self) -> usize {
        self as usize
    }
}

const MAX_RUN_LENGTH: u16 = 0x1FFF;
const ONE_BIT_VECTOR_CAPACITY: u8 = 14;
const TWO_BIT_VECTOR_CAPACITY: u8 = 7;

/// One 16-bit chunk.
///
/// ```text
/// run length:       0 | status(2) | length(13)
/// one-bit vector:   1 | 0 | 14 x symbol(1)
/// two-bit vector:   1 | 1 |  7 x symbol(2)
/// ```
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub(super) enum StatusChunk {
    // Must all be of the same status
    RunLength { len: u16, status: PacketStatus },
    OneBitVector { len: u8, bits: u16 },
    TwoBitVector { len: u8, bits: u16 },
}

impl StatusChunk {
    /// Returns None if a run-length chunk repeats the reserved status.
    pub(super) fn decode(encoded: u16) -> Option<Self> {
        let chunk = match encoded >> 14 {
            0b00 | 0b01 => Self::RunLength {
                len: encoded & MAX_RUN_LENGTH,
                status: PacketStatus::from_bits(encoded >> 13)?,
            },
            0b10 => Self::OneBitVector {
                len: ONE_BIT_VECTOR_CAPACITY,
                bits: encoded & 0x3FFF,
            },
            _ => Self::TwoBitVector {
                len: TWO_BIT_VECTOR_CAPACITY,
                bits: encoded & 0x3FFF,
            },
        };
        Some(chunk)
    }

    pub(super) fn encode(self) -> u16 {
        match self {
            Self::RunLength { status, len } => ((status as u16) << 13) | len,
            Self::OneBitVector { bits, .. } => (0b10 << 14) | bits,
            Self::TwoBitVector { bits, .. } => (0b11 << 14) | bits,
        }
    }

    /// The symbols of the chunk in order. A reserved two-bit symbol yields None.
    pub(super) fn statuses(self) -> Box<dyn Iterator<Item = Option<PacketStatus>>> {
        match self {
            Self::RunLength { status, len } => {
                Box::new(std::iter::repeat(Some(status)).take(len as usize))
            }
            Self::OneBitVector { len, bits } => Box::new(
                (0..ONE_BIT_VECTOR_CAPACITY)
                    .map(move |i| PacketStatus::from_bits((bits >> (13 - i)) & 0b1))
                    .take(len as usize),
            ),
            Self::TwoBitVector { len, bits } => Box::new(
                (0..TWO_BIT_VECTOR_CAPACITY)
                    .map(move |i| PacketStatus::from_bits(bits >> (2 * (6 - i))))
                    .take(len as usize),
            ),
        }
    }

    // The second chunk is set when the status didn't fit, or when this chunk had to be
    // split to make room for it.
    fn push(self, status: PacketStatus) -> (Self, Option<Self>) {
        use PacketStatus::*;
        use StatusChunk::*;
        match self {
            RunLength {
                len: MAX_RUN_LENGTH..=u16::MAX,
                ..
            }
            | OneBitVector {
                len: ONE_BIT_VECTOR_CAPACITY..=u8::MAX,
                ..
            }
            | TwoBitVector {
                len: TWO_BIT_VECTOR_CAPACITY..=u8::MAX,
                ..
            } => {
                // Full, so start a new one.
                (self, Some(RunLength { len: 1, status }))
            }
            RunLength {
                len,
                status: existing_status,
            } if status == existing_status => (RunLength { len: len + 1, status }, None),
            RunLength {
                len: 0..=13,
                status: existing_status,
            } if status != ReceivedLargeOrNegativeDelta
                && existing_status != ReceivedLargeOrNegativeDelta =>
            {
                // Differs from the run, but every symbol fits in one bit.
                Self::one_bit_vector_from(self.statuses().flatten()).push(status)
            }
            RunLength { len: 0..=6, .. } => {
                // Differs from the run, and one side needs two bits.
                Self::two_bit_vector_from(self.statuses().flatten()).push(status)
            }
            RunLength { .. } => {
                // Too long to convert into a vector.
                (self, Some(RunLength { len: 1, status }))
            }
            OneBitVector { len, bits } if status != ReceivedLargeOrNegativeDelta => {
                let bits = bits | (status as u16) << (13 - len);
                (OneBitVector { len: len + 1, bits }, None)
            }
            OneBitVector { len: 0..=6, .. } => {
                // The new status needs two bits, and everything still fits in one chunk.
                Self::two_bit_vector_from(self.statuses().flatten()).push(status)
            }
            OneBitVector { .. } => {
                // The new status needs two bits, and the symbols so far take two chunks.
                let first = Self::two_bit_vector_from(self.statuses().flatten().take(7));
                let second = Self::two_bit_vector_from(self.statuses().flatten().skip(7))
                    .push(status)
                    .0;
                (first, Some(second))
            }
            TwoBitVector { len, bits } => {
                let bits = bits | (status as u16) << (2 * (6 - len));
                (TwoBitVector { len: len + 1, bits }, None)
            }
        }
    }

    fn one_bit_vector_from(statuses: impl IntoIterator<Item = PacketStatus>) -> Self {
        let mut len = 0;
        let mut bits = 0;
        for status in statuses.into_iter().take(ONE_BIT_VECTOR_CAPACITY as usize) {
            debug_assert!(status != PacketStatus::ReceivedLargeOrNegativeDelta);
            bits |= ((status as u16) & 0b1) << (13 - len);
            len += 1;
        }
        Self::OneBitVector { len, bits }
    }

    fn two_bit_vector_from(statuses: impl IntoIterator<Item = PacketStatus>) -> Self {
        let mut len = 0;
        let mut bits = 0;
        for status in statuses.into_iter().take(TWO_BIT_VECTOR_CAPACITY as usize) {
            bits |= (status as u16) << (2 * (6 - len));
            len += 1;
        }
        Self::TwoBitVector { len, bits }
    }
}

/// Incrementally encodes a sequence of statuses into chunks.
/// The trailing chunk may not be full.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(super) struct StatusChunks {
    chunks: Vec<StatusChunk>,
}

impl StatusChunks {
    pub(super) fn push(&mut self, status: PacketStatus) {
        match self.chunks.last_mut() {
            None => self.chunks.push(StatusChunk::RunLength { len: 1, status }),
            Some(last) => {
                let (updated, overflow) = last.push(status);
                *last = updated;
                self.chunks.extend(overflow);
            }
        }
    }

    pub(super) fn len(&self) -> usize {
        self.chunks.len()
    }

    pub(super) fn encoded(&self) -> impl Iterator<Item = u16> + '_ {
        self.chunks.iter().map(|chunk| chunk.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PacketStatus::*;

    /// `N`, `S` and `L` stand for not received, small delta and large delta.
    fn statuses(symbols: &str) -> Vec<PacketStatus> {
        symbols
            .chars()
            .filter_map(|symbol| match symbol {
                'N' => Some(NotReceived),
                'S' => Some(ReceivedSmallDelta),
                'L' => Some(ReceivedLargeOrNegativeDelta),
                _ => None,
            })
            .collect()
    }

    fn pushed(symbols: &str) -> StatusChunks {
        let mut chunks = StatusChunks::default();
        for status in statuses(symbols) {
            chunks.push(status);
        }
        chunks
    }

    fn encoded(symbols: &str) -> Vec<u16> {
        pushed(symbols).encoded().collect()
    }

    #[test]
    fn decode_run_length() {
        assert_eq!(
            Some(StatusChunk::RunLength {
                len: 0x1FFF,
                status: ReceivedSmallDelta
            }),
            StatusChunk::decode(0x3FFF)
        );
        assert_eq!(
            Some(StatusChunk::RunLength {
                len: 221,
                status: NotReceived
            }),
            StatusChunk::decode(0x00DD)
        );
        // A run of the reserved status.
        assert_eq!(None, StatusChunk::decode(0x6001));
    }

    #[test]
    fn decode_vectors() {
        let chunk = StatusChunk::decode(0b1010_0001_1000_0000).expect("valid chunk");
        assert_eq!(
            statuses("SNNNN SSNNN NNNN")
                .into_iter()
                .map(Some)
                .collect::<Vec<_>>(),
            chunk.statuses().collect::<Vec<_>>()
        );

        let chunk = StatusChunk::decode(0b1100_1001_0000_0000).expect("valid chunk");
        assert_eq!(
            statuses("NLSNNNN")
                .into_iter()
                .map(Some)
                .collect::<Vec<_>>(),
            chunk.statuses().collect::<Vec<_>>()
        );

        // The last symbol is reserved.
        let chunk = StatusChunk::decode(0b1100_0000_0000_0011).expect("valid chunk");
        assert_eq!(Some(None), chunk.statuses().last());
    }

    #[test]
    fn long_runs_are_split() {
        let mut chunks = StatusChunks::default();
        for _ in 0..MAX_RUN_LENGTH {
            chunks.push(ReceivedSmallDelta);
        }
        assert_eq!(1, chunks.len());
        chunks.push(ReceivedSmallDelta);
        chunks.push(ReceivedSmallDelta);
        assert_eq!(vec![0x3FFF, 0x2002], chunks.encoded().collect::<Vec<_>>());
    }

    #[test]
    fn encodings() {
        for (symbols, expected) in [
            // Runs stay runs.
            ("SSSS", vec![0x2004]),
            ("NNNNNNNNNNNNNNNNNNNN", vec![0x0014]),
            // A short run turns into the narrowest vector that holds it.
            ("SSSSSSSSSSSSSN", vec![0b1011_1111_1111_1110]),
            ("LLLLLLS", vec![0b1110_1010_1010_1001]),
            ("SNL", vec![0b1101_0010_0000_0000]),
            // A run too long to convert starts a new chunk.
            ("NNNNNNNNNNNNNNS", vec![0x000E, 0x2001]),
            ("SSSSSSSL", vec![0x2007, 0x4001]),
            // Full vectors are followed by a run.
            ("SNSNSNSNSNSNSN S", vec![0b1010_1010_1010_1010, 0x2001]),
            ("LNLNLNL N", vec![0b1110_0010_0010_0010, 0x0001]),
            // A one-bit vector too long to widen is split in two.
            ("SNNNNNN NNNL", vec![0b1101_0000_0000_0000, 0b1100_0000_1000_0000]),
        ] {
            assert_eq!(expected, encoded(symbols), "{}", symbols);
        }
    }

    #[test]
    fn pushed_statuses_decode_back() {
        for symbols in ["SNNLSSSSS", "NNNNNNNNNNNNNNNNLS", "SNSNSNSNSNSNSNSLLLLNNNN", "L"] {
            let expected = statuses(symbols);
            let decoded = pushed(symbols)
                .encoded()
                .filter_map(StatusChunk::decode)
                .flat_map(StatusChunk::statuses)
                .take(expected.len())
                .collect::<Option<Vec<_>>>();
            assert_eq!(Some(expected), decoded, "{}", symbols);
        }
    }
}
