//
// Copyright 2025 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Fixed-width delta encoding of (mostly) increasing integer sequences.
//!
//! The encoded form is a small header followed by one fixed-width delta per value:
//!
//! ```text
//! default:  type(2) | delta_width_bits - 1 (6) | deltas...
//! explicit: type(2) | delta_width_bits - 1 (6) | signed(1) | optional(1) | original_width_bits - 1 (6) | deltas...
//! ```
//!
//! If every value equals the base, the encoding is empty.

use log::*;
use tcc_common::{BitError, BitReader, BitWriter};
use thiserror::Error;

const BITS_IN_HEADER_FOR_ENCODING_TYPE: u32 = 2;
const BITS_IN_HEADER_FOR_DELTA_WIDTH_BITS: u32 = 6;
const BITS_IN_HEADER_FOR_SIGNED_DELTAS: u32 = 1;
const BITS_IN_HEADER_FOR_VALUES_OPTIONAL: u32 = 1;
const BITS_IN_HEADER_FOR_ORIGINAL_WIDTH_BITS: u32 = 6;

const DEFAULT_SIGNED_DELTAS: bool = false;
const DEFAULT_VALUES_OPTIONAL: bool = false;
const DEFAULT_ORIGINAL_WIDTH_BITS: u32 = 64;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[repr(u8)]
enum EncodingType {
    FixedSizeUnsignedDeltasNoEarlyWrapNoOpt = 0,
    FixedSizeSignedDeltasEarlyWrapAndOptSupported = 1,
    Reserved1 = 2,
    Reserved2 = 3,
}

impl EncodingType {
    fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            0 => Self::FixedSizeUnsignedDeltasNoEarlyWrapNoOpt,
            1 => Self::FixedSizeSignedDeltasEarlyWrapAndOptSupported,
            2 => Self::Reserved1,
            _ => Self::Reserved2,
        }
    }
}

#[derive(Error, Eq, PartialEq, Debug, Copy, Clone)]
pub enum DeltaDecodeError {
    #[error("no deltas requested")]
    NothingRequested,
    #[error("unrecognized encoding type {0:?}")]
    UnrecognizedEncoding(u8),
    #[error("signed deltas are not implemented")]
    SignedDeltasNotImplemented,
    #[error("optional values are not implemented")]
    OptionalValuesNotImplemented,
    #[error("delta width {delta_width_bits} exceeds original width {original_width_bits}")]
    DeltaWiderThanValue {
        delta_width_bits: u32,
        original_width_bits: u32,
    },
    #[error("truncated input: {0}")]
    Truncated(#[from] BitError),
}

/// Describes how a sequence was delta encoded. Widths are 1..=64.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct FixedLengthEncodingParameters {
    pub delta_width_bits: u32,
    pub signed_deltas: bool,
    pub values_optional: bool,
    pub original_width_bits: u32,
}

impl FixedLengthEncodingParameters {
    fn is_default(&self) -> bool {
        self.signed_deltas == DEFAULT_SIGNED_DELTAS
            && self.values_optional == DEFAULT_VALUES_OPTIONAL
            && self.original_width_bits == DEFAULT_ORIGINAL_WIDTH_BITS
    }

    fn encoding_type(&self) -> EncodingType {
        if self.is_default() {
            EncodingType::FixedSizeUnsignedDeltasNoEarlyWrapNoOpt
        } else {
            EncodingType::FixedSizeSignedDeltasEarlyWrapAndOptSupported
        }
    }

    fn header_length_bits(&self) -> u32 {
        let mut bits = BITS_IN_HEADER_FOR_ENCODING_TYPE + BITS_IN_HEADER_FOR_DELTA_WIDTH_BITS;
        if !self.is_default() {
            bits += BITS_IN_HEADER_FOR_SIGNED_DELTAS
                + BITS_IN_HEADER_FOR_VALUES_OPTIONAL
                + BITS_IN_HEADER_FOR_ORIGINAL_WIDTH_BITS;
        }
        bits
    }

    fn write_header(&self, writer: &mut BitWriter) -> Result<(), BitError> {
        let encoding_type = self.encoding_type();
        writer.write_bits(encoding_type as u64, BITS_IN_HEADER_FOR_ENCODING_TYPE)?;
        // Widths are 1..=64, so they are stored minus one to fit in 6 bits.
        writer.write_bits(
            (self.delta_width_bits - 1) as u64,
            BITS_IN_HEADER_FOR_DELTA_WIDTH_BITS,
        )?;
        if encoding_type == EncodingType::FixedSizeUnsignedDeltasNoEarlyWrapNoOpt {
            return Ok(());
        }
        writer.write_bits(self.signed_deltas as u64, BITS_IN_HEADER_FOR_SIGNED_DELTAS)?;
        writer.write_bits(
            self.values_optional as u64,
            BITS_IN_HEADER_FOR_VALUES_OPTIONAL,
        )?;
        writer.write_bits(
            (self.original_width_bits - 1) as u64,
            BITS_IN_HEADER_FOR_ORIGINAL_WIDTH_BITS,
        )
    }

    fn read_header(reader: &mut BitReader) -> Result<Self, DeltaDecodeError> {
        let encoding_type = EncodingType::from_bits(reader.read_bits(BITS_IN_HEADER_FOR_ENCODING_TYPE)?);
        let delta_width_bits = reader.read_bits(BITS_IN_HEADER_FOR_DELTA_WIDTH_BITS)? + 1;
        let params = match encoding_type {
            EncodingType::FixedSizeUnsignedDeltasNoEarlyWrapNoOpt => Self {
                delta_width_bits,
                signed_deltas: DEFAULT_SIGNED_DELTAS,
                values_optional: DEFAULT_VALUES_OPTIONAL,
                original_width_bits: DEFAULT_ORIGINAL_WIDTH_BITS,
            },
            EncodingType::FixedSizeSignedDeltasEarlyWrapAndOptSupported => {
                if reader.read_bool()? {
                    return Err(DeltaDecodeError::SignedDeltasNotImplemented);
                }
                if reader.read_bool()? {
                    return Err(DeltaDecodeError::OptionalValuesNotImplemented);
                }
                Self {
                    delta_width_bits,
                    signed_deltas: false,
                    values_optional: false,
                    original_width_bits: reader.read_bits(BITS_IN_HEADER_FOR_ORIGINAL_WIDTH_BITS)?
                        + 1,
                }
            }
            EncodingType::Reserved1 | EncodingType::Reserved2 => {
                return Err(DeltaDecodeError::UnrecognizedEncoding(encoding_type as u8));
            }
        };
        if params.delta_width_bits > params.original_width_bits {
            return Err(DeltaDecodeError::DeltaWiderThanValue {
                delta_width_bits: params.delta_width_bits,
                original_width_bits: params.original_width_bits,
            });
        }
        Ok(params)
    }
}

/// Number of bits needed to represent `input`. Zero takes one bit.
pub fn bit_width(input: u64) -> u32 {
    (u64::BITS - input.leading_zeros()).max(1)
}

pub fn max_value_of_bit_width(bit_width: u32) -> u64 {
    debug_assert!((1..=64).contains(&bit_width));
    if bit_width >= 64 {
        u64::MAX
    } else {
        (1 << bit_width) - 1
    }
}

/// The distance from `previous` to `current` for values that wrap at `width` bits.
pub fn compute_delta(previous: u64, current: u64, width: u32) -> u64 {
    if current >= previous {
        current - previous
    } else {
        (max_value_of_bit_width(width) - previous)
            .wrapping_add(1)
            .wrapping_add(current)
    }
}

/// Encodes `values` as deltas from `base`. An empty result means every value equals `base`.
pub fn encode_deltas(base: u64, values: &[u64]) -> Vec<u8> {
    let Some(first) = values.first() else {
        return Vec::new();
    };

    let mut non_decreasing = base <= *first;
    let mut max_value_including_base = base.max(*first);
    for pair in values.windows(2) {
        non_decreasing &= pair[0] <= pair[1];
        max_value_including_base = max_value_including_base.max(pair[1]);
    }
    let original_width_bits = if non_decreasing {
        DEFAULT_ORIGINAL_WIDTH_BITS
    } else {
        bit_width(max_value_including_base)
    };

    let max_delta = std::iter::once(base)
        .chain(values.iter().copied())
        .zip(values.iter().copied())
        .map(|(previous, current)| compute_delta(previous, current, original_width_bits))
        .max()
        .unwrap_or(0);
    if max_delta == 0 {
        return Vec::new();
    }

    let params = FixedLengthEncodingParameters {
        delta_width_bits: bit_width(max_delta),
        signed_deltas: false,
        values_optional: false,
        original_width_bits,
    };
    match encode_with(&params, base, values) {
        Ok(encoded) => encoded,
        Err(err) => {
            error!("delta encoding did not fit its own buffer: {}", err);
            Vec::new()
        }
    }
}

fn encode_with(
    params: &FixedLengthEncodingParameters,
    base: u64,
    values: &[u64],
) -> Result<Vec<u8>, BitError> {
    let length_bits =
        params.header_length_bits() as usize + values.len() * params.delta_width_bits as usize;
    let mut buffer = vec![0u8; length_bits.div_ceil(8)];
    let mut writer = BitWriter::new(&mut buffer);
    params.write_header(&mut writer)?;
    let mut previous = base;
    for value in values {
        writer.write_bits(
            compute_delta(previous, *value, params.original_width_bits),
            params.delta_width_bits,
        )?;
        previous = *value;
    }
    Ok(buffer)
}

/// Decodes `num_of_deltas` values encoded by [`encode_deltas`].
///
/// Returns an empty vector if the input is corrupt or uses an unsupported variant, so
/// `num_of_deltas` must be non-zero.
pub fn decode_deltas(input: &[u8], base: u64, num_of_deltas: usize) -> Vec<u64> {
    debug_assert!(num_of_deltas > 0);
    match try_decode_deltas(input, base, num_of_deltas) {
        Ok(values) => values,
        Err(err) => {
            warn!("Could not decode delta-encoded stream: {}", err);
            Vec::new()
        }
    }
}

pub fn try_decode_deltas(
    input: &[u8],
    base: u64,
    num_of_deltas: usize,
) -> Result<Vec<u64>, DeltaDecodeError> {
    if num_of_deltas == 0 {
        return Err(DeltaDecodeError::NothingRequested);
    }
    if input.is_empty() {
        return Ok(vec![base; num_of_deltas]);
    }

    let mut reader = BitReader::new(input);
    let params = FixedLengthEncodingParameters::read_header(&mut reader)?;
    let value_mask = max_value_of_bit_width(params.original_width_bits);

    let mut values = Vec::with_capacity(num_of_deltas);
    let mut previous = base;
    for _ in 0..num_of_deltas {
        let delta = reader.read_bits_u64(params.delta_width_bits)?;
        previous = previous.wrapping_add(delta) & value_mask;
        values.push(previous);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;

    #[test]
    fn widths() {
        assert_eq!(1, bit_width(0));
        assert_eq!(1, bit_width(1));
        assert_eq!(2, bit_width(2));
        assert_eq!(8, bit_width(255));
        assert_eq!(64, bit_width(u64::MAX));
        assert_eq!(7, max_value_of_bit_width(3));
        assert_eq!(u64::MAX, max_value_of_bit_width(64));
    }

    #[test]
    fn delta_wraps_at_width() {
        assert_eq!(5, compute_delta(5, 2, 3));
        assert_eq!(3, compute_delta(2, 5, 3));
        assert_eq!(0, compute_delta(7, 7, 3));
        assert_eq!(1, compute_delta(u64::MAX, 0, 64));
    }

    #[test]
    fn all_values_equal_to_base_encode_to_nothing() {
        assert!(encode_deltas(17, &[17, 17, 17]).is_empty());
        assert_eq!(vec![17, 17, 17], decode_deltas(&[], 17, 3));
    }

    #[test]
    fn increasing_values_use_default_header() {
        let encoded = encode_deltas(0, &[1, 2, 3]);
        // type 0, width 1, then three one-bit deltas.
        assert_eq!(hex!("00 e0").to_vec(), encoded);
        assert_eq!(vec![1, 2, 3], decode_deltas(&encoded, 0, 3));
    }

    #[test]
    fn decreasing_values_use_explicit_header() {
        let encoded = encode_deltas(10, &[3]);
        // type 1, width 4 | unsigned, required, original width 4 | delta 9
        assert_eq!(hex!("43 03 90").to_vec(), encoded);
        assert_eq!(vec![3], decode_deltas(&encoded, 10, 1));
    }

    #[test]
    fn wide_deltas() {
        let values = [1 << 40, (1 << 40) + (1 << 35), u64::MAX];
        let encoded = encode_deltas(0, &values);
        assert_eq!(values.to_vec(), decode_deltas(&encoded, 0, values.len()));
    }

    #[test]
    fn unsupported_variants_fail() {
        assert_eq!(
            Err(DeltaDecodeError::UnrecognizedEncoding(2)),
            try_decode_deltas(&hex!("80 ff"), 0, 1)
        );
        assert_eq!(
            Err(DeltaDecodeError::UnrecognizedEncoding(3)),
            try_decode_deltas(&hex!("c0 ff"), 0, 1)
        );
        assert_eq!(
            Err(DeltaDecodeError::SignedDeltasNotImplemented),
            try_decode_deltas(&hex!("43 83 90"), 10, 1)
        );
        assert_eq!(
            Err(DeltaDecodeError::OptionalValuesNotImplemented),
            try_decode_deltas(&hex!("43 43 90"), 10, 1)
        );
        assert!(decode_deltas(&hex!("c0 ff"), 0, 1).is_empty());
    }

    #[test]
    fn delta_wider_than_original_fails() {
        // type 1, width 8 | original width 4
        assert_eq!(
            Err(DeltaDecodeError::DeltaWiderThanValue {
                delta_width_bits: 8,
                original_width_bits: 4
            }),
            try_decode_deltas(&hex!("47 03 ff"), 0, 1)
        );
    }

    #[test]
    fn truncated_input_fails() {
        // type 0, width 8, but only one delta present.
        let encoded = hex!("07 05");
        assert_eq!(vec![5], decode_deltas(&encoded, 0, 1));
        assert!(decode_deltas(&encoded, 0, 3).is_empty());
        assert!(matches!(
            try_decode_deltas(&encoded, 0, 3),
            Err(DeltaDecodeError::Truncated(_))
        ));
    }

    #[test]
    fn random_sequences_survive_encoding() {
        let seed: u64 = rand::thread_rng().gen();
        println!("seed: {}", seed);
        let mut rng = StdRng::seed_from_u64(seed);
        for _ in 0..100 {
            let width = rng.gen_range(1..=64);
            let max = max_value_of_bit_width(width);
            let base = rng.gen_range(0..=max);
            let len = rng.gen_range(1..50);
            let values = (0..len)
                .map(|_| rng.gen_range(0..=max))
                .collect::<Vec<u64>>();
            let encoded = encode_deltas(base, &values);
            assert_eq!(values, decode_deltas(&encoded, base, values.len()));
        }
    }
}
