//
// Copyright 2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Bit-granular cursors over byte buffers. Bits are read and written most significant first.

use thiserror::Error;

#[derive(Error, Eq, PartialEq, Debug, Copy, Clone)]
pub enum BitError {
    #[error("wanted {wanted} bits, but only {remaining} remain")]
    OutOfBits { wanted: u64, remaining: u64 },
    #[error("cannot move {0} bits at once")]
    TooWide(u32),
    #[error("exponential-Golomb value does not fit in 32 bits")]
    GolombTooLong,
    #[error("seek position is beyond the end of the buffer")]
    SeekOutOfRange,
}

pub type BitResult<T> = Result<T, BitError>;

#[derive(Clone, Copy, Debug)]
pub struct BitReader<'data> {
    data: &'data [u8],
    byte_offset: usize,
    // 0..=7
    bit_offset: u32,
}

impl<'data> BitReader<'data> {
    pub fn new(data: &'data [u8]) -> Self {
        Self {
            data,
            byte_offset: 0,
            bit_offset: 0,
        }
    }

    pub fn remaining_bit_count(&self) -> u64 {
        ((self.data.len() - self.byte_offset) as u64 * 8) - self.bit_offset as u64
    }

    pub fn byte_offset(&self) -> usize {
        self.byte_offset
    }

    pub fn bit_offset(&self) -> u32 {
        self.bit_offset
    }

    /// Reads up to 32 bits without moving the cursor.
    pub fn peek_bits(&self, bit_count: u32) -> BitResult<u32> {
        if bit_count > 32 {
            return Err(BitError::TooWide(bit_count));
        }
        Ok(self.peek_bits_u64(bit_count)? as u32)
    }

    pub fn read_bits(&mut self, bit_count: u32) -> BitResult<u32> {
        let value = self.peek_bits(bit_count)?;
        self.advance(bit_count as u64);
        Ok(value)
    }

    /// Reads up to 64 bits without moving the cursor. The high bits come first in the buffer.
    pub fn peek_bits_u64(&self, bit_count: u32) -> BitResult<u64> {
        if bit_count > 64 {
            return Err(BitError::TooWide(bit_count));
        }
        self.check_remaining(bit_count as u64)?;

        let mut value = 0u64;
        let mut byte_offset = self.byte_offset;
        let mut bit_offset = self.bit_offset;
        let mut remaining = bit_count;
        while remaining > 0 {
            let available = 8 - bit_offset;
            let take = available.min(remaining);
            let chunk = (self.data[byte_offset] >> (available - take)) & (0xFF >> (8 - take));
            value = (value << take) | chunk as u64;
            bit_offset += take;
            if bit_offset == 8 {
                byte_offset += 1;
                bit_offset = 0;
            }
            remaining -= take;
        }
        Ok(value)
    }

    pub fn read_bits_u64(&mut self, bit_count: u32) -> BitResult<u64> {
        let value = self.peek_bits_u64(bit_count)?;
        self.advance(bit_count as u64);
        Ok(value)
    }

    pub fn read_bool(&mut self) -> BitResult<bool> {
        Ok(self.read_bits(1)? == 1)
    }

    pub fn read_u8(&mut self) -> BitResult<u8> {
        Ok(self.read_bits(8)? as u8)
    }

    pub fn read_u16(&mut self) -> BitResult<u16> {
        Ok(self.read_bits(16)? as u16)
    }

    pub fn read_u32(&mut self) -> BitResult<u32> {
        self.read_bits(32)
    }

    pub fn consume_bits(&mut self, bit_count: u64) -> BitResult<()> {
        self.check_remaining(bit_count)?;
        self.advance(bit_count);
        Ok(())
    }

    pub fn seek(&mut self, byte_offset: usize, bit_offset: u32) -> BitResult<()> {
        if bit_offset > 7
            || byte_offset > self.data.len()
            || (byte_offset == self.data.len() && bit_offset > 0)
        {
            return Err(BitError::SeekOutOfRange);
        }
        self.byte_offset = byte_offset;
        self.bit_offset = bit_offset;
        Ok(())
    }

    /// Reads an unsigned exponential-Golomb value. On failure the cursor is left where it was.
    pub fn read_exponential_golomb(&mut self) -> BitResult<u32> {
        let mut probe = *self;
        let mut zero_bit_count = 0;
        while probe.read_bits(1)? == 0 {
            zero_bit_count += 1;
            if zero_bit_count > 31 {
                return Err(BitError::GolombTooLong);
            }
        }
        let low_bits = probe.read_bits(zero_bit_count)? as u64;
        let value = ((1u64 << zero_bit_count) | low_bits) - 1;
        *self = probe;
        Ok(value as u32)
    }

    fn check_remaining(&self, wanted: u64) -> BitResult<()> {
        let remaining = self.remaining_bit_count();
        if wanted > remaining {
            Err(BitError::OutOfBits { wanted, remaining })
        } else {
            Ok(())
        }
    }

    fn advance(&mut self, bit_count: u64) {
        let total = self.bit_offset as u64 + bit_count;
        self.byte_offset += (total / 8) as usize;
        self.bit_offset = (total % 8) as u32;
    }
}

/// Writes bits into a fixed-size buffer. A write that does not fit changes nothing.
#[derive(Debug)]
pub struct BitWriter<'data> {
    data: &'data mut [u8],
    byte_offset: usize,
    bit_offset: u32,
}

impl<'data> BitWriter<'data> {
    pub fn new(data: &'data mut [u8]) -> Self {
        Self {
            data,
            byte_offset: 0,
            bit_offset: 0,
        }
    }

    pub fn remaining_bit_count(&self) -> u64 {
        ((self.data.len() - self.byte_offset) as u64 * 8) - self.bit_offset as u64
    }

    /// Number of bits written so far.
    pub fn written_bit_count(&self) -> u64 {
        self.byte_offset as u64 * 8 + self.bit_offset as u64
    }

    /// Writes the low `bit_count` bits of `value`.
    pub fn write_bits(&mut self, value: u64, bit_count: u32) -> BitResult<()> {
        if bit_count > 64 {
            return Err(BitError::TooWide(bit_count));
        }
        let remaining = self.remaining_bit_count();
        if bit_count as u64 > remaining {
            return Err(BitError::OutOfBits {
                wanted: bit_count as u64,
                remaining,
            });
        }

        let mut left = bit_count;
        while left > 0 {
            let available = 8 - self.bit_offset;
            let take = available.min(left);
            let chunk = ((value >> (left - take)) as u8) & (0xFF >> (8 - take));
            let shift = available - take;
            let mask = (0xFFu8 >> (8 - take)) << shift;
            let byte = &mut self.data[self.byte_offset];
            *byte = (*byte & !mask) | (chunk << shift);
            self.bit_offset += take;
            if self.bit_offset == 8 {
                self.byte_offset += 1;
                self.bit_offset = 0;
            }
            left -= take;
        }
        Ok(())
    }

    pub fn write_exponential_golomb(&mut self, value: u32) -> BitResult<()> {
        let value_plus_one = value as u64 + 1;
        let significant_bits = 64 - value_plus_one.leading_zeros();
        let total = 2 * significant_bits as u64 - 1;
        let remaining = self.remaining_bit_count();
        if total > remaining {
            return Err(BitError::OutOfBits {
                wanted: total,
                remaining,
            });
        }
        self.write_bits(0, significant_bits - 1)?;
        self.write_bits(value_plus_one, significant_bits)
    }
}
