//
// Copyright 2025 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

use std::fmt;

/// A two's complement signed 24-bit integer, such as an RTCP transport feedback
/// reference time.
#[derive(Copy, Clone, Default, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct I24(i32);

impl I24 {
    pub const BITS: u32 = 24;
    pub const MAX: I24 = I24((1 << 23) - 1);
    pub const MIN: I24 = I24(-(1 << 23));
    pub const ZERO: I24 = I24(0);

    /// Keeps the low 24 bits of `value`, so values out of range wrap around.
    pub fn truncate(value: i64) -> Self {
        Self::from_bits(value as u32)
    }

    /// Sign extends the low 24 bits of `bits`. Higher bits are ignored.
    pub fn from_bits(bits: u32) -> Self {
        Self(((bits << 8) as i32) >> 8)
    }

    /// The 24 raw bits, in the low bits of the result.
    pub fn to_bits(self) -> u32 {
        self.0 as u32 & 0x00ff_ffff
    }
}

impl From<I24> for i32 {
    fn from(value: I24) -> Self {
        value.0
    }
}

impl From<I24> for i64 {
    fn from(value: I24) -> Self {
        value.0 as i64
    }
}

impl fmt::Debug for I24 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I24({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::I24;

    #[test]
    fn sign_extension() {
        assert_eq!(-1, i32::from(I24::from_bits(0xffffff)));
        assert_eq!(I24::MIN, I24::from_bits(0x800000));
        assert_eq!(I24::MAX, I24::from_bits(0x7fffff));
        assert_eq!(5, i32::from(I24::from_bits(0xff000005)));
    }

    #[test]
    fn truncate_wraps() {
        assert_eq!(I24::MIN, I24::truncate(1 << 23));
        assert_eq!(I24::ZERO, I24::truncate(1 << 24));
        assert_eq!(-2, i32::from(I24::truncate((1 << 24) - 2)));
        assert_eq!(I24::MAX, I24::truncate(-(1 << 23) - 1));
    }

    #[test]
    fn raw_bits() {
        assert_eq!(0xffffff, I24::truncate(-1).to_bits());
        assert_eq!(0x800000, I24::MIN.to_bits());
        assert_eq!(0x000064, I24::truncate(100).to_bits());
        assert_eq!("I24(-3)", format!("{:?}", I24::truncate(-3)));
    }
}
