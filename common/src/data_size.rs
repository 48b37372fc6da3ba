//
// Copyright 2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

use std::{
    iter::Sum,
    ops::{Add, AddAssign},
};

/// An amount of data, stored in bits.
#[derive(Copy, Clone, Default, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub struct DataSize {
    bits: u64,
}

impl std::fmt::Debug for DataSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.bits % Self::BITS_PER_BYTE == 0 {
            write!(f, "{}bytes", self.as_bytes())
        } else {
            write!(f, "{}bits", self.bits)
        }
    }
}

impl DataSize {
    pub const ZERO: Self = Self::from_bits(0);
    const BITS_PER_BYTE: u64 = 8;

    pub const fn from_bits(bits: u64) -> Self {
        Self { bits }
    }

    pub const fn from_bytes(bytes: u64) -> Self {
        Self::from_bits(bytes * Self::BITS_PER_BYTE)
    }

    pub const fn as_bits(&self) -> u64 {
        self.bits
    }

    pub const fn as_bytes(&self) -> u64 {
        self.bits / Self::BITS_PER_BYTE
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self::from_bits(self.bits.saturating_sub(other.bits))
    }
}

impl Add<DataSize> for DataSize {
    type Output = DataSize;

    fn add(self, other: DataSize) -> DataSize {
        DataSize::from_bits(self.bits + other.bits)
    }
}

impl AddAssign<DataSize> for DataSize {
    fn add_assign(&mut self, rhs: DataSize) {
        *self = *self + rhs;
    }
}

impl Sum for DataSize {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        Self::from_bits(iter.map(|size| size.bits).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::DataSize;

    #[test]
    fn bytes_and_bits() {
        assert_eq!(DataSize::from_bits(800), DataSize::from_bytes(100));
        assert_eq!(100, DataSize::from_bits(807).as_bytes());
        assert_eq!(DataSize::ZERO, Default::default());
    }

    #[test]
    fn saturating_sub() {
        let small = DataSize::from_bytes(10);
        let large = DataSize::from_bytes(25);
        assert_eq!(DataSize::from_bytes(15), large.saturating_sub(small));
        assert_eq!(DataSize::ZERO, small.saturating_sub(large));
    }

    #[test]
    fn sum() {
        assert_eq!(
            DataSize::from_bytes(6),
            [1, 2, 3].into_iter().map(DataSize::from_bytes).sum()
        );
    }

    #[test]
    fn debug() {
        assert_eq!("1200bytes", format!("{:?}", DataSize::from_bytes(1200)));
        assert_eq!("9bits", format!("{:?}", DataSize::from_bits(9)));
    }
}
