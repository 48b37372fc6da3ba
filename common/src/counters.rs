//
// Copyright 2025 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

/// Recovers the full value of a counter that is only sent in its low `width` bits, such as
/// a 16-bit transport sequence number.
///
/// `max` is the largest value recovered so far. The result is the candidate closest to it,
/// so it may have wrapped forward or backward, but never below zero. `max` moves forward
/// when the result is larger; pass a copy to look up a value without moving it.
///
/// `width` must be in 1..=63. Bits of `truncated` above `width` are ignored.
pub fn expand_truncated_counter(truncated: impl Into<u64>, max: &mut u64, width: u32) -> u64 {
    debug_assert!((1..64).contains(&width));
    let period: u64 = 1 << width;
    let half_period = period >> 1;

    let low_bits = truncated.into() & (period - 1);
    let max_low_bits = *max & (period - 1);
    let max_cycles = *max >> width;
    let cycles = if max_low_bits > low_bits && max_low_bits - low_bits > half_period {
        // Wrapped forward past the top of the range.
        max_cycles + 1
    } else if low_bits > max_low_bits && low_bits - max_low_bits > half_period && max_cycles > 0
    {
        // Late arrival from before the last wrap.
        max_cycles - 1
    } else {
        max_cycles
    };

    let expanded = (cycles << width) | low_bits;
    *max = (*max).max(expanded);
    expanded
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expand_all(values: &[u16], max: &mut u64) -> Vec<u64> {
        values
            .iter()
            .map(|value| expand_truncated_counter(*value, max, 16))
            .collect()
    }

    #[test]
    fn sequence_numbers_in_order() {
        let mut max = 0;
        assert_eq!(vec![0, 1, 2, 1000], expand_all(&[0, 1, 2, 1000], &mut max));
        assert_eq!(1000, max);
    }

    #[test]
    fn wrap_forward() {
        let mut max = 0;
        assert_eq!(
            vec![0xfffe, 0xffff, 0x1_0000, 0x1_0001],
            expand_all(&[0xfffe, 0xffff, 0x0000, 0x0001], &mut max)
        );
        assert_eq!(0x1_0001, max);
    }

    #[test]
    fn late_arrivals_from_before_a_wrap() {
        let mut max = 0x1_0002;
        assert_eq!(
            vec![0xfffd, 0x1_0000, 0x1_0003],
            expand_all(&[0xfffd, 0x0000, 0x0003], &mut max)
        );
        assert_eq!(0x1_0003, max);
    }

    #[test]
    fn never_wraps_below_zero() {
        let mut max = 5;
        assert_eq!(0xfff0, expand_truncated_counter(0xfff0u16, &mut max, 16));
        assert_eq!(0xfff0, max);
    }

    #[test]
    fn lookups_with_a_copy_leave_max_alone() {
        let max = 0x2_fff0u64;
        let mut lookup_max = max;
        assert_eq!(
            0x3_0002,
            expand_truncated_counter(0x0002u16, &mut lookup_max, 16)
        );
        assert_eq!(0x2_fff0, max);
        assert_eq!(0x3_0002, lookup_max);
    }

    #[test]
    fn narrow_counters() {
        let mut max = 0b11_0111;
        let expanded: Vec<u64> = [0b0001u8, 0b1111, 0b0110, 0b1111]
            .into_iter()
            .map(|value| expand_truncated_counter(value, &mut max, 4))
            .collect();
        assert_eq!(vec![0b11_0001, 0b11_1111, 0b100_0110, 0b11_1111], expanded);
        assert_eq!(0b100_0110, max);
    }
}
