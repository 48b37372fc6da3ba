//
// Copyright 2023 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

#![no_main]

use libfuzzer_sys::fuzz_target;
use transport_feedback::delta_encoding::{decode_deltas, encode_deltas, try_decode_deltas};

fuzz_target!(|input: (u64, Vec<u64>, &[u8], u8)| {
    let (base, values, garbage, count) = input;
    if !values.is_empty() {
        let encoded = encode_deltas(base, &values);
        assert_eq!(values, decode_deltas(&encoded, base, values.len()));
    }
    let _ = try_decode_deltas(garbage, base, count as usize);
});
