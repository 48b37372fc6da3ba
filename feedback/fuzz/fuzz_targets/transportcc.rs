//
// Copyright 2023 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

#![no_main]

use libfuzzer_sys::fuzz_target;
use transport_feedback::transportcc::TransportFeedback;

fuzz_target!(|data: &[u8]| {
    if let Ok(feedback) = TransportFeedback::parse(data) {
        let rebuilt = TransportFeedback::parse(&feedback.build())
            .expect("a built message can be parsed");
        assert_eq!(feedback.base_sequence(), rebuilt.base_sequence());
        assert_eq!(feedback.base_time_us(), rebuilt.base_time_us());
        assert!(feedback.packets().eq(rebuilt.packets()));
    }
});
