//
// Copyright 2023 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

#![no_main]

use arbitrary::Unstructured;
use libfuzzer_sys::fuzz_target;
use tcc_common::{Duration, Instant};
use transport_feedback::{
    adapter::TransportFeedbackAdapter,
    config::AdapterConfig,
    packet_feedback::{PacketSendInfo, SocketSentPacket},
    transportcc::TransportFeedback,
};

fn step(
    gen: &mut Unstructured,
    adapter: &TransportFeedbackAdapter,
    epoch: Instant,
) -> Result<(), arbitrary::Error> {
    let at = epoch + Duration::from_millis(gen.int_in_range(0..=120_000)?);
    let sequence_number: u16 = gen.arbitrary()?;
    match gen.int_in_range(0..=3)? {
        0 => adapter.add_packet(
            &PacketSendInfo {
                transport_sequence_number: sequence_number,
                ssrc: gen.arbitrary()?,
                rtp_sequence_number: gen.arbitrary()?,
                length: gen.int_in_range(0..=1500)?,
                ..Default::default()
            },
            gen.int_in_range(0..=100)?,
            at,
        ),
        1 => {
            adapter.process_sent_packet(&SocketSentPacket {
                packet_id: gen.arbitrary::<bool>()?.then_some(sequence_number),
                send_time: at,
                size: gen.int_in_range(0..=1500)?,
                included_in_allocation: gen.arbitrary()?,
            });
        }
        2 => {
            let mut feedback = TransportFeedback::new();
            let mut arrival_us: i64 = gen.int_in_range(0..=1_000_000_000_000)?;
            feedback.set_base(sequence_number, arrival_us);
            let mut next = sequence_number;
            for _ in 0..gen.int_in_range(1..=50)? {
                arrival_us = arrival_us.saturating_add(gen.int_in_range(-20_000..=20_000)?);
                if !feedback.add_received_packet(next, arrival_us) {
                    break;
                }
                next = next.wrapping_add(gen.int_in_range(1..=5)?);
            }
            adapter.process_transport_feedback(&feedback, at);
        }
        _ => adapter.set_network_ids(gen.int_in_range(0..=1)?, gen.int_in_range(0..=1)?),
    }
    Ok(())
}

fuzz_target!(|data: &[u8]| {
    let mut gen = Unstructured::new(data);
    let epoch = Instant::now(); // only used relatively
    let adapter = TransportFeedbackAdapter::new(AdapterConfig::default(), epoch);

    // Consume all available entropy.
    while step(&mut gen, &adapter, epoch).is_ok() {}
});
