//
// Copyright 2022 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

use std::io::Write;

mod bits;
mod counters;
mod data_size;
mod integers;
mod time;

pub use bits::{BitError, BitReader, BitWriter};
pub use counters::expand_truncated_counter;
pub use data_size::DataSize;
pub use integers::I24;
pub use time::{Duration, Instant};

/// Log formatter shared by the binaries, for use with [`env_logger::Builder::format`].
///
/// Produces lines of the form `2025-01-02T03:04:05.678901Z INFO  module::path message`.
pub fn format_log_line(
    buf: &mut env_logger::fmt::Formatter,
    record: &log::Record,
) -> std::io::Result<()> {
    writeln!(
        buf,
        "{} {:<5} {} {}",
        buf.timestamp_micros(),
        record.level(),
        record.module_path().unwrap_or("?"),
        record.args()
    )
}
