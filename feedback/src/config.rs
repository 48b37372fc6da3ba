//
// Copyright 2025 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Configuration options for the replay tool and the feedback adapter.

use tcc_common::Duration;

use crate::feedback_history::DEFAULT_HISTORY_HORIZON;

/// General configuration options, set by command line arguments.
#[derive(Default, clap::Parser, Debug, Clone)]
#[clap(name = "tcc_replay")]
pub struct Config {
    /// Path of a JSON-lines trace of send-side events to replay, or "-" for stdin.
    #[clap(long, default_value = "-")]
    pub trace: String,

    /// How long, in seconds, an unacknowledged packet is remembered.
    #[clap(long, default_value = "60")]
    pub send_side_history_secs: u64,

    /// SSRCs to register a stream feedback observer for, comma separated.
    #[clap(long, value_delimiter = ',')]
    pub observe_ssrcs: Vec<u32>,

    /// Log every merged feedback vector instead of only a summary at the end.
    #[clap(long)]
    pub log_vectors: bool,
}

/// Settings for a [`crate::adapter::TransportFeedbackAdapter`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AdapterConfig {
    /// Packets older than this are evicted from the send-side ledger.
    pub history_horizon: Duration,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            history_horizon: DEFAULT_HISTORY_HORIZON,
        }
    }
}

impl From<&Config> for AdapterConfig {
    fn from(config: &Config) -> Self {
        Self {
            history_horizon: Duration::from_secs(config.send_side_history_secs),
        }
    }
}
