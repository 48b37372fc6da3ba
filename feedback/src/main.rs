//
// Copyright 2025 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

#[macro_use]
extern crate log;

use std::{
    fs::File,
    io::{self, BufReader},
};

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use once_cell::sync::Lazy;
use transport_feedback::{config, trace};

// Load the config and treat it as a read-only static value.
static CONFIG: Lazy<config::Config> = Lazy::new(config::Config::parse);

#[rustfmt::skip]
fn print_config(config: &'static config::Config) {
    info!("config:");
    info!("  {:38}{}", "trace:", config.trace);
    info!("  {:38}{}", "send_side_history_secs:", config.send_side_history_secs);
    info!("  {:38}{:?}", "observe_ssrcs:", config.observe_ssrcs);
    info!("  {:38}{}", "log_vectors:", config.log_vectors);
}

fn main() -> Result<()> {
    // Initialize logging.
    env_logger::Builder::from_env(
        Env::default()
            .default_filter_or("transport_feedback=info,tcc_replay=info")
            .default_write_style_or("never"),
    )
    .format(tcc_common::format_log_line)
    .init();

    info!(
        "tcc_replay: v{}",
        option_env!("CARGO_PKG_VERSION").unwrap_or("unknown")
    );

    // Parse the command line arguments.
    let config = &CONFIG;
    print_config(config);

    let summary = if config.trace == "-" {
        trace::replay(trace::read_trace(io::stdin().lock()), config)?
    } else {
        let file = File::open(&config.trace)
            .with_context(|| format!("failed to open trace {}", config.trace))?;
        trace::replay(trace::read_trace(BufReader::new(file)), config)?
    };

    info!(
        "replayed {} feedback messages ({} malformed, {} unmatched)",
        summary.feedback_messages, summary.malformed_feedback, summary.unmatched_feedback
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
