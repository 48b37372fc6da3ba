//
// Copyright 2025 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Send-side transport-wide congestion control feedback.
//!
//! Parses and builds the RTCP transport feedback message, keeps a ledger of sent packets,
//! and merges the two into per-packet send and arrival times for bandwidth estimation.

pub mod adapter;
pub mod config;
pub mod delta_encoding;
pub mod feedback_history;
pub mod packet_feedback;
pub mod trace;
pub mod transportcc;
