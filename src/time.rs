// Copyright (c) 2026 Pairlink
// SPDX-License-Identifier: BUSL-1.1
//! Clock access. Absolute unix timestamps are used everywhere (record
//! creation, expiries, request id seeding) so persisted state stays
//! comparable across restarts.

use chrono::Utc;

/// Current unix time in whole seconds.
pub fn now_secs() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

/// Current unix time in microseconds. Seeds the request id counter so ids
/// from successive process lifetimes never collide.
pub fn unix_micros() -> u64 {
    Utc::now().timestamp_micros().max(0) as u64
}
