/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Close time resolution and rounding.
//!
//! Validators' clocks are never perfectly in sync, so ledger close times are rounded to a resolution
//! that adapts to how well the network has been agreeing: it gets finer every few ledgers while
//! validators agree, and coarser as soon as they fail to.

use std::time::Duration;

use crate::types::data_types::{LedgerSeq, NetTime};

/// Possible close time resolutions in seconds, finest first.
pub const LEDGER_POSSIBLE_TIME_RESOLUTIONS: [u8; 6] = [10, 20, 30, 60, 90, 120];

/// Initial close time resolution in seconds.
pub const LEDGER_DEFAULT_TIME_RESOLUTION: u8 = 30;

/// Close time resolution of the genesis ledger in seconds.
pub const LEDGER_GENESIS_TIME_RESOLUTION: u8 = 30;

/// While agreeing, make the resolution finer on every ledger whose sequence is a multiple of this.
pub const INCREASE_LEDGER_TIME_RESOLUTION_EVERY: u32 = 8;

/// While disagreeing, make the resolution coarser on every ledger whose sequence is a multiple of this.
pub const DECREASE_LEDGER_TIME_RESOLUTION_EVERY: u32 = 1;

/// Compute the close time resolution of ledger `seq`, given the resolution of its parent and whether the
/// validators agreed on the parent's close time.
///
/// A `previous` resolution that is not one of [`LEDGER_POSSIBLE_TIME_RESOLUTIONS`] is returned unchanged.
pub fn next_resolution(previous: u8, previous_agree: bool, seq: LedgerSeq) -> u8 {
    let position = match LEDGER_POSSIBLE_TIME_RESOLUTIONS
        .iter()
        .position(|resolution| *resolution == previous)
    {
        Some(position) => position,
        None => return previous,
    };

    if !previous_agree && seq.int() % DECREASE_LEDGER_TIME_RESOLUTION_EVERY == 0 {
        if let Some(coarser) = LEDGER_POSSIBLE_TIME_RESOLUTIONS.get(position + 1) {
            return *coarser;
        }
    }

    if previous_agree && seq.int() % INCREASE_LEDGER_TIME_RESOLUTION_EVERY == 0 && position > 0 {
        return LEDGER_POSSIBLE_TIME_RESOLUTIONS[position - 1];
    }

    previous
}

/// Round `close_time` to the nearest multiple of `resolution` seconds, rounding halves up. The network
/// epoch is never rounded, since it stands for "no close time".
pub fn round_close_time(close_time: NetTime, resolution: u8) -> NetTime {
    if close_time.is_epoch() || resolution == 0 {
        return close_time;
    }
    let resolution = resolution as u32;
    let shifted = close_time.int().saturating_add(resolution / 2);
    NetTime::new(shifted - shifted % resolution)
}

/// The close time a ledger will actually get: `close_time` rounded to `resolution`, but always at least
/// one second after the parent's close time `prior_close_time`.
pub fn effective_close_time(close_time: NetTime, resolution: u8, prior_close_time: NetTime) -> NetTime {
    if close_time.is_epoch() {
        return close_time;
    }
    round_close_time(close_time, resolution).max(prior_close_time + Duration::from_secs(1))
}
