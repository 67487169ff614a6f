//! Timeline axis reconciliation.
//!
//! Decoded frames carry either a timestamp (legacy v3, goggle layouts) or a
//! frame number (legacy v2), never both. The reconciler derives the missing
//! axis from a nominal sample rate so that downstream consumers can rely on
//! both being present.

use crate::{
    decode::OsdFrame,
    error::{OsdError, OsdResult},
};

/// Populate the missing time/index axis on every frame.
///
/// A capture whose frames all carry timestamps gets
/// `index = round(time * nominal_rate)`; one whose frames all carry frame
/// numbers gets `time = index / nominal_rate`. Frames that already carry both
/// axes are left untouched.
///
/// A capture mixing the two populations cannot be reconciled against a single
/// rate and is rejected, stopping the pipeline.
pub fn reconcile(frames: &mut [OsdFrame], nominal_rate: f64) -> OsdResult<()> {
    if !(nominal_rate > 0.0) {
        return Err(OsdError::validation(format!(
            "nominal rate must be positive, got {nominal_rate}"
        )));
    }
    if frames.is_empty() {
        return Ok(());
    }

    let with_time = frames.iter().filter(|f| f.time_secs.is_some()).count();
    let with_index = frames.iter().filter(|f| f.index.is_some()).count();
    let total = frames.len();

    if with_time == total && with_index == total {
        return Ok(());
    }
    if with_time == total && with_index == 0 {
        for frame in frames.iter_mut() {
            let t = frame.time_secs.unwrap_or_default();
            frame.index = Some((t * nominal_rate).round().max(0.0) as u64);
        }
        return Ok(());
    }
    if with_index == total && with_time == 0 {
        for frame in frames.iter_mut() {
            let i = frame.index.unwrap_or_default();
            frame.time_secs = Some(i as f64 / nominal_rate);
        }
        return Ok(());
    }

    Err(OsdError::validation(format!(
        "capture mixes timestamped and indexed frames \
         ({with_time}/{total} with time, {with_index}/{total} with index); \
         cannot reconcile against one rate"
    )))
}

/// Effective sample rate observed from successive timestamp deltas.
///
/// The mean delta of whatever timestamps are present decides the rate; with
/// fewer than two timestamps (or a non-positive mean) the nominal rate is
/// returned. Reporting only — rasterization never consumes this.
pub fn effective_rate(frames: &[OsdFrame], nominal_rate: f64) -> f64 {
    let times: Vec<f64> = frames.iter().filter_map(|f| f.time_secs).collect();
    if times.len() < 2 {
        return nominal_rate;
    }
    let mean_dt =
        times.windows(2).map(|w| w[1] - w[0]).sum::<f64>() / (times.len() - 1) as f64;
    if mean_dt > 0.0 {
        1.0 / mean_dt
    } else {
        nominal_rate
    }
}
