//! Splitting the model horizon into sub-horizons which are solved one after another.
use crate::error::{DispatchError, ensure_config};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An inclusive range of time steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    /// The first time step
    pub start: u32,
    /// The last time step (inclusive)
    pub stop: u32,
}

impl TimeRange {
    /// Create a new [`TimeRange`]. `stop` must not be before `start`.
    pub fn new(start: u32, stop: u32) -> Self {
        assert!(stop >= start, "Invalid time range {start}:{stop}");
        Self { start, stop }
    }

    /// Iterate over the time steps in order
    pub fn iter(&self) -> impl Iterator<Item = u32> + use<> {
        self.start..=self.stop
    }

    /// The number of time steps
    pub fn len(&self) -> usize {
        (self.stop - self.start + 1) as usize
    }

    /// Always false: a range holds at least one time step
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether `t` lies inside the range
    pub fn contains(&self, t: u32) -> bool {
        (self.start..=self.stop).contains(&t)
    }

    /// Whether `other` lies entirely inside this range
    pub fn covers(&self, other: &TimeRange) -> bool {
        self.contains(other.start) && self.contains(other.stop)
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start, self.stop)
    }
}

/// How the model horizon is split into sub-horizons
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct TimeHorizon {
    /// The first time step to model
    pub start: u32,
    /// Length of an initial, separately solved sub-horizon (0 for none)
    #[serde(default)]
    pub offset: i32,
    /// Length of each subsequent sub-horizon
    pub split: u32,
    /// The last time step to model
    pub stop: u32,
}

/// Split the horizon into consecutive, disjoint sub-horizons covering `[start, stop]`.
///
/// If `offset` is positive, the first sub-horizon is `[start, start + offset)` and the rest of the
/// horizon is split into chunks of length `split`. The last chunk is truncated to `stop`.
pub fn split_horizon(horizon: &TimeHorizon) -> Result<Vec<TimeRange>, DispatchError> {
    let TimeHorizon {
        start,
        offset,
        split,
        stop,
    } = *horizon;
    ensure_config!(
        stop >= start,
        "time horizon stop ({stop}) is before start ({start})"
    );
    ensure_config!(split > 0, "time horizon split must be greater than zero");
    ensure_config!(
        offset >= 0,
        "time horizon offset ({offset}) would place the first sub-horizon before start ({start})"
    );

    let mut ranges = Vec::new();
    let mut chunk_start = start;
    if offset > 0 {
        let first_stop = start.saturating_add(offset.unsigned_abs() - 1).min(stop);
        ranges.push(TimeRange::new(start, first_stop));
        if first_stop == stop {
            return Ok(ranges);
        }
        chunk_start = first_stop + 1;
    }

    loop {
        let chunk_stop = chunk_start.saturating_add(split - 1).min(stop);
        ranges.push(TimeRange::new(chunk_start, chunk_stop));
        if chunk_stop == stop {
            break;
        }
        chunk_start = chunk_stop + 1;
    }

    Ok(ranges)
}

/// The time step preceding `t` within `range`.
///
/// For the first time step of the range this wraps around to the *last* time step of the same
/// range; it never refers to a time step outside `range`.
pub fn prev_period(range: &TimeRange, t: u32) -> u32 {
    assert!(range.contains(t), "Time step {t} is not in range {range}");

    if t == range.start { range.stop } else { t - 1 }
}
