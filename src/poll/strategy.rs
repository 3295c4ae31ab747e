//! Poll delay strategies
//!
//! A strategy computes the next poll delay for one presence state. The
//! configuration side of a strategy is immutable; the cursor fields are
//! runtime state and never serialized. `delay` returning `None` is the
//! infinite sentinel: no further poll until the owning machine is reset.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Presence states shared by the master machine and all children
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollState {
    Active,
    Idle,
    DoNotDisturb,
}

/// Pluggable policy computing the next poll delay
///
/// Delays are whole seconds. `Geometric` bounds follow the backoff rule
/// `delay = init + window`, the window doubling per poll and clamped to
/// `max - init`; an omitted bound is infinite and forwards through the
/// arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PollStrategy {
    /// Never poll in this state
    Nop,
    /// Poll at a fixed interval
    Constant { secs: u64 },
    /// Burst of quick polls, then settle on a steady interval
    NTimes {
        burst: Vec<u64>,
        settle: u64,
        #[serde(skip)]
        cursor: usize,
    },
    /// Exponential backoff between a floor and a ceiling
    Geometric {
        init: Option<u64>,
        min: Option<u64>,
        max: Option<u64>,
        #[serde(skip)]
        window: Option<u64>,
    },
}

impl PollStrategy {
    /// Cold reset, applied on an explicit state change: start at the slow
    /// end. `NTimes` skips its burst entirely and `Geometric` opens the
    /// window to `max`.
    pub fn reset_cold(&mut self) {
        match self {
            PollStrategy::Nop | PollStrategy::Constant { .. } => {}
            PollStrategy::NTimes { burst, cursor, .. } => *cursor = burst.len(),
            PollStrategy::Geometric { max, window, .. } => *window = *max,
        }
    }

    /// Warm reset, applied on observed activity: start at the fast end.
    /// `NTimes` replays its burst and `Geometric` closes the window to
    /// `min`.
    pub fn reset_warm(&mut self) {
        match self {
            PollStrategy::Nop | PollStrategy::Constant { .. } => {}
            PollStrategy::NTimes { cursor, .. } => *cursor = 0,
            PollStrategy::Geometric { min, window, .. } => *window = *min,
        }
    }

    /// Advance the cursor after a firing.
    pub fn advance(&mut self) {
        match self {
            PollStrategy::Nop | PollStrategy::Constant { .. } => {}
            PollStrategy::NTimes { cursor, .. } => *cursor = cursor.saturating_add(1),
            PollStrategy::Geometric {
                init, max, window, ..
            } => {
                // An already-infinite window stays infinite until a reset.
                if let Some(current) = *window {
                    let doubled = current.saturating_mul(2);
                    *window = Some(match (*init, *max) {
                        (Some(floor), Some(ceiling)) => {
                            doubled.min(ceiling.saturating_sub(floor))
                        }
                        _ => doubled,
                    });
                }
            }
        }
    }

    /// Current delay, or `None` for the infinite sentinel.
    pub fn delay(&self) -> Option<Duration> {
        match self {
            PollStrategy::Nop => None,
            PollStrategy::Constant { secs } => Some(Duration::from_secs(*secs)),
            PollStrategy::NTimes {
                burst,
                settle,
                cursor,
            } => Some(Duration::from_secs(
                burst.get(*cursor).copied().unwrap_or(*settle),
            )),
            PollStrategy::Geometric { init, window, .. } => match (init, window) {
                (Some(floor), Some(current)) => {
                    Some(Duration::from_secs(floor.saturating_add(*current)))
                }
                _ => None,
            },
        }
    }

    pub fn constant(secs: u64) -> Self {
        PollStrategy::Constant { secs }
    }

    pub fn n_times(burst: Vec<u64>, settle: u64) -> Self {
        PollStrategy::NTimes {
            cursor: burst.len(),
            burst,
            settle,
        }
    }

    pub fn geometric(init: u64, min: u64, max: u64) -> Self {
        PollStrategy::Geometric {
            init: Some(init),
            min: Some(min),
            max: Some(max),
            window: Some(max),
        }
    }
}
