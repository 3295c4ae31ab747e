//! Adaptive polling: delay strategies, per-resource machines, and the
//! master machine that aggregates them under one presence state.

pub mod group;
pub mod poller;
pub mod strategy;

pub use group::PollerGroup;
pub use poller::{Poller, DEFAULT_MAX_DELAY};
pub use strategy::{PollState, PollStrategy};
