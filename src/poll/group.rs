//! Master polling machine
//!
//! Aggregates the per-resource pollers under one presence state. State is
//! pushed to every child before any of them starts, so no child begins
//! polling under a stale state; all other controls fan out in child order.

use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::info;

use crate::poll::poller::Poller;
use crate::poll::strategy::PollState;

pub struct PollerGroup {
    children: Vec<Poller>,
    state: Mutex<PollState>,
}

impl PollerGroup {
    pub fn new(children: Vec<Poller>) -> Self {
        Self {
            children,
            state: Mutex::new(PollState::Active),
        }
    }

    fn current(&self) -> MutexGuard<'_, PollState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push the group state to all children, then start each in order.
    pub fn start(&self) {
        let state = *self.current();
        for child in &self.children {
            child.set_state(state);
        }
        for child in &self.children {
            child.start();
        }
        info!(children = self.children.len(), state = ?state, "poller group started");
    }

    pub fn stop(&self) {
        for child in &self.children {
            child.stop();
        }
    }

    pub fn close(&self) {
        for child in &self.children {
            child.close();
        }
    }

    /// Propagate a presence change uniformly to every child.
    pub fn set_state(&self, state: PollState) {
        *self.current() = state;
        for child in &self.children {
            child.set_state(state);
        }
    }

    pub fn reset_timers(&self) {
        for child in &self.children {
            child.reset_timers();
        }
    }

    pub fn state(&self) -> PollState {
        *self.current()
    }

    pub fn children(&self) -> &[Poller] {
        &self.children
    }
}
