//! Per-resource adaptive polling machine
//!
//! A poller owns one pending timer and a strategy per presence state. Each
//! firing advances the current strategy, arms the next timer if the new
//! delay is finite and under the ceiling, and then forces an update on
//! every bound resource. Observed activity on a bound resource's bus warm
//! resets the cadence back toward its fast end.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::bus::SinkId;
use crate::config::ResourcePolicy;
use crate::poll::strategy::PollState;
use crate::scheduler::{Scheduler, TimerHandle};
use crate::sync::{Resource, SyncEvent};

/// Ceiling applied when no explicit maximum delay is configured: one day.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

struct Binding {
    resource: Arc<dyn Resource>,
    sink: SinkId,
}

struct PollerCore {
    current: PollState,
    policy: ResourcePolicy,
    running: bool,
    closed: bool,
    timer: Option<TimerHandle>,
    bound: Vec<Binding>,
}

struct PollerInner {
    name: String,
    scheduler: Scheduler,
    max_delay: Duration,
    core: Mutex<PollerCore>,
}

/// Cheap cloneable handle to one polling machine
#[derive(Clone)]
pub struct Poller {
    inner: Arc<PollerInner>,
}

impl Poller {
    pub fn new(
        name: &str,
        policy: ResourcePolicy,
        scheduler: Scheduler,
        max_delay: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                name: name.to_string(),
                scheduler,
                max_delay,
                core: Mutex::new(PollerCore {
                    current: PollState::Active,
                    policy,
                    running: false,
                    closed: false,
                    timer: None,
                    bound: Vec::new(),
                }),
            }),
        }
    }

    /// Bind a resource: its updates are forced on every firing, and change
    /// events on its bus warm reset this machine.
    pub fn bind(&self, resource: Arc<dyn Resource>) {
        let weak = Arc::downgrade(&self.inner);
        let sink = resource.events().subscribe(Box::new(move |event| {
            if matches!(event, SyncEvent::UpdateFailed { .. }) {
                return Ok(());
            }
            if let Some(inner) = weak.upgrade() {
                PollerInner::reset_timers(&inner);
            }
            Ok(())
        }));
        let mut core = self.inner.guard();
        if core.closed {
            drop(core);
            resource.events().unsubscribe(sink);
            warn!(machine = %self.inner.name, "bind ignored on closed poller");
            return;
        }
        core.bound.push(Binding { resource, sink });
    }

    /// Cold reset every strategy, mark running, and fire immediately unless
    /// the current state's strategy reports no polling at all.
    pub fn start(&self) {
        let inner = &self.inner;
        let mut core = inner.guard();
        if core.closed {
            warn!(machine = %inner.name, "start ignored on closed poller");
            return;
        }
        if core.running {
            debug!(machine = %inner.name, "start ignored, already running");
            return;
        }
        core.policy.reset_all_cold();
        core.running = true;
        if core.policy.strategy(core.current).delay().is_some() {
            PollerInner::arm(inner, &mut core, Duration::ZERO);
        } else {
            debug!(machine = %inner.name, state = ?core.current, "current strategy never polls");
        }
        info!(machine = %inner.name, state = ?core.current, "poller started");
    }

    /// Cancel the pending timer and mark not running. Strategy cursors are
    /// preserved.
    pub fn stop(&self) {
        let mut core = self.inner.guard();
        if core.closed || !core.running {
            return;
        }
        if let Some(timer) = core.timer.take() {
            timer.cancel();
        }
        core.running = false;
        info!(machine = %self.inner.name, "poller stopped");
    }

    /// Terminal: cancel the timer and drop this machine's bus registrations.
    pub fn close(&self) {
        let bindings = {
            let mut core = self.inner.guard();
            if core.closed {
                return;
            }
            core.closed = true;
            core.running = false;
            if let Some(timer) = core.timer.take() {
                timer.cancel();
            }
            std::mem::take(&mut core.bound)
        };
        for binding in &bindings {
            binding.resource.events().unsubscribe(binding.sink);
        }
        info!(machine = %self.inner.name, "poller closed");
    }

    /// Transition to `state` with a cold reset of its strategy, then
    /// reschedule. A no-op when the state is unchanged.
    pub fn set_state(&self, state: PollState) {
        let inner = &self.inner;
        let mut core = inner.guard();
        if core.closed {
            return;
        }
        if core.current == state {
            debug!(machine = %inner.name, state = ?state, "state unchanged");
            return;
        }
        info!(machine = %inner.name, from = ?core.current, to = ?state, "presence change");
        core.current = state;
        let delay = {
            let strategy = core.policy.strategy_mut(state);
            strategy.reset_cold();
            strategy.delay()
        };
        PollerInner::rearm(inner, &mut core, delay);
    }

    /// Warm reset the current strategy and reschedule. Called on an
    /// activity signal so real observed traffic snaps the cadence back to
    /// its fast end instead of waiting out an elapsed backoff.
    pub fn reset_timers(&self) {
        PollerInner::reset_timers(&self.inner);
    }

    pub fn state(&self) -> PollState {
        self.inner.guard().current
    }

    pub fn is_running(&self) -> bool {
        self.inner.guard().running
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }
}

impl PollerInner {
    fn guard(&self) -> MutexGuard<'_, PollerCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reset_timers(inner: &Arc<Self>) {
        let mut core = inner.guard();
        if core.closed {
            return;
        }
        debug!(machine = %inner.name, "activity observed, warm reset");
        let delay = {
            let current = core.current;
            let strategy = core.policy.strategy_mut(current);
            strategy.reset_warm();
            strategy.delay()
        };
        Self::rearm(inner, &mut core, delay);
    }

    /// Cancel the pending timer and arm a fresh one at `delay`, honoring
    /// the infinite sentinel and the ceiling. Does nothing while stopped.
    fn rearm(inner: &Arc<Self>, core: &mut PollerCore, delay: Option<Duration>) {
        if !core.running {
            return;
        }
        if let Some(timer) = core.timer.take() {
            timer.cancel();
        }
        match delay {
            Some(delay) if delay <= inner.max_delay => Self::arm(inner, core, delay),
            Some(delay) => {
                debug!(machine = %inner.name, delay_secs = delay.as_secs(), "delay over ceiling, pausing")
            }
            None => debug!(machine = %inner.name, "strategy reports no further polling"),
        }
    }

    fn arm(inner: &Arc<Self>, core: &mut PollerCore, delay: Duration) {
        if let Some(timer) = core.timer.take() {
            timer.cancel();
        }
        let weak = Arc::downgrade(inner);
        core.timer = Some(inner.scheduler.schedule(delay, move || {
            if let Some(inner) = weak.upgrade() {
                Self::on_timeout(&inner);
            }
        }));
    }

    /// Timer firing: advance the strategy and arm the next timer first,
    /// then force an update on every bound resource. Each resource absorbs
    /// its own failures, so one bad fetch never blocks its siblings or
    /// future scheduling.
    fn on_timeout(inner: &Arc<Self>) {
        let resources: Vec<Arc<dyn Resource>> = {
            let mut core = inner.guard();
            if core.closed || !core.running {
                return;
            }
            core.timer = None;
            let delay = {
                let current = core.current;
                let strategy = core.policy.strategy_mut(current);
                strategy.advance();
                strategy.delay()
            };
            match delay {
                Some(delay) if delay <= inner.max_delay => {
                    Self::arm(inner, &mut core, delay);
                }
                Some(delay) => {
                    debug!(machine = %inner.name, delay_secs = delay.as_secs(), "delay over ceiling, pausing")
                }
                None => debug!(machine = %inner.name, "strategy reports no further polling"),
            }
            core.bound
                .iter()
                .map(|binding| Arc::clone(&binding.resource))
                .collect()
        };
        for resource in resources {
            debug!(machine = %inner.name, resource = resource.name(), "forcing update");
            resource.update(true);
        }
    }
}
