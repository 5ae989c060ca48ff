//! Backstop - a cycle event limiting how far execution may run without a watched access.

use crate::watch::engine::{CycleEventId, Engine};
use crate::watch::error::Error;
use crate::weak_error;
use log::debug;

/// Default backstop distance in cycles.
pub const DEFAULT_BACKSTOP_CYCLES: u64 = 5_000_000;

/// Halt reason passed to the engine when the backstop fires.
pub const BACKSTOP_HALT_REASON: &str = "hit final cycle";

/// Callback invoked once the backstop halts execution.
pub type BackstopCallback = Box<dyn FnMut()>;

/// Result of a backstop event delivery.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BackstopFire {
    /// Event does not belong to an armed timer of a live session, execution goes on.
    Stale,
    /// Execution halted, callback (if any) invoked.
    Halted,
}

pub struct BackstopTimer {
    event: Option<CycleEventId>,
    target_cycle: Option<u64>,
    timeout_cycles: u64,
    /// False once the owning session is torn down.
    live: bool,
    callback: Option<BackstopCallback>,
}

impl Default for BackstopTimer {
    fn default() -> Self {
        Self {
            event: None,
            target_cycle: None,
            timeout_cycles: DEFAULT_BACKSTOP_CYCLES,
            live: true,
            callback: None,
        }
    }
}

impl BackstopTimer {
    /// Set a function called when no activity happens for the armed number of cycles.
    /// Replaces previous callback.
    pub fn set_callback(&mut self, callback: BackstopCallback) {
        self.callback = Some(callback);
    }

    pub fn is_armed(&self) -> bool {
        self.target_cycle.is_some()
    }

    /// Absolute cycle at which armed timer fires.
    pub fn target_cycle(&self) -> Option<u64> {
        self.target_cycle
    }

    pub fn timeout_cycles(&self) -> u64 {
        self.timeout_cycles
    }

    /// Arm timer `cycles` cycles from now. Previously armed timer is cancelled first,
    /// so there is never more than one pending event.
    pub fn arm(&mut self, engine: &mut dyn Engine, cycles: u64) -> Result<(), Error> {
        self.cancel(engine);
        let event = engine.post_cycle_event(cycles)?;
        self.event = Some(event);
        self.timeout_cycles = cycles;
        self.target_cycle = Some(engine.cycles() + cycles);
        debug!(
            target: "backstop",
            "armed, now: {:#x} cycles: {cycles:#x} event: {event}",
            engine.cycles()
        );
        Ok(())
    }

    /// Cancel armed timer, safe to call on disarmed one.
    pub fn cancel(&mut self, engine: &mut dyn Engine) {
        if let Some(event) = self.event.take() {
            debug!(target: "backstop", "cancel event {event}");
            weak_error!(engine.cancel_cycle_event(event), "backstop cancel:");
        }
        self.target_cycle = None;
    }

    /// Mark owning session as torn down, a timer that outlives it will not halt execution.
    pub fn detach(&mut self) {
        self.live = false;
    }

    /// Handle a delivered cycle event.
    pub fn fire(&mut self, engine: &mut dyn Engine, event: CycleEventId) -> BackstopFire {
        if self.event != Some(event) || self.target_cycle.is_none() {
            debug!(target: "backstop", "event {event} is not armed, ignore");
            return BackstopFire::Stale;
        }
        // fired event is consumed by the engine, nothing to cancel
        self.event = None;
        self.target_cycle = None;

        if !self.live {
            debug!(target: "backstop", "event {event} lingering after session teardown, ignore");
            return BackstopFire::Stale;
        }

        debug!(target: "backstop", "halt execution at cycle {:#x}", engine.cycles());
        engine.halt(BACKSTOP_HALT_REASON);
        if let Some(callback) = self.callback.as_mut() {
            callback();
        }
        BackstopFire::Halted
    }
}
