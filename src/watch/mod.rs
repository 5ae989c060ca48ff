//! Data-flow watch engine.
//!
//! A [`WatchSession`] keeps a set of watched memory ranges (typically buffers just filled
//! from an input source), arms one read/write breakpoint per range and classifies each
//! access the engine reports. Accesses are recorded as provenance marks. Accesses made by
//! bulk-memory library routines (memcpy and friends) are followed to the routine return,
//! so copies of watched data are watched too.

pub mod address;
pub mod backstop;
pub mod breakpoint;
mod classify;
pub mod config;
pub mod decode;
pub mod engine;
pub mod error;
pub mod mark;
pub mod oracle;
pub mod range;
pub mod recovery;
pub mod register;
pub mod stop;

pub use error::Error;

use crate::watch::address::Address;
use crate::watch::backstop::{BackstopCallback, BackstopFire};
use crate::watch::breakpoint::{BreakpointHandle, BreakpointLifecycle, ReturnTarget};
use crate::watch::config::WatchConfig;
use crate::watch::engine::{CycleEventId, Engine, StopReason};
use crate::watch::mark::{MarkLog, MarkOrigin, ProvenanceRecorder, RecordedMark, WatchMark};
use crate::watch::oracle::{
    FunctionResolver, NoAttribution, Relocatables, StackTraceSource, UserIterators,
};
use crate::watch::range::{Insertion, WatchSet};
use crate::watch::recovery::PendingCall;
use crate::watch::stop::StopAction;
use crate::weak_error;
use log::{debug, error};
use std::collections::VecDeque;

/// Work that must not run inside a breakpoint callback. Executed once the engine is quiescent.
#[derive(Debug)]
enum Deferred {
    /// Prepare actions for a halt on a watched access.
    SetStopAction { origin: MarkOrigin },
    /// Recover arguments of a bulk-memory function call.
    HandleMemCall(PendingCall),
    /// Walk back to a call site of a bulk-memory function.
    WalkBack {
        call: PendingCall,
        origin_cycle: u64,
    },
    /// Catch a return from kernel after the kernel read watched data.
    KernelReturn(Address),
}

/// Result of [`WatchSession::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Execution halted at cycle.
    Halted { cycle: u64 },
    /// Engine has nothing left to execute.
    Exhausted,
}

/// Watch session builder.
pub struct WatchSessionBuilder {
    config: WatchConfig,
    recorder: Option<Box<dyn ProvenanceRecorder>>,
    stack_trace: Option<Box<dyn StackTraceSource>>,
    functions: Option<Box<dyn FunctionResolver>>,
    relocatables: Relocatables,
    user_iterators: UserIterators,
}

impl Default for WatchSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchSessionBuilder {
    pub fn new() -> Self {
        Self {
            config: WatchConfig::default(),
            recorder: None,
            stack_trace: None,
            functions: None,
            relocatables: Relocatables::default(),
            user_iterators: UserIterators::default(),
        }
    }

    pub fn with_config(self, config: WatchConfig) -> Self {
        Self { config, ..self }
    }

    /// Set a sink for provenance marks, [`MarkLog`] by default.
    pub fn with_recorder(self, recorder: impl ProvenanceRecorder + 'static) -> Self {
        Self {
            recorder: Some(Box::new(recorder)),
            ..self
        }
    }

    pub fn with_stack_trace(self, stack_trace: impl StackTraceSource + 'static) -> Self {
        Self {
            stack_trace: Some(Box::new(stack_trace)),
            ..self
        }
    }

    pub fn with_function_resolver(self, functions: impl FunctionResolver + 'static) -> Self {
        Self {
            functions: Some(Box::new(functions)),
            ..self
        }
    }

    pub fn with_relocatables(self, relocatables: Relocatables) -> Self {
        Self {
            relocatables,
            ..self
        }
    }

    pub fn with_user_iterators(self, user_iterators: UserIterators) -> Self {
        Self {
            user_iterators,
            ..self
        }
    }

    pub fn build(self) -> WatchSession {
        debug!(
            target: "watch",
            "new session, backstop cycles {}",
            self.config.backstop_cycles
        );
        WatchSession {
            config: self.config,
            ranges: WatchSet::default(),
            lifecycle: BreakpointLifecycle::default(),
            use_backstop: false,
            prev_cycle: None,
            recorder: self
                .recorder
                .unwrap_or_else(|| Box::<MarkLog>::default()),
            stack_trace: self
                .stack_trace
                .unwrap_or_else(|| Box::new(NoAttribution)),
            functions: self.functions,
            relocatables: self.relocatables,
            user_iterators: self.user_iterators,
            deferred: VecDeque::new(),
            stop_action: None,
            continue_requested: false,
        }
    }
}

/// State of a single watch session against an execution engine.
pub struct WatchSession {
    config: WatchConfig,
    ranges: WatchSet,
    lifecycle: BreakpointLifecycle,
    /// Backstop stays off until the first range is set, otherwise session setup
    /// (accept followed by writes) would trigger it.
    use_backstop: bool,
    /// Cycle of the last classified access.
    prev_cycle: Option<u64>,
    recorder: Box<dyn ProvenanceRecorder>,
    stack_trace: Box<dyn StackTraceSource>,
    functions: Option<Box<dyn FunctionResolver>>,
    relocatables: Relocatables,
    user_iterators: UserIterators,
    deferred: VecDeque<Deferred>,
    /// Actions for the next intentional halt.
    stop_action: Option<StopAction<WatchSession>>,
    /// Execution must go on after current halt.
    continue_requested: bool,
}

impl WatchSession {
    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Watched ranges, including inactive ones.
    pub fn ranges(&self) -> &WatchSet {
        &self.ranges
    }

    pub fn watch_marks(&self) -> &dyn ProvenanceRecorder {
        self.recorder.as_ref()
    }

    pub fn is_armed(&self) -> bool {
        self.lifecycle.is_armed()
    }

    pub fn backstop_enabled(&self) -> bool {
        self.use_backstop
    }

    /// Cycle at which the armed backstop fires, if armed.
    pub fn backstop_target(&self) -> Option<u64> {
        self.lifecycle.backstop().target_cycle()
    }

    pub fn would_break_simulation(&self) -> bool {
        self.config.break_simulation
    }

    /// Add a range to watch.
    ///
    /// # Arguments
    ///
    /// * `engine`: execution engine
    /// * `start`: first byte of a range
    /// * `length`: range length in bytes
    /// * `back_stop`: enable the backstop for this session (it never gets disabled again)
    pub fn set_range(
        &mut self,
        engine: &mut dyn Engine,
        start: Address,
        length: u64,
        back_stop: bool,
    ) -> Insertion {
        debug!(target: "watch", "set range start {start} length {length:#x}");
        if back_stop && !self.use_backstop {
            self.use_backstop = true;
        }

        let insertion = self.ranges.set_range(start, length, engine.cycles());
        if let Some(idx) = insertion.changed_index() {
            weak_error!(
                self.lifecycle.reissue(&mut self.ranges, engine, idx),
                "breakpoint for changed range:"
            );
            self.lifecycle.release_inactive(&mut self.ranges, engine);
        }
        insertion
    }

    /// Record a free-form note (e.g. the input call that filled a buffer).
    ///
    /// # Arguments
    ///
    /// * `msg`: note text
    /// * `max_len`: truncate note to this number of chars
    pub fn mark_call(&mut self, engine: &dyn Engine, msg: &str, max_len: Option<usize>) -> usize {
        let msg = match max_len {
            Some(max) => msg.chars().take(max).collect(),
            None => msg.to_string(),
        };
        self.record(engine, WatchMark::Call { msg })
    }

    /// Note that a file descriptor is closed.
    pub fn close(&mut self, engine: &dyn Engine, fd: i32) -> usize {
        self.mark_call(engine, &format!("closed FD: {fd}"), None)
    }

    /// Arm breakpoints on every watched range.
    ///
    /// # Arguments
    ///
    /// * `show_cmp`: log compare instruction operands at every access
    /// * `break_simulation`: halt on first access, previous mode is kept if `None`
    ///
    /// Return `false` if there is nothing to watch.
    pub fn watch(
        &mut self,
        engine: &mut dyn Engine,
        show_cmp: bool,
        break_simulation: Option<bool>,
    ) -> Result<bool, Error> {
        debug!(target: "watch", "watch show_cmp: {show_cmp}");
        self.config.show_cmp = show_cmp;
        if let Some(break_simulation) = break_simulation {
            self.config.break_simulation = break_simulation;
        }
        self.prev_cycle = None;
        self.arm(engine)
    }

    fn arm(&mut self, engine: &mut dyn Engine) -> Result<bool, Error> {
        if self.ranges.active().next().is_none() {
            return Ok(false);
        }
        let backstop = (!self.config.break_simulation && self.use_backstop)
            .then_some(self.config.backstop_cycles);
        self.lifecycle.arm(&mut self.ranges, engine, backstop)?;
        Ok(true)
    }

    /// Re-arm after an access was handled, session keeps going on errors.
    fn rearm(&mut self, engine: &mut dyn Engine) {
        weak_error!(self.arm(engine), "re-arm watch:");
    }

    /// Release every breakpoint and the backstop.
    pub fn stop_watch(&mut self, engine: &mut dyn Engine, break_simulation: Option<bool>) {
        debug!(target: "watch", "stop watch");
        self.lifecycle.disarm(&mut self.ranges, engine);
        if let Some(break_simulation) = break_simulation {
            self.config.break_simulation = break_simulation;
        }
    }

    /// Start of the first active range containing an address.
    pub fn find_range(&self, addr: Address) -> Option<Address> {
        self.ranges.find_range(addr)
    }

    /// Stop watching and forget ranges.
    ///
    /// # Arguments
    ///
    /// * `cycle`: if set, only ranges created after this cycle are forgotten
    pub fn clear_watches(&mut self, engine: &mut dyn Engine, cycle: Option<u64>) {
        debug!(target: "watch", "clear watches");
        self.stop_watch(engine, Some(true));
        self.prev_cycle = None;
        match cycle {
            None => self.ranges.clear_all(),
            Some(cycle) => self.ranges.clear_since(cycle),
        }
    }

    /// Set what the backstop calls once it halts execution.
    pub fn set_callback(&mut self, callback: BackstopCallback) {
        self.lifecycle.backstop_mut().set_callback(callback);
    }

    pub fn toggle_show_cmp(&mut self) -> bool {
        self.config.show_cmp = !self.config.show_cmp;
        self.config.show_cmp
    }

    pub fn set_function_resolver(&mut self, functions: impl FunctionResolver + 'static) {
        self.functions = Some(Box::new(functions));
    }

    pub fn set_relocatables(&mut self, relocatables: Relocatables) {
        self.relocatables = relocatables;
    }

    pub fn set_user_iterators(&mut self, user_iterators: UserIterators) {
        self.user_iterators = user_iterators;
    }

    pub fn user_iterators(&self) -> &UserIterators {
        &self.user_iterators
    }

    /// Move execution to the cycle of a mark.
    pub fn go_to_mark(&mut self, engine: &mut dyn Engine, index: usize) -> Result<u64, Error> {
        let cycle = self
            .recorder
            .get(index)
            .ok_or(Error::MarkNotFound(index))?
            .origin
            .cycle;
        engine.skip_to(cycle)?;
        // accesses are replayed from here on
        self.prev_cycle = None;
        Ok(cycle)
    }

    pub fn clear_watch_marks(&mut self) {
        self.recorder.clear();
    }

    /// Treat a function containing the instruction of a mark as an iterator over watched data.
    /// Return entry address of the tagged function.
    pub fn tag_iterator(&mut self, index: usize) -> Result<Address, Error> {
        let functions = self.functions.as_ref().ok_or(Error::NoFunctionInfo)?;
        let ip = self
            .recorder
            .get(index)
            .ok_or(Error::MarkNotFound(index))?
            .origin
            .ip;
        let function = functions
            .function_containing(ip)
            .ok_or(Error::FunctionNotFound(ip))?;
        self.user_iterators.add(function);
        debug!(target: "watch", "added iterator for function {function}");
        Ok(function)
    }

    /// Tear down the session: release breakpoints and make a lingering backstop harmless.
    pub fn shutdown(&mut self, engine: &mut dyn Engine) {
        self.stop_watch(engine, None);
        self.lifecycle.backstop_mut().detach();
        self.deferred.clear();
        self.stop_action = None;
    }

    fn record(&mut self, engine: &dyn Engine, mark: WatchMark) -> usize {
        let origin = MarkOrigin {
            cycle: engine.cycles(),
            ip: engine.pc().unwrap_or_default(),
        };
        self.record_at(origin, mark)
    }

    fn record_at(&mut self, origin: MarkOrigin, mark: WatchMark) -> usize {
        self.recorder.record(RecordedMark { origin, mark })
    }

    /// Drive execution until it halts or nothing is left to execute.
    /// Every stop reported by the engine is dispatched, deferred work is done after each
    /// dispatch and stop actions run exactly once per halt.
    pub fn run(&mut self, engine: &mut dyn Engine) -> Result<RunOutcome, Error> {
        loop {
            let reason = engine.resume()?;
            let exhausted = reason == StopReason::Exhausted;
            self.dispatch(engine, reason);
            self.run_deferred(engine);

            if engine.is_halted() {
                self.on_simulation_stopped(engine);
                if std::mem::take(&mut self.continue_requested) {
                    continue;
                }
                return Ok(RunOutcome::Halted {
                    cycle: engine.cycles(),
                });
            }
            if exhausted {
                return Ok(RunOutcome::Exhausted);
            }
        }
    }

    /// Dispatch a single stop reported by the engine.
    pub fn dispatch(&mut self, engine: &mut dyn Engine, reason: StopReason) {
        match reason {
            StopReason::MemoryAccess(handle, access) => {
                self.on_memory_access(engine, handle, access)
            }
            StopReason::Execute(handle, _) => self.on_execute(engine, handle),
            StopReason::CycleEvent(event) => self.on_cycle_event(engine, event),
            StopReason::Exhausted => {
                debug!(target: "watch", "execution exhausted at cycle {:#x}", engine.cycles())
            }
        }
    }

    fn on_execute(&mut self, engine: &mut dyn Engine, handle: BreakpointHandle) {
        match self.lifecycle.take_return_break(engine, handle) {
            Some(ReturnTarget::MemCall(call)) => self.on_mem_call_return(engine, call),
            Some(ReturnTarget::Kernel(addr)) => self.on_kernel_return(engine, addr),
            None => debug!(target: "watch", "breakpoint {handle} is not armed, ignore"),
        }
    }

    fn on_cycle_event(&mut self, engine: &mut dyn Engine, event: CycleEventId) {
        if self.lifecycle.backstop_mut().fire(engine, event) == BackstopFire::Halted {
            debug!(target: "watch", "backstop halted execution at {:#x}", engine.cycles());
        }
    }

    /// Run actions of an intentional halt, if any.
    pub fn on_simulation_stopped(&mut self, engine: &mut dyn Engine) {
        if let Some(action) = self.stop_action.take() {
            debug!(target: "watch", "halted, run {} stop functions", action.len());
            action.run(self, false);
        }
        self.run_deferred(engine);
    }

    /// Execute deferred work in order.
    pub fn run_deferred(&mut self, engine: &mut dyn Engine) {
        while let Some(work) = self.deferred.pop_front() {
            match work {
                Deferred::SetStopAction { origin } => self.set_stop_action(origin),
                Deferred::HandleMemCall(call) => self.handle_mem_call(engine, call),
                Deferred::WalkBack { call, origin_cycle } => {
                    self.walk_back(engine, call, origin_cycle)
                }
                Deferred::KernelReturn(addr) => self.kernel_return(engine, addr),
            }
        }
    }

    fn defer(&mut self, work: Deferred) {
        self.deferred.push_back(work);
    }

    fn set_stop_action(&mut self, origin: MarkOrigin) {
        let notify = weak_error!(stop::StopFunction::direct(
            |session: &mut WatchSession, args: &[u64]| {
                let origin = MarkOrigin {
                    cycle: args[0],
                    ip: Address::from(args[1]),
                };
                session.recorder.on_halt(origin);
            },
            &[origin.cycle, origin.ip.as_u64()],
        ));
        match notify {
            Some(f) => self.stop_action = Some(StopAction::new(vec![f.with_match_pid()])),
            None => error!(target: "watch", "failed to build stop actions"),
        }
    }
}
