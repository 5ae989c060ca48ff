use crate::watch::address::Address;
use crate::watch::backstop::BackstopTimer;
use crate::watch::engine::Engine;
use crate::watch::error::Error;
use crate::watch::range::WatchSet;
use crate::watch::recovery::PendingCall;
use crate::weak_error;
use log::{debug, error};
use std::fmt::{Display, Formatter};

/// Engine breakpoint registration number.
#[derive(Clone, Copy, Hash, PartialEq, Eq, Debug)]
pub struct BreakpointHandle(pub u32);

impl Display for BreakpointHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Condition for activating a breakpoint.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BreakAccess {
    Execute,
    Read,
    Write,
    ReadWrite,
}

impl BreakAccess {
    pub fn on_load(self) -> bool {
        matches!(self, BreakAccess::Read | BreakAccess::ReadWrite)
    }

    pub fn on_store(self) -> bool {
        matches!(self, BreakAccess::Write | BreakAccess::ReadWrite)
    }
}

/// What a one-shot execution breakpoint waits for.
#[derive(Debug, Clone, PartialEq)]
pub enum ReturnTarget {
    /// Return from a bulk-memory function with recovered arguments.
    MemCall(PendingCall),
    /// Return from kernel after the kernel read watched data at address.
    Kernel(Address),
}

#[derive(Debug)]
struct ReturnBreakpoint {
    handle: BreakpointHandle,
    address: Address,
    target: ReturnTarget,
}

/// Arms and disarms engine breakpoints for a watch set.
///
/// Every active range gets its own read/write breakpoint, the handle is kept inline in the range.
/// At most one one-shot return breakpoint exists at a time.
#[derive(Default)]
pub struct BreakpointLifecycle {
    armed: bool,
    return_break: Option<ReturnBreakpoint>,
    backstop: BackstopTimer,
}

impl BreakpointLifecycle {
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn backstop(&self) -> &BackstopTimer {
        &self.backstop
    }

    pub fn backstop_mut(&mut self) -> &mut BackstopTimer {
        &mut self.backstop
    }

    /// Register a read/write breakpoint for every active range and arm the backstop
    /// if `backstop_cycles` is set. Breakpoints held from a previous arm are released first.
    ///
    /// Return number of registered breakpoints.
    pub fn arm(
        &mut self,
        ranges: &mut WatchSet,
        engine: &mut dyn Engine,
        backstop_cycles: Option<u64>,
    ) -> Result<usize, Error> {
        self.release_ranges(ranges, engine);

        let mut count = 0;
        for (idx, range) in ranges.all_mut().iter_mut().enumerate() {
            if !range.is_active() {
                debug!(target: "watch", "range at index {idx} is inactive");
                continue;
            }
            let handle = engine.add_breakpoint(BreakAccess::ReadWrite, range.start, range.length)?;
            debug!(
                target: "watch",
                "breakpoint {handle} for {}-{} length {:#x} index {idx}",
                range.start,
                range.end(),
                range.length
            );
            range.handle = Some(handle);
            count += 1;
        }
        self.armed = true;

        if let Some(cycles) = backstop_cycles {
            self.backstop.arm(engine, cycles)?;
        }
        Ok(count)
    }

    /// Register a new breakpoint for a range whose bounds changed while armed.
    pub fn reissue(
        &mut self,
        ranges: &mut WatchSet,
        engine: &mut dyn Engine,
        idx: usize,
    ) -> Result<(), Error> {
        if !self.armed {
            return Ok(());
        }
        let Some(range) = ranges.get_mut(idx) else {
            error!(target: "watch", "reissue breakpoint: invalid range index {idx}");
            return Ok(());
        };
        if let Some(old) = range.handle.take() {
            weak_error!(engine.remove_breakpoint(old), "release breakpoint:");
        }
        if range.is_active() {
            range.handle =
                Some(engine.add_breakpoint(BreakAccess::ReadWrite, range.start, range.length)?);
        }
        Ok(())
    }

    /// Release breakpoints still held by ranges that were consumed or absorbed.
    pub fn release_inactive(&mut self, ranges: &mut WatchSet, engine: &mut dyn Engine) {
        for range in ranges.all_mut().iter_mut().filter(|r| !r.is_active()) {
            if let Some(handle) = range.handle.take() {
                debug!(target: "watch", "release breakpoint {handle} of inactive range");
                weak_error!(engine.remove_breakpoint(handle), "release breakpoint:");
            }
        }
    }

    /// Release every breakpoint, including a return one, and cancel the backstop.
    /// Idempotent.
    pub fn disarm(&mut self, ranges: &mut WatchSet, engine: &mut dyn Engine) {
        self.release_ranges(ranges, engine);
        self.clear_return_break(engine);
        self.backstop.cancel(engine);
        self.armed = false;
    }

    fn release_ranges(&mut self, ranges: &mut WatchSet, engine: &mut dyn Engine) {
        for range in ranges.all_mut() {
            if let Some(handle) = range.handle.take() {
                weak_error!(engine.remove_breakpoint(handle), "release breakpoint:");
            }
        }
    }

    /// Arm one-shot execution breakpoint, replacing existing one.
    pub fn set_return_break(
        &mut self,
        engine: &mut dyn Engine,
        address: Address,
        target: ReturnTarget,
    ) -> Result<(), Error> {
        self.clear_return_break(engine);
        let handle = engine.add_breakpoint(BreakAccess::Execute, address, 1)?;
        debug!(target: "watch", "return breakpoint {handle} at {address}");
        self.return_break = Some(ReturnBreakpoint {
            handle,
            address,
            target,
        });
        Ok(())
    }

    /// Take target of a hit return breakpoint and release it.
    /// Return `None` if handle is not a current return breakpoint.
    pub fn take_return_break(
        &mut self,
        engine: &mut dyn Engine,
        handle: BreakpointHandle,
    ) -> Option<ReturnTarget> {
        if self.return_break.as_ref().map(|rb| rb.handle) != Some(handle) {
            return None;
        }
        let rb = self.return_break.take()?;
        debug!(target: "watch", "return breakpoint {} at {} reached", rb.handle, rb.address);
        weak_error!(engine.remove_breakpoint(rb.handle), "release return breakpoint:");
        Some(rb.target)
    }

    pub fn has_return_break(&self) -> bool {
        self.return_break.is_some()
    }

    pub fn clear_return_break(&mut self, engine: &mut dyn Engine) {
        if let Some(rb) = self.return_break.take() {
            weak_error!(engine.remove_breakpoint(rb.handle), "release return breakpoint:");
        }
    }
}
