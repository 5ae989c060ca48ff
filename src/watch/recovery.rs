//! Parameter recovery for bulk-memory library functions.
//!
//! When a watched range is touched inside memcpy-like routine, arguments of the call
//! (destination, source, count) are recovered either from the current registers
//! (string routines, still at entry) or by stepping execution back to the call instruction.
//! A one-shot breakpoint at the return address then finishes the job: copies become
//! new watched ranges and every routine leaves a provenance mark.

use crate::watch::address::Address;
use crate::watch::breakpoint::ReturnTarget;
use crate::watch::decode;
use crate::watch::engine::Engine;
use crate::watch::error::Error;
use crate::watch::mark::{MarkOrigin, WatchMark};
use crate::watch::oracle::MemFunction;
use crate::watch::register::Arch;
use crate::watch::stop::{StopAction, StopFunction};
use crate::watch::{Deferred, WatchSession};
use crate::weak_error;
use log::{debug, error, info, warn};

/// Maximum number of backward steps in search of a call site.
pub const MAX_WALK_STEPS: usize = 50;

/// Halt reason when a followed call returns in stop-on-access mode.
pub const CALL_RETURN_HALT_REASON: &str = "DataWatch call returned";

/// Strings longer than this are cut.
const MAX_STRLEN: u64 = 1 << 20;

/// Bulk-memory function call with arguments recovered so far.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCall {
    pub function: MemFunction,
    pub return_address: Address,
    /// Watched address the function accessed, replaced by a source argument if recovered.
    pub source: Option<Address>,
    pub destination: Option<Address>,
    pub count: Option<u64>,
}

impl PendingCall {
    pub fn new(function: MemFunction, return_address: Address, accessed: Address) -> Self {
        Self {
            function,
            return_address,
            source: Some(accessed),
            destination: None,
            count: None,
        }
    }
}

/// Call instruction found by a backward walk.
#[derive(Debug, Clone, PartialEq)]
pub struct CallSite {
    pub cycle: u64,
    pub address: Address,
    pub target: Address,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WalkResult {
    Found(CallSite),
    /// Bound exhausted (or cycle zero reached) without a matching call.
    NotFound,
}

/// Length of a NUL-terminated string at address.
pub fn strlen(engine: &dyn Engine, addr: Address) -> Result<u64, Error> {
    let mut len = 0;
    while len < MAX_STRLEN && engine.read_u8(addr.add(len))? != 0 {
        len += 1;
    }
    Ok(len)
}

fn argument(engine: &dyn Engine, arch: Arch, n: usize) -> Result<u64, Error> {
    let register = arch
        .argument_register(n)
        .ok_or(Error::RecoveryUnsupported(arch))?;
    engine.register(register)
}

impl WatchSession {
    /// Start recovering arguments of a call accessing watched memory.
    /// Session falls back to plain watching on any failure.
    pub(super) fn handle_mem_call(&mut self, engine: &mut dyn Engine, call: PendingCall) {
        if weak_error!(self.try_handle_mem_call(engine, call), "parameter recovery:").is_none() {
            self.rearm(engine);
        }
    }

    fn try_handle_mem_call(
        &mut self,
        engine: &mut dyn Engine,
        mut call: PendingCall,
    ) -> Result<(), Error> {
        let arch = engine.arch();
        if !arch.supports_recovery() {
            return Err(Error::RecoveryUnsupported(arch));
        }

        match call.function {
            MemFunction::Strcpy => {
                let dest = argument(engine, arch, 0)?;
                call.destination = Some(dest.into());
                let src = call.source.unwrap_or_default();
                call.count = Some(strlen(engine, src)?);
                self.run_to_return(engine, call)
            }
            MemFunction::Strcmp => {
                call.destination = Some(argument(engine, arch, 0)?.into());
                let src = Address::from(argument(engine, arch, 1)?);
                call.source = Some(src);
                call.count = Some(strlen(engine, src)?);
                self.run_to_return(engine, call)
            }
            MemFunction::Other(_) => self.run_to_return(engine, call),
            MemFunction::Memcpy
            | MemFunction::Memmove
            | MemFunction::Mempcpy
            | MemFunction::Memset
            | MemFunction::Memcmp => {
                // arguments are long gone from registers, time travel is allowed only
                // while execution is halted
                let origin_cycle = engine.cycles();
                let walk = StopFunction::direct(
                    move |session: &mut WatchSession, _: &[u64]| {
                        session.defer(Deferred::WalkBack { call, origin_cycle })
                    },
                    &[],
                )?;
                self.stop_action = Some(StopAction::new(vec![walk]));
                engine.halt("handle memstuff");
                Ok(())
            }
            MemFunction::Strlen | MemFunction::Strchr => {
                info!(target: "recovery", "no handler for {}, keep watching", call.function);
                self.rearm(engine);
                Ok(())
            }
        }
    }

    /// Let a function finish, the rest is done at its return address.
    fn run_to_return(&mut self, engine: &mut dyn Engine, call: PendingCall) -> Result<(), Error> {
        debug!(
            target: "recovery",
            "run {} to return at {}",
            call.function,
            call.return_address
        );
        let address = call.return_address;
        self.lifecycle
            .set_return_break(engine, address, ReturnTarget::MemCall(call))
    }

    /// Step back from a halted access to the call instruction of a function,
    /// read its arguments there and let execution run to the return address.
    pub(super) fn walk_back(&mut self, engine: &mut dyn Engine, call: PendingCall, origin_cycle: u64) {
        self.continue_requested = true;

        let Some(pc) = weak_error!(engine.pc(), "walk back:") else {
            self.rearm(engine);
            return;
        };
        let enclosing = match self.functions.as_ref() {
            Some(functions) => functions.function_containing(pc),
            None => {
                warn!(
                    target: "recovery",
                    "no function information, can't find call of {}",
                    call.function
                );
                self.rearm(engine);
                return;
            }
        };

        let result = match self.find_call_site(engine, enclosing) {
            Ok(result) => result,
            Err(e) => {
                warn!(target: "recovery", "walk back: {e:#}");
                WalkResult::NotFound
            }
        };

        match result {
            WalkResult::Found(site) => {
                debug!(
                    target: "recovery",
                    "call of {} found at {} cycle {:#x}",
                    call.function,
                    site.address,
                    site.cycle
                );
                let recovered = self
                    .read_call_arguments(engine, call)
                    .and_then(|call| self.run_to_return(engine, call));
                if weak_error!(recovered, "recover arguments:").is_none() {
                    weak_error!(engine.skip_to(origin_cycle), "return to access:");
                    self.rearm(engine);
                }
            }
            WalkResult::NotFound => {
                warn!(
                    target: "recovery",
                    "call of {} not found within {MAX_WALK_STEPS} steps",
                    call.function
                );
                weak_error!(engine.skip_to(origin_cycle), "return to access:");
                self.rearm(engine);
            }
        }
    }

    /// Step back one cycle at a time looking for a call into `enclosing` function,
    /// a relocated thunk or a user iterator.
    pub fn find_call_site(
        &self,
        engine: &mut dyn Engine,
        enclosing: Option<Address>,
    ) -> Result<WalkResult, Error> {
        let arch = engine.arch();
        for _ in 0..MAX_WALK_STEPS {
            let Some(prev) = engine.cycles().checked_sub(1) else {
                return Ok(WalkResult::NotFound);
            };
            match engine.skip_to(prev) {
                // start of recorded execution
                Err(Error::CycleOutOfRange(_)) => return Ok(WalkResult::NotFound),
                res => res?,
            }
            let pc = engine.pc()?;
            let instruction = engine.disassemble(pc)?;
            if !decode::is_call(arch, &instruction.text) {
                continue;
            }
            let Some(target) = decode::call_target(&instruction.text) else {
                continue;
            };
            if Some(target) == enclosing
                || self.relocatables.contains_key(&target)
                || self.user_iterators.is_iterator(target)
            {
                return Ok(WalkResult::Found(CallSite {
                    cycle: prev,
                    address: pc,
                    target,
                }));
            }
        }
        Ok(WalkResult::NotFound)
    }

    fn read_call_arguments(
        &self,
        engine: &dyn Engine,
        mut call: PendingCall,
    ) -> Result<PendingCall, Error> {
        let arch = engine.arch();
        match call.function {
            MemFunction::Memcpy | MemFunction::Memmove | MemFunction::Mempcpy => {
                call.destination = Some(argument(engine, arch, 0)?.into());
                call.count = Some(argument(engine, arch, 2)?);
            }
            MemFunction::Memset => {
                call.destination = Some(argument(engine, arch, 0)?.into());
                call.source = None;
            }
            MemFunction::Memcmp => {
                call.source = Some(argument(engine, arch, 0)?.into());
                call.destination = Some(argument(engine, arch, 1)?.into());
                call.count = Some(argument(engine, arch, 2)?);
            }
            _ => {}
        }
        Ok(call)
    }

    /// Finish a bulk-memory call at its return address.
    pub(super) fn on_mem_call_return(&mut self, engine: &mut dyn Engine, call: PendingCall) {
        let src = call.source.unwrap_or_default();
        let dest = call.destination.unwrap_or_default();
        match &call.function {
            f if f.is_copy() => match call.count {
                Some(count) if !dest.is_null() => {
                    debug!(target: "recovery", "{f} copied {count:#x} bytes from {src} to {dest}");
                    self.set_range(engine, dest, count, true);
                    let buf_start = self.ranges.find_range(src);
                    if buf_start.is_none() {
                        error!(target: "recovery", "{f} source {src} is not in a watched range");
                    }
                    self.record(
                        engine,
                        WatchMark::Copy {
                            src,
                            dest,
                            count,
                            buf_start,
                        },
                    );
                }
                _ => error!(target: "recovery", "{f} returned without recovered destination"),
            },
            f if f.is_compare() => {
                // either operand may be the watched one
                let buf_start = self
                    .ranges
                    .find_range(dest)
                    .or_else(|| self.ranges.find_range(src));
                self.record(
                    engine,
                    WatchMark::Compare {
                        dest,
                        src,
                        count: call.count.unwrap_or_default(),
                        buf_start,
                    },
                );
            }
            MemFunction::Memset => {
                let buf_start = self.ranges.find_range(dest);
                self.record(
                    engine,
                    WatchMark::Fill {
                        dest,
                        count: call.count,
                        buf_start,
                    },
                );
            }
            MemFunction::Other(name) => {
                let buf_start = self.ranges.find_range(src);
                self.record(
                    engine,
                    WatchMark::Iterator {
                        function: name.clone(),
                        src,
                        buf_start,
                    },
                );
            }
            f => error!(target: "recovery", "no return handler for {f}"),
        }

        if self.config.break_simulation {
            let origin = MarkOrigin {
                cycle: engine.cycles(),
                ip: engine.pc().unwrap_or_default(),
            };
            self.defer(Deferred::SetStopAction { origin });
            engine.halt(CALL_RETURN_HALT_REASON);
        } else {
            self.rearm(engine);
        }
    }

    /// Catch the return from kernel after the kernel read watched data.
    pub(super) fn kernel_return(&mut self, engine: &mut dyn Engine, addr: Address) {
        let arch = engine.arch();
        let ret = match (arch, self.config.kernel_return) {
            (Arch::Arm, Some(ret)) => ret,
            _ => {
                debug!(target: "recovery", "kernel return not tracked on {arch}, keep watching");
                self.rearm(engine);
                return;
            }
        };
        let armed = self
            .lifecycle
            .set_return_break(engine, ret, ReturnTarget::Kernel(addr));
        if weak_error!(armed, "kernel return breakpoint:").is_none() {
            self.rearm(engine);
        }
    }

    pub(super) fn on_kernel_return(&mut self, engine: &mut dyn Engine, addr: Address) {
        let register = engine.arch().syscall_ret_register();
        if let Some(value) = weak_error!(engine.register(register), "kernel return value:") {
            debug!(target: "recovery", "kernel read {addr}, returned {value:#x}");
            self.record(engine, WatchMark::KernelReturn { addr, value });
        }
        self.rearm(engine);
    }
}
