//! Classification of accesses to watched memory.

use crate::watch::address::Address;
use crate::watch::breakpoint::BreakpointHandle;
use crate::watch::decode;
use crate::watch::engine::{AccessKind, Engine, MemoryAccess, Privilege};
use crate::watch::mark::{MarkOrigin, WatchMark};
use crate::watch::oracle::Attribution;
use crate::watch::recovery::PendingCall;
use crate::watch::{Deferred, WatchSession};
use crate::{muted_error, weak_error};
use log::{debug, error, info};

/// How many instructions after a read are looked through for a compare.
const CMP_LOOKAHEAD: usize = 10;

impl WatchSession {
    /// Handle a read/write breakpoint hit.
    ///
    /// Accesses by bulk-memory library functions are handed to parameter recovery,
    /// others are recorded as data read/write marks. In stop-on-access mode a recorded
    /// access halts execution, a followed call halts at its return.
    pub(super) fn on_memory_access(
        &mut self,
        engine: &mut dyn Engine,
        handle: BreakpointHandle,
        access: MemoryAccess,
    ) {
        let cycle = engine.cycles();
        // one instruction may touch a range several times
        if self.prev_cycle == Some(cycle) {
            debug!(target: "watch", "access at {} in same cycle {cycle:#x}, skip", access.address);
            return;
        }
        if !self.lifecycle.is_armed() {
            debug!(target: "watch", "access at {} while disarmed, skip", access.address);
            return;
        }
        self.prev_cycle = Some(cycle);

        if !self.config.break_simulation && self.use_backstop {
            let cycles = self.config.backstop_cycles;
            weak_error!(self.lifecycle.backstop_mut().arm(engine, cycles), "backstop:");
        }

        let Some(idx) = self.ranges.position_by_handle(handle) else {
            error!(target: "watch", "breakpoint {handle} does not belong to a watched range");
            return;
        };
        let Some(pc) = weak_error!(engine.pc(), "access pc:") else {
            return;
        };
        let (start, length) = match self.ranges.get(idx) {
            Some(range) => (range.start, range.length),
            None => return,
        };
        let origin = MarkOrigin { cycle, ip: pc };

        if self.config.show_cmp {
            self.show_cmp(engine, access.address);
        }

        if self.config.break_simulation {
            self.stop_watch(engine, None);
        }

        let privilege = engine.privilege();
        if privilege == Privilege::User && !engine.text_segment().contains(pc) {
            // library code, a stack trace itself must not hit the watch
            if !self.config.break_simulation {
                self.stop_watch(engine, None);
            }
            match self.stack_trace.attribute(engine) {
                Attribution::NoStackTrace => {
                    debug!(target: "watch", "no stack trace at {pc}, wrong process?");
                    self.rearm(engine);
                    return;
                }
                Attribution::MemFunction(site) => {
                    debug!(
                        target: "watch",
                        "access at {} by {} returning to {}",
                        access.address,
                        site.function,
                        site.return_address
                    );
                    let call = PendingCall::new(site.function, site.return_address, access.address);
                    self.defer(Deferred::HandleMemCall(call));
                    return;
                }
                // halting below in stop-on-access mode
                Attribution::NotMemFunction if self.config.break_simulation => {}
                Attribution::NotMemFunction => self.rearm(engine),
            }
        }

        let offset = access.address.distance_from(start).unwrap_or_default();
        match access.kind {
            AccessKind::Load => {
                let cmp = self.find_cmp(engine, pc);
                info!(
                    target: "watch",
                    "read from {} offset {offset:#x} into {start} (length {length:#x}) {cmp}",
                    access.address
                );
                self.record_at(
                    origin,
                    WatchMark::DataRead {
                        addr: access.address,
                        start,
                        length,
                        cmp,
                    },
                );
                if self.config.break_simulation {
                    self.defer(Deferred::SetStopAction { origin });
                    engine.halt("DataWatch read data");
                }
                if privilege == Privilege::Kernel {
                    if !self.config.break_simulation {
                        self.stop_watch(engine, None);
                    }
                    self.defer(Deferred::KernelReturn(access.address));
                }
            }
            AccessKind::Store if privilege == Privilege::User => {
                info!(
                    target: "watch",
                    "write to {} offset {offset:#x} into {start} (length {length:#x})",
                    access.address
                );
                self.record_at(
                    origin,
                    WatchMark::DataWrite {
                        addr: access.address,
                        start,
                        length,
                    },
                );
                if self.config.break_simulation {
                    self.ranges.deactivate(idx);
                    self.defer(Deferred::SetStopAction { origin });
                    engine.halt("DataWatch written data");
                }
            }
            AccessKind::Store => {
                debug!(target: "watch", "kernel write to {}, ignore", access.address);
                if self.config.break_simulation {
                    self.rearm(engine);
                }
            }
        }
    }

    /// Return text of the first compare instruction near `pc`, empty if none.
    fn find_cmp(&self, engine: &dyn Engine, pc: Address) -> String {
        let mut addr = pc;
        for _ in 0..CMP_LOOKAHEAD {
            let Some(instruction) = muted_error!(engine.disassemble(addr)) else {
                break;
            };
            if decode::is_cmp(&instruction.text) {
                return instruction.text;
            }
            addr = addr.add(instruction.length.max(1));
        }
        String::new()
    }

    /// Log operands of a compare instruction at the current pc.
    fn show_cmp(&self, engine: &dyn Engine, addr: Address) {
        let Some(pc) = muted_error!(engine.pc()) else {
            return;
        };
        let Some(instruction) = muted_error!(engine.disassemble(pc)) else {
            return;
        };
        if !decode::is_cmp(&instruction.text) {
            return;
        }
        let Some((first, second)) = decode::operands(&instruction.text) else {
            return;
        };
        let reg_value = [first, second]
            .into_iter()
            .find_map(decode::as_register)
            .and_then(|reg| engine.register(reg).ok());
        let mem_value = muted_error!(engine.read_u32(addr));
        info!(
            target: "watch",
            "{pc} {}  register: {} memory: {}",
            instruction.text,
            reg_value.map_or_else(|| "?".to_string(), |v| format!("{v:#x}")),
            mem_value.map_or_else(|| "?".to_string(), |v| format!("{v:#x}")),
        );
    }
}
