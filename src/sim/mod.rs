//! Deterministic execution engine replaying a recorded instruction trace.
//!
//! Every step of a [`Scenario`] is one cycle. Entering a step delivers, in order,
//! execution breakpoint hits, memory access hits and due cycle events. Execution may be
//! moved to any recorded cycle with [`Engine::skip_to`]; stepping then goes on from there.

pub mod scenario;
pub mod symbols;

use crate::sim::scenario::{Scenario, Step};
use crate::sim::symbols::FunctionTable;
use crate::watch::address::{Address, AddressRange};
use crate::watch::breakpoint::{BreakAccess, BreakpointHandle};
use crate::watch::engine::{
    AccessKind, CycleEventId, Engine, Instruction, Privilege, StopReason,
};
use crate::watch::error::Error;
use crate::watch::oracle::Relocatables;
use crate::watch::register::{Arch, Register, RegisterMap};
use crate::{dw_debug, dw_info};
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy)]
struct Breakpoint {
    access: BreakAccess,
    start: Address,
    length: u64,
}

impl Breakpoint {
    fn hit_by(&self, addr: Address, size: u64) -> bool {
        let end = self.start.add(self.length);
        addr < end && addr.add(size.max(1)) > self.start
    }
}

pub struct ScriptedEngine {
    arch: Arch,
    text: AddressRange,
    base_cycle: u64,
    steps: Vec<Step>,
    /// Register state after every step.
    registers: Vec<RegisterMap>,
    memory: HashMap<Address, u8>,
    code: HashMap<Address, Instruction>,
    functions: FunctionTable,
    relocatables: Relocatables,

    /// Index of the current step, `None` before the first one.
    current: Option<usize>,
    pending: VecDeque<StopReason>,
    breakpoints: HashMap<BreakpointHandle, Breakpoint>,
    next_handle: u32,
    events: HashMap<CycleEventId, u64>,
    next_event: u64,
    halt_reason: Option<String>,
}

impl ScriptedEngine {
    pub fn new(scenario: Scenario) -> Self {
        let mut registers = Vec::with_capacity(scenario.steps.len());
        let mut state = RegisterMap::default();
        let mut code = HashMap::new();
        for step in &scenario.steps {
            state.update(scenario.arch.pc_register(), step.pc.as_u64());
            for (register, value) in step.registers.iter() {
                state.update(register, value);
            }
            registers.push(state.clone());
            code.entry(step.pc).or_insert_with(|| Instruction {
                address: step.pc,
                length: step.length,
                text: step.text.clone(),
            });
        }

        let mut memory = HashMap::new();
        for chunk in &scenario.memory {
            for (i, byte) in chunk.data().into_iter().enumerate() {
                memory.insert(chunk.address.add(i as u64), byte);
            }
        }

        Self {
            arch: scenario.arch,
            text: scenario.text,
            base_cycle: scenario.base_cycle,
            registers,
            memory,
            code,
            functions: FunctionTable::new(scenario.functions),
            relocatables: symbols::relocatables(&scenario.relocations),
            steps: scenario.steps,
            current: None,
            pending: VecDeque::new(),
            breakpoints: HashMap::new(),
            next_handle: 1,
            events: HashMap::new(),
            next_event: 1,
            halt_reason: None,
        }
    }

    pub fn from_toml(data: &str) -> Result<Self, Error> {
        Ok(Self::new(Scenario::from_toml(data)?))
    }

    pub fn functions(&self) -> &FunctionTable {
        &self.functions
    }

    pub fn relocatables(&self) -> &Relocatables {
        &self.relocatables
    }

    /// Reason of the last halt request.
    pub fn halt_reason(&self) -> Option<&str> {
        self.halt_reason.as_deref()
    }

    /// Number of registered breakpoints, including execution ones.
    pub fn breakpoint_count(&self) -> usize {
        self.breakpoints.len()
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    fn step(&self) -> Option<&Step> {
        self.steps.get(self.current.unwrap_or_default())
    }

    fn cycle_of(&self, idx: usize) -> u64 {
        self.base_cycle + idx as u64
    }

    /// Collect hits of a step that just executed.
    fn enter(&mut self, idx: usize) {
        self.current = Some(idx);
        self.pending.clear();
        let step = &self.steps[idx];

        let mut handles: Vec<_> = self.breakpoints.keys().copied().collect();
        handles.sort_by_key(|h| h.0);

        for handle in &handles {
            let bp = &self.breakpoints[handle];
            if bp.access == BreakAccess::Execute && bp.start == step.pc {
                self.pending
                    .push_back(StopReason::Execute(*handle, step.pc));
            }
        }
        for access in &step.accesses {
            for handle in &handles {
                let bp = &self.breakpoints[handle];
                let kind_match = match access.kind {
                    AccessKind::Load => bp.access.on_load(),
                    AccessKind::Store => bp.access.on_store(),
                };
                if kind_match && bp.hit_by(access.address, access.size) {
                    self.pending
                        .push_back(StopReason::MemoryAccess(*handle, *access));
                }
            }
        }

        let cycle = self.cycle_of(idx);
        let mut due: Vec<_> = self
            .events
            .iter()
            .filter(|(_, target)| **target <= cycle)
            .map(|(id, _)| *id)
            .collect();
        due.sort_by_key(|id| id.0);
        self.pending
            .extend(due.into_iter().map(StopReason::CycleEvent));
    }

    /// Breakpoints and events released by a handler are not delivered anymore.
    fn is_live(&self, reason: &StopReason) -> bool {
        match reason {
            StopReason::MemoryAccess(handle, _) | StopReason::Execute(handle, _) => {
                self.breakpoints.contains_key(handle)
            }
            StopReason::CycleEvent(id) => self.events.contains_key(id),
            StopReason::Exhausted => true,
        }
    }
}

impl Engine for ScriptedEngine {
    fn arch(&self) -> Arch {
        self.arch
    }

    fn cycles(&self) -> u64 {
        self.cycle_of(self.current.unwrap_or_default())
    }

    fn register(&self, register: Register) -> Result<u64, Error> {
        let idx = self.current.unwrap_or_default();
        self.registers
            .get(idx)
            .ok_or(Error::RegisterNotFound(register))?
            .value(register)
    }

    fn privilege(&self) -> Privilege {
        self.step().map(|s| s.privilege).unwrap_or_default()
    }

    fn text_segment(&self) -> AddressRange {
        self.text
    }

    fn read_u8(&self, addr: Address) -> Result<u8, Error> {
        self.memory
            .get(&addr)
            .copied()
            .ok_or(Error::MemoryRead(addr))
    }

    fn disassemble(&self, addr: Address) -> Result<Instruction, Error> {
        self.code
            .get(&addr)
            .cloned()
            .ok_or(Error::NoInstruction(addr))
    }

    fn add_breakpoint(
        &mut self,
        access: BreakAccess,
        start: Address,
        length: u64,
    ) -> Result<BreakpointHandle, Error> {
        if length == 0 {
            return Err(Error::InvalidRange { start, length });
        }
        let handle = BreakpointHandle(self.next_handle);
        self.next_handle += 1;
        self.breakpoints.insert(
            handle,
            Breakpoint {
                access,
                start,
                length,
            },
        );
        dw_debug!(target: "sim", "add breakpoint {handle} {access:?} at {start} length {length:#x}");
        Ok(handle)
    }

    fn remove_breakpoint(&mut self, handle: BreakpointHandle) -> Result<(), Error> {
        self.breakpoints
            .remove(&handle)
            .map(|_| ())
            .ok_or(Error::BreakpointNotFound(handle))
    }

    fn post_cycle_event(&mut self, cycles: u64) -> Result<CycleEventId, Error> {
        let id = CycleEventId(self.next_event);
        self.next_event += 1;
        self.events.insert(id, self.cycles() + cycles);
        Ok(id)
    }

    fn cancel_cycle_event(&mut self, id: CycleEventId) -> Result<(), Error> {
        self.events
            .remove(&id)
            .map(|_| ())
            .ok_or(Error::CycleEventNotFound(id))
    }

    fn skip_to(&mut self, cycle: u64) -> Result<(), Error> {
        let idx = cycle
            .checked_sub(self.base_cycle)
            .map(|idx| idx as usize)
            .filter(|idx| *idx < self.steps.len())
            .ok_or(Error::CycleOutOfRange(cycle))?;
        dw_debug!(target: "sim", "skip to cycle {cycle:#x}");
        self.current = Some(idx);
        self.pending.clear();
        Ok(())
    }

    fn halt(&mut self, reason: &str) {
        dw_info!(target: "sim", "halt at cycle {:#x}: {reason}", self.cycles());
        self.halt_reason = Some(reason.to_string());
    }

    fn is_halted(&self) -> bool {
        self.halt_reason.is_some()
    }

    fn resume(&mut self) -> Result<StopReason, Error> {
        self.halt_reason = None;
        loop {
            while let Some(reason) = self.pending.pop_front() {
                if self.is_live(&reason) {
                    if let StopReason::CycleEvent(id) = reason {
                        self.events.remove(&id);
                    }
                    return Ok(reason);
                }
            }

            let next = self.current.map_or(0, |idx| idx + 1);
            if next >= self.steps.len() {
                return Ok(StopReason::Exhausted);
            }
            self.enter(next);
        }
    }
}
