//! Contract of the cycle-stepping execution engine the watch session instruments.
//!
//! The engine owns the instrumented processor: its registers, memory, breakpoints,
//! cycle events and time-travel. A watch session never holds the engine, it receives
//! it by reference for every operation, so exactly one session can drive an engine
//! at a time.

use crate::watch::address::{Address, AddressRange};
use crate::watch::breakpoint::{BreakAccess, BreakpointHandle};
use crate::watch::error::Error;
use crate::watch::register::{Arch, Register};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Identifier of a posted cycle-count event.
#[derive(Clone, Copy, Hash, PartialEq, Eq, Debug)]
pub struct CycleEventId(pub u64);

impl Display for CycleEventId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessKind {
    Load,
    Store,
}

/// Processor privilege level at the moment of an access.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Privilege {
    Kernel,
    #[default]
    User,
}

/// Single memory operation reported by a triggered watch breakpoint.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct MemoryAccess {
    pub address: Address,
    #[serde(default = "MemoryAccess::default_size")]
    pub size: u64,
    pub kind: AccessKind,
}

impl MemoryAccess {
    fn default_size() -> u64 {
        4
    }

    pub fn load(address: Address, size: u64) -> Self {
        Self {
            address,
            size,
            kind: AccessKind::Load,
        }
    }

    pub fn store(address: Address, size: u64) -> Self {
        Self {
            address,
            size,
            kind: AccessKind::Store,
        }
    }
}

/// Single disassembled instruction.
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    pub address: Address,
    /// Instruction length in bytes.
    pub length: u64,
    /// Disassembly text, mnemonic followed by operands.
    pub text: String,
}

impl Instruction {
    pub fn mnemonic(&self) -> &str {
        self.text.split_whitespace().next().unwrap_or_default()
    }
}

/// Reason why [`Engine::resume`] returned control.
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    /// Memory inside a read/write breakpoint range accessed.
    MemoryAccess(BreakpointHandle, MemoryAccess),
    /// Execution breakpoint reached.
    Execute(BreakpointHandle, Address),
    /// Posted cycle event reached its cycle.
    CycleEvent(CycleEventId),
    /// Nothing left to execute.
    Exhausted,
}

pub trait Engine {
    /// Architecture of the instrumented processor.
    fn arch(&self) -> Arch;

    /// Current cycle counter.
    fn cycles(&self) -> u64;

    /// Value of a register at the current cycle.
    fn register(&self, register: Register) -> Result<u64, Error>;

    /// Current program counter.
    fn pc(&self) -> Result<Address, Error> {
        Ok(self.register(self.arch().pc_register())?.into())
    }

    /// Privilege level the processor currently executes at.
    fn privilege(&self) -> Privilege;

    /// Text (code) segment of the instrumented program.
    fn text_segment(&self) -> AddressRange;

    fn read_u8(&self, addr: Address) -> Result<u8, Error>;

    /// Read a little-endian 32-bit word.
    fn read_u32(&self, addr: Address) -> Result<u32, Error> {
        let mut bytes = [0u8; 4];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = self.read_u8(addr.add(i as u64))?;
        }
        Ok(u32::from_le_bytes(bytes))
    }

    /// Disassemble one instruction at address.
    fn disassemble(&self, addr: Address) -> Result<Instruction, Error>;

    /// Register a breakpoint over `[start, start + length)`.
    fn add_breakpoint(
        &mut self,
        access: BreakAccess,
        start: Address,
        length: u64,
    ) -> Result<BreakpointHandle, Error>;

    /// Release breakpoint registration. Release of unknown handle is an error.
    fn remove_breakpoint(&mut self, handle: BreakpointHandle) -> Result<(), Error>;

    /// Post one-shot event `cycles` cycles in the future.
    fn post_cycle_event(&mut self, cycles: u64) -> Result<CycleEventId, Error>;

    fn cancel_cycle_event(&mut self, id: CycleEventId) -> Result<(), Error>;

    /// Move execution to an arbitrary recorded cycle (backward or forward).
    fn skip_to(&mut self, cycle: u64) -> Result<(), Error>;

    /// Request execution halt. Takes effect when the current callback returns.
    fn halt(&mut self, reason: &str);

    fn is_halted(&self) -> bool;

    /// Continue execution until next stop. Clears a halt request.
    fn resume(&mut self) -> Result<StopReason, Error>;
}
