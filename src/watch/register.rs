use crate::watch::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum_macros::{Display, EnumString};

/// Instruction set family of the instrumented processor.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, EnumString, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    Arm,
    X86_64,
}

impl Arch {
    /// Register holding the program counter.
    pub fn pc_register(self) -> Register {
        match self {
            Arch::Arm => Register::Pc,
            Arch::X86_64 => Register::Rip,
        }
    }

    /// Register holding a system call return value right after the kernel returns.
    pub fn syscall_ret_register(self) -> Register {
        match self {
            Arch::Arm => Register::R0,
            Arch::X86_64 => Register::Rax,
        }
    }

    /// Register carrying the n-th (zero based) integer argument at a call instruction.
    pub fn argument_register(self, n: usize) -> Option<Register> {
        const ARM: [Register; 4] = [Register::R0, Register::R1, Register::R2, Register::R3];
        const SYSV: [Register; 6] = [
            Register::Rdi,
            Register::Rsi,
            Register::Rdx,
            Register::Rcx,
            Register::R8,
            Register::R9,
        ];
        match self {
            Arch::Arm => ARM.get(n).copied(),
            Arch::X86_64 => SYSV.get(n).copied(),
        }
    }

    /// True if the argument registers of bulk-memory routines can be recovered
    /// by walking back to the call site.
    pub fn supports_recovery(self) -> bool {
        matches!(self, Arch::Arm)
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, EnumString, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum Register {
    // arm
    R0,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
    R8,
    R9,
    R10,
    R11,
    R12,
    Sp,
    Lr,
    Pc,
    Cpsr,
    // x86_64
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rdi,
    Rsi,
    Rbp,
    Rsp,
    Rip,
    Eflags,
}

/// Register values of a single cycle snapshot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegisterMap(HashMap<Register, u64>);

impl RegisterMap {
    pub fn value(&self, register: Register) -> Result<u64, Error> {
        self.0
            .get(&register)
            .copied()
            .ok_or(Error::RegisterNotFound(register))
    }

    pub fn update(&mut self, register: Register, value: u64) {
        self.0.insert(register, value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (Register, u64)> + '_ {
        self.0.iter().map(|(r, v)| (*r, *v))
    }
}

impl<const N: usize> From<[(Register, u64); N]> for RegisterMap {
    fn from(values: [(Register, u64); N]) -> Self {
        Self(HashMap::from(values))
    }
}

/// Parse register name as it appears in disassembly (`r3`, `R3`, `sp`, ...).
pub fn get_register_from_name(name: &str) -> Result<Register, Error> {
    name.trim()
        .parse::<Register>()
        .map_err(|_| Error::RegisterNameNotFound(name.to_string()))
}
