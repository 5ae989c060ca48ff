//! Recorded execution trace loaded from TOML.

use crate::watch::address::{Address, AddressRange};
use crate::watch::engine::{MemoryAccess, Privilege};
use crate::watch::error::Error;
use crate::watch::register::{Arch, RegisterMap};
use serde::Deserialize;
use std::fs::read_to_string;
use std::path::Path;

/// Bytes preloaded into memory.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MemoryChunk {
    pub address: Address,
    pub bytes: Vec<u8>,
    /// NUL-terminated string, written after `bytes`.
    pub text: Option<String>,
}

impl MemoryChunk {
    pub fn data(&self) -> Vec<u8> {
        let mut data = self.bytes.clone();
        if let Some(text) = &self.text {
            data.extend_from_slice(text.as_bytes());
            data.push(0);
        }
        data
    }
}

/// Symbol of a function in the instrumented program.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FunctionSymbol {
    pub name: String,
    pub start: Address,
    /// Exclusive.
    pub end: Address,
    /// Function iterates over buffers given in arguments.
    #[serde(default)]
    pub iterator: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Relocation {
    pub address: Address,
    pub name: String,
}

/// Single executed instruction.
#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    pub pc: Address,
    pub text: String,
    #[serde(default = "Step::default_length")]
    pub length: u64,
    #[serde(default)]
    pub privilege: Privilege,
    /// Registers changed by this instruction, others keep a previous value.
    #[serde(default)]
    pub registers: RegisterMap,
    #[serde(default)]
    pub accesses: Vec<MemoryAccess>,
}

impl Step {
    fn default_length() -> u64 {
        4
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub arch: Arch,
    pub text: AddressRange,
    /// Cycle of the first step.
    #[serde(default)]
    pub base_cycle: u64,
    #[serde(default)]
    pub memory: Vec<MemoryChunk>,
    #[serde(default)]
    pub functions: Vec<FunctionSymbol>,
    #[serde(default)]
    pub relocations: Vec<Relocation>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn from_toml(data: &str) -> Result<Self, Error> {
        Ok(toml::from_str(data)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        Self::from_toml(&read_to_string(path)?)
    }
}
