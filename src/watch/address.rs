use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Virtual address in the instrumented program.
/// Zero address is reserved, watch ranges use it as an "inactive" sentinel.
#[derive(
    Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Address(u64);

impl Address {
    pub const NULL: Address = Address(0);

    pub fn offset(self, offset: i64) -> Address {
        if offset >= 0 {
            self.0.wrapping_add(offset as u64)
        } else {
            self.0.wrapping_sub(offset.unsigned_abs())
        }
        .into()
    }

    /// Add an unsigned byte count.
    pub fn add(self, bytes: u64) -> Address {
        Address(self.0.wrapping_add(bytes))
    }

    /// Distance in bytes from `base`, `None` if `base` is above `self`.
    pub fn distance_from(self, base: Address) -> Option<u64> {
        self.0.checked_sub(base.0)
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl From<u64> for Address {
    fn from(addr: u64) -> Self {
        Address(addr)
    }
}

impl From<usize> for Address {
    fn from(addr: usize) -> Self {
        Address(addr as u64)
    }
}

impl From<Address> for u64 {
    fn from(addr: Address) -> Self {
        addr.0
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&format!("{:#x}", self.0))
    }
}

/// Half-open address interval `[start, end)`, used for the program text segment.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct AddressRange {
    pub start: Address,
    pub end: Address,
}

impl AddressRange {
    pub fn new(start: Address, end: Address) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.start && addr < self.end
    }
}

impl Display for AddressRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}
