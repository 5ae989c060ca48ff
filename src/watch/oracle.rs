//! Collaborators answering "what code is running": stack-trace attribution of bulk-memory
//! functions, function boundaries, relocated call thunks and user tagged iterators.

use crate::watch::address::Address;
use crate::watch::engine::Engine;
use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter};
use strum_macros::EnumString;

/// Library routine operating over a buffer passed in argument registers.
#[derive(Clone, Debug, PartialEq, Eq, Hash, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum MemFunction {
    Memcpy,
    Memmove,
    Mempcpy,
    Memset,
    Memcmp,
    Strcpy,
    Strcmp,
    Strlen,
    Strchr,
    /// Any other function, treated as a user iterator over a buffer.
    #[strum(default)]
    Other(String),
}

impl MemFunction {
    pub fn name(&self) -> &str {
        match self {
            MemFunction::Memcpy => "memcpy",
            MemFunction::Memmove => "memmove",
            MemFunction::Mempcpy => "mempcpy",
            MemFunction::Memset => "memset",
            MemFunction::Memcmp => "memcmp",
            MemFunction::Strcpy => "strcpy",
            MemFunction::Strcmp => "strcmp",
            MemFunction::Strlen => "strlen",
            MemFunction::Strchr => "strchr",
            MemFunction::Other(name) => name,
        }
    }

    /// True for recognized library routines, false for iterators.
    pub fn is_mem_function(&self) -> bool {
        !matches!(self, MemFunction::Other(_))
    }

    /// Routines producing a copy of a watched buffer.
    pub fn is_copy(&self) -> bool {
        matches!(
            self,
            MemFunction::Memcpy | MemFunction::Memmove | MemFunction::Mempcpy | MemFunction::Strcpy
        )
    }

    pub fn is_compare(&self) -> bool {
        matches!(self, MemFunction::Memcmp | MemFunction::Strcmp)
    }
}

impl Display for MemFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Bulk-memory function frame found on a call stack.
#[derive(Clone, Debug, PartialEq)]
pub struct MemCallSite {
    pub function: MemFunction,
    /// Address the function returns to.
    pub return_address: Address,
}

/// Result of a stack trace query.
#[derive(Clone, Debug, PartialEq)]
pub enum Attribution {
    /// Stack trace unavailable, typically the halt belongs to another process.
    NoStackTrace,
    /// No bulk-memory function in progress.
    NotMemFunction,
    MemFunction(MemCallSite),
}

pub trait StackTraceSource {
    /// Look at the innermost frames of a halted context for a bulk-memory function in progress.
    fn attribute(&mut self, engine: &dyn Engine) -> Attribution;
}

/// Stack trace source for targets without symbol information: never attributes an access
/// to a library routine.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAttribution;

impl StackTraceSource for NoAttribution {
    fn attribute(&mut self, _: &dyn Engine) -> Attribution {
        Attribution::NotMemFunction
    }
}

/// Function boundary resolution.
pub trait FunctionResolver {
    /// Return entry address of a function containing an address.
    fn function_containing(&self, addr: Address) -> Option<Address>;
}

/// Relocated call targets (PLT/import thunks) and their symbol names.
pub type Relocatables = HashMap<Address, String>;

/// Functions tagged by a user as iterators over watched data.
#[derive(Debug, Default, Clone)]
pub struct UserIterators {
    functions: HashSet<Address>,
}

impl UserIterators {
    pub fn add(&mut self, function: Address) -> bool {
        self.functions.insert(function)
    }

    pub fn is_iterator(&self, function: Address) -> bool {
        self.functions.contains(&function)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl FromIterator<Address> for UserIterators {
    fn from_iter<T: IntoIterator<Item = Address>>(iter: T) -> Self {
        Self {
            functions: iter.into_iter().collect(),
        }
    }
}
