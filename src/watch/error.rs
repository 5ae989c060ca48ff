use crate::watch::address::Address;
use crate::watch::breakpoint::BreakpointHandle;
use crate::watch::engine::CycleEventId;
use crate::watch::register::{Arch, Register};
use std::num::ParseIntError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- generic errors --------------------------------------------
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error("configuration parsing error: {0}")]
    ConfigParsing(#[from] toml::de::Error),
    #[error("invalid BACK_STOP_CYCLES value `{0}`: {1}")]
    BackstopCycles(String, ParseIntError),

    // --------------------------------- engine entity not found -----------------------------------
    #[error("unknown register {0}")]
    RegisterNotFound(Register),
    #[error("unknown register {0}")]
    RegisterNameNotFound(String),
    #[error("breakpoint {0} not registered")]
    BreakpointNotFound(BreakpointHandle),
    #[error("cycle event {0} not registered")]
    CycleEventNotFound(CycleEventId),
    #[error("cycle {0} is outside of recorded execution")]
    CycleOutOfRange(u64),
    #[error("no instruction at address {0}")]
    NoInstruction(Address),
    #[error("watch mark {0} not found")]
    MarkNotFound(usize),
    #[error("function not found at address {0}")]
    FunctionNotFound(Address),

    // --------------------------------- remote memory errors --------------------------------------
    #[error("memory at {0} is not readable")]
    MemoryRead(Address),
    #[error("invalid watch range {start} (length {length})")]
    InvalidRange { start: Address, length: u64 },

    // --------------------------------- watch session errors --------------------------------------
    #[error("stop function accepts at most 3 arguments, got {0}")]
    TooManyStopArguments(usize),
    #[error("parameter recovery is not supported on {0}")]
    RecoveryUnsupported(Arch),
    #[error("no function information available")]
    NoFunctionInfo,
    #[error("execution engine: {0}")]
    Engine(String),
}

impl Error {
    /// Return a hint to a caller - keep the watch session alive after error or drop it.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::IO(_) => false,
            Error::RegisterNotFound(_) => false,
            Error::RegisterNameNotFound(_) => false,
            Error::BreakpointNotFound(_) => false,
            Error::CycleEventNotFound(_) => false,
            Error::CycleOutOfRange(_) => false,
            Error::NoInstruction(_) => false,
            Error::MarkNotFound(_) => false,
            Error::FunctionNotFound(_) => false,
            Error::MemoryRead(_) => false,
            Error::InvalidRange { .. } => false,
            Error::TooManyStopArguments(_) => false,
            Error::RecoveryUnsupported(_) => false,
            Error::NoFunctionInfo => false,
            Error::Engine(_) => false,

            // configuration errors prevent a session from being created at all
            Error::ConfigParsing(_) => true,
            Error::BackstopCycles(_, _) => true,
        }
    }
}

#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "watch", "{:#}", e);
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "watch", concat!($msg, " {:#}"), e);
                None
            }
        }
    };
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        $crate::_error!(log::warn, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::warn, $res, $msg)
    };
}

/// Transforms `Result` into `Option` and put error into debug logs if it occurs.
#[macro_export]
macro_rules! muted_error {
    ($res: expr) => {
        $crate::_error!(log::debug, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::debug, $res, $msg)
    };
}
