use crate::watch::address::Address;
use crate::watch::backstop::DEFAULT_BACKSTOP_CYCLES;
use crate::watch::error::Error;
use serde::{Deserialize, Serialize};
use std::fs::read_to_string;
use std::path::Path;

/// Environment variable overriding the backstop distance.
pub const BACKSTOP_ENV: &str = "BACK_STOP_CYCLES";

/// Watch session settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Cycles execution may run without a watched access before the backstop halts it.
    pub backstop_cycles: u64,
    /// Halt on the first watched access instead of recording and going on.
    pub break_simulation: bool,
    /// Log operands of a compare instruction at every access.
    pub show_cmp: bool,
    /// Kernel return point used to capture a system call result after
    /// the kernel touched watched data.
    pub kernel_return: Option<Address>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            backstop_cycles: DEFAULT_BACKSTOP_CYCLES,
            break_simulation: true,
            show_cmp: false,
            kernel_return: None,
        }
    }
}

impl WatchConfig {
    /// Default configuration with environment overrides applied.
    pub fn from_env() -> Result<Self, Error> {
        let mut cfg = Self::default();
        cfg.apply_env()?;
        Ok(cfg)
    }

    /// Apply [`BACKSTOP_ENV`] if set.
    pub fn apply_env(&mut self) -> Result<(), Error> {
        if let Ok(value) = std::env::var(BACKSTOP_ENV) {
            self.backstop_cycles = value
                .trim()
                .parse()
                .map_err(|e| Error::BackstopCycles(value.clone(), e))?;
        }
        Ok(())
    }

    pub fn from_toml(data: &str) -> Result<Self, Error> {
        Ok(toml::de::from_str(data)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        Self::from_toml(&read_to_string(path)?)
    }
}
