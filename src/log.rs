//! Process wide switch for the engine's own log output.
//!
//! The `dw_*` macros forward to the `log` facade only while output is enabled,
//! `dwatch --quiet` turns it off so that only provenance marks are printed.

use std::sync::atomic::{AtomicBool, Ordering};

static ENABLED: AtomicBool = AtomicBool::new(true);

#[inline(always)]
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

pub fn disable() {
    ENABLED.store(false, Ordering::Relaxed)
}

pub fn enable() {
    ENABLED.store(true, Ordering::Relaxed)
}

#[macro_export]
macro_rules! dw_info {
    (target: $target:expr, $($arg:tt)+) => {
        if $crate::log::is_enabled() {
            ::log::info!(target: $target, $($arg)+)
        }
    };
    ($($arg:tt)+) => {
        if $crate::log::is_enabled() {
            ::log::info!($($arg)+)
        }
    };
}

#[macro_export]
macro_rules! dw_warn {
    (target: $target:expr, $($arg:tt)+) => {
        if $crate::log::is_enabled() {
            ::log::warn!(target: $target, $($arg)+)
        }
    };
    ($($arg:tt)+) => {
        if $crate::log::is_enabled() {
            ::log::warn!($($arg)+)
        }
    };
}

#[macro_export]
macro_rules! dw_error {
    (target: $target:expr, $($arg:tt)+) => {
        if $crate::log::is_enabled() {
            ::log::error!(target: $target, $($arg)+)
        }
    };
    ($($arg:tt)+) => {
        if $crate::log::is_enabled() {
            ::log::error!($($arg)+)
        }
    };
}

/// Simulation traces, off under `--quiet` even at `RUST_LOG=debug`.
#[macro_export]
macro_rules! dw_debug {
    (target: $target:expr, $($arg:tt)+) => {
        if $crate::log::is_enabled() {
            ::log::debug!(target: $target, $($arg)+)
        }
    };
    ($($arg:tt)+) => {
        if $crate::log::is_enabled() {
            ::log::debug!($($arg)+)
        }
    };
}
