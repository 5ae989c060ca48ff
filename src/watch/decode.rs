//! Text-level decoding of disassembled instructions.

use crate::watch::address::Address;
use crate::watch::register::{get_register_from_name, Arch, Register};
use once_cell::sync::Lazy;
use regex::Regex;

static CALL_TARGET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\S+\s+#?(?:0x)?([0-9a-fA-F]+)\b").expect("infallible: valid regex")
});

const ARM_CONDITIONS: [&str; 17] = [
    "eq", "ne", "cs", "hs", "cc", "lo", "mi", "pl", "vs", "vc", "hi", "ls", "ge", "lt", "gt", "le",
    "al",
];

fn mnemonic(text: &str) -> &str {
    let m = text.split_whitespace().next().unwrap_or_default();
    // thumb width qualifiers
    m.strip_suffix(".w")
        .or_else(|| m.strip_suffix(".n"))
        .unwrap_or(m)
}

/// True if instruction is a subroutine call.
pub fn is_call(arch: Arch, text: &str) -> bool {
    let m = mnemonic(text).to_ascii_lowercase();
    match arch {
        Arch::Arm => {
            let Some(rest) = m.strip_prefix("bl") else {
                return false;
            };
            let cond = rest.strip_prefix('x').unwrap_or(rest);
            cond.is_empty() || ARM_CONDITIONS.contains(&cond)
        }
        Arch::X86_64 => m == "call" || m == "callq",
    }
}

/// Return a direct call destination, `None` for indirect calls.
pub fn call_target(text: &str) -> Option<Address> {
    let caps = CALL_TARGET.captures(text.trim())?;
    u64::from_str_radix(caps.get(1)?.as_str(), 16)
        .ok()
        .map(Address::from)
}

pub fn is_cmp(text: &str) -> bool {
    mnemonic(text).to_ascii_lowercase().starts_with("cmp")
}

/// Split operands of a two-operand instruction.
pub fn operands(text: &str) -> Option<(&str, &str)> {
    let (_, ops) = text.trim().split_once(char::is_whitespace)?;
    let (first, second) = ops.split_once(',')?;
    Some((first.trim(), second.trim()))
}

/// Return operand as a register if it names one.
pub fn as_register(operand: &str) -> Option<Register> {
    get_register_from_name(operand).ok()
}
