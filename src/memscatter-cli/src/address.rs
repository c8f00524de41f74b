//! Address parsing for command arguments and plan files

use anyhow::{bail, Context, Result};
use std::fmt;

const MODULE_PREFIX: &str = "module+";

/// An address as written by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Address {
    Absolute(u64),
    /// Offset from the configured module's base
    ModuleRelative(u64),
}

impl Address {
    /// Parse `0x1234`, `4660` or `module+0x1234`
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        match text.strip_prefix(MODULE_PREFIX) {
            Some(rest) => Ok(Address::ModuleRelative(parse_number(rest)?)),
            None => Ok(Address::Absolute(parse_number(text)?)),
        }
    }

    pub fn is_module_relative(&self) -> bool {
        matches!(self, Address::ModuleRelative(_))
    }

    /// Absolute address, given the module base when one is needed
    pub fn resolve(&self, module_base: Option<u64>) -> Result<u64> {
        match *self {
            Address::Absolute(address) => Ok(address),
            Address::ModuleRelative(offset) => {
                let base = module_base.context(
                    "Module-relative address needs a module. Run `memscatter configure --module NAME`",
                )?;
                base.checked_add(offset)
                    .with_context(|| format!("{:#x} + {:#x} overflows", base, offset))
            }
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Absolute(address) => write!(f, "{:#x}", address),
            Address::ModuleRelative(offset) => write!(f, "{}{:#x}", MODULE_PREFIX, offset),
        }
    }
}

/// Parse a hex (`0x` prefixed) or decimal number
pub fn parse_number(text: &str) -> Result<u64> {
    let text = text.trim();
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        if hex.is_empty() {
            bail!("Invalid hex address: {}", text);
        }
        u64::from_str_radix(hex, 16).with_context(|| format!("Invalid hex address: {}", text))
    } else {
        text.parse::<u64>()
            .with_context(|| format!("Invalid address: {}", text))
    }
}

/// Parse hex bytes from a space-separated string
pub fn parse_hex_bytes(bytes: &str) -> Result<Vec<u8>> {
    let data = bytes
        .split_whitespace()
        .map(|part| {
            u8::from_str_radix(part, 16).with_context(|| format!("Invalid hex byte: {}", part))
        })
        .collect::<Result<Vec<u8>>>()?;
    if data.is_empty() {
        bail!("No bytes given");
    }
    Ok(data)
}
