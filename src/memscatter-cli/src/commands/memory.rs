//! Raw memory access command handlers
//!
//! Handlers for process lookup, single reads, pointer chains and writes.

use super::Target;
use crate::address::{parse_hex_bytes, parse_number};
use crate::config::Config;
use crate::process::{module_size, ProcessPort};
use anyhow::{Context, Result};
use memscatter::{MemoryPort, Session, WriteEntry};
use std::fmt::Write as _;

/// Handle the Pid command
pub fn handle_pid(config: &Config, name: &str) -> Result<()> {
    let session = Session::new(ProcessPort::new(config.cache_ttl()));
    let pid = session.process_id(name)?;
    println!("{}", pid);
    Ok(())
}

/// Handle the Module command
pub fn handle_module(target: &Target<ProcessPort>, module: Option<&str>) -> Result<()> {
    let (name, base) = target.module_base(module)?;
    println!("{} base: {:#x}", name, base);
    if let Some(size) = module_size(target.pid, &name) {
        println!("{} mapped: {:#x} bytes", name, size);
    }
    Ok(())
}

/// Handle the Read command
///
/// Reads bytes from memory and displays them as a hex dump.
pub fn handle_read<P: MemoryPort>(target: &Target<P>, address: &str, size: usize) -> Result<()> {
    let addr = target.resolve(address)?;
    let data = target
        .session
        .read_buffer(target.pid, addr, size, target.use_cache)?;

    println!("Reading {} bytes at {:#x}:", size, addr);
    print!("{}", hex_dump(addr, &data));
    Ok(())
}

/// Handle the ReadPtr command
pub fn handle_read_ptr<P: MemoryPort>(
    target: &Target<P>,
    address: &str,
    offsets: &[String],
) -> Result<()> {
    let addr = target.resolve(address)?;
    let offsets = offsets
        .iter()
        .map(|o| parse_number(o))
        .collect::<Result<Vec<u64>>>()?;

    let result = read_ptr_chain(target, addr, &offsets)?;
    println!("{:#x}", result);
    Ok(())
}

/// Read the pointer at `addr`, then follow `offsets` from it
fn read_ptr_chain<P: MemoryPort>(target: &Target<P>, addr: u64, offsets: &[u64]) -> Result<u64> {
    let first = target
        .session
        .read_ptr(target.pid, addr, target.use_cache)
        .with_context(|| format!("Failed to read pointer at {:#x}", addr))?;
    let result = target.session.read_ptr_chain(
        target.pid,
        first.address(),
        offsets,
        target.use_cache,
    )?;
    Ok(result)
}

/// Handle the Write command
///
/// Shows the original bytes, then writes the new ones as a single batch.
pub fn handle_write<P: MemoryPort>(target: &Target<P>, address: &str, bytes: &str) -> Result<()> {
    let addr = target.resolve(address)?;
    let data = parse_hex_bytes(bytes)?;

    println!("Writing {} bytes to {:#x}:", data.len(), addr);
    println!("  {}", hex_bytes(&data));

    let original = target.session.read_buffer(target.pid, addr, data.len(), false)?;
    println!("Original: {}", hex_bytes(&original));

    target
        .session
        .write_batch(target.pid, &[WriteEntry::new(addr, data)])?;
    println!("Write successful!");
    Ok(())
}

fn hex_bytes(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Format a 16-bytes-per-line hex dump with an ASCII column
pub fn hex_dump(address: u64, data: &[u8]) -> String {
    let mut out = String::new();
    for (i, chunk) in data.chunks(16).enumerate() {
        let _ = write!(out, "{:08x}  ", address + (i as u64) * 16);
        for j in 0..16 {
            match chunk.get(j) {
                Some(byte) => {
                    let _ = write!(out, "{:02x} ", byte);
                }
                // Pad if last line is short
                None => out.push_str("   "),
            }
            if j == 7 {
                out.push(' ');
            }
        }
        out.push_str(" |");
        for &byte in chunk {
            let c = byte as char;
            if c.is_ascii_graphic() || c == ' ' {
                out.push(c);
            } else {
                out.push('.');
            }
        }
        out.push_str("|\n");
    }
    out
}
