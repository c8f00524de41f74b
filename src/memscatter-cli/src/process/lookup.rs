//! Process and module discovery

use super::region::{parse_maps, MemoryRegion};
use memscatter::{MemoryError, MemoryResult, Pid};
use sysinfo::System;
use tracing::debug;

/// Find a running process by executable name.
///
/// Matches the process name or its command line (Wine/Proton processes
/// show up as the loader with the .exe in the command line). Threads are
/// folded into their thread group, and the candidate using the most memory
/// wins.
pub fn find_process(name: &str) -> MemoryResult<Pid> {
    let mut system = System::new_all();
    system.refresh_all();

    let needle = name.to_lowercase();
    let mut candidates: Vec<(u32, u64)> = Vec::new();

    for process in system.processes().values() {
        let pid = process.pid().as_u32();
        let process_name = process.name().to_string_lossy().to_lowercase();

        let cmdline_match = std::fs::read_to_string(format!("/proc/{}/cmdline", pid))
            .map(|cmdline| cmdline.to_lowercase().contains(&needle))
            .unwrap_or(false);

        if process_name == needle || cmdline_match {
            let tgid = get_tgid(pid).unwrap_or(pid);
            candidates.push((tgid, process.memory()));
        }
    }

    candidates.sort_by(|a, b| b.1.cmp(&a.1));
    candidates.dedup_by(|a, b| a.0 == b.0);

    match candidates.first() {
        Some(&(pid, memory)) => {
            debug!(pid, memory_mb = memory / 1_000_000, "found process {}", name);
            Ok(pid)
        }
        None => Err(MemoryError::ProcessNotFound(name.to_string())),
    }
}

/// Get the thread group ID (main process) for a given PID/TID
pub fn get_tgid(pid: u32) -> Option<u32> {
    let status = std::fs::read_to_string(format!("/proc/{}/status", pid)).ok()?;
    parse_tgid(&status)
}

fn parse_tgid(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("Tgid:"))
        .and_then(|rest| rest.trim().parse().ok())
}

/// Base address of a loaded module in a live process
pub fn find_module_base(pid: Pid, module: &str) -> MemoryResult<u64> {
    let regions = parse_maps(pid).map_err(|e| {
        MemoryError::Device(format!("failed to read /proc/{}/maps: {}", pid, e))
    })?;
    module_base_in(&regions, module).ok_or_else(|| MemoryError::ModuleNotFound {
        pid,
        module: module.to_string(),
    })
}

/// Lowest start address among regions mapping `module`
pub fn module_base_in(regions: &[MemoryRegion], module: &str) -> Option<u64> {
    regions
        .iter()
        .filter(|r| {
            r.file_name()
                .is_some_and(|name| name.eq_ignore_ascii_case(module))
        })
        .map(|r| r.start)
        .min()
}

/// Total bytes mapped for a module
pub fn module_size(pid: Pid, module: &str) -> Option<u64> {
    let regions = parse_maps(pid).ok()?;
    module_size_in(&regions, module)
}

fn module_size_in(regions: &[MemoryRegion], module: &str) -> Option<u64> {
    let mut mapped = regions
        .iter()
        .filter(|r| {
            r.file_name()
                .is_some_and(|name| name.eq_ignore_ascii_case(module))
        })
        .map(MemoryRegion::size)
        .peekable();
    mapped.peek()?;
    Some(mapped.sum())
}
