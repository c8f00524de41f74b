//! Scatter plan command handler

use super::Target;
use crate::plan::{Plan, Report};
use anyhow::{Context, Result};
use memscatter::MemoryPort;
use std::path::Path;
use tracing::info;

/// Handle the Scatter command
pub fn handle<P: MemoryPort>(target: &Target<P>, plan_path: &Path, json: bool) -> Result<()> {
    let plan = Plan::load(plan_path)?;
    let report = run(target, &plan)?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize results")?
        );
    } else {
        println!("{}", report);
    }
    Ok(())
}

/// Build and execute `plan` against the attached process
pub fn run<P: MemoryPort>(target: &Target<P>, plan: &Plan) -> Result<Report> {
    let module_base = if plan.needs_module() {
        Some(target.module_base(None)?.1)
    } else {
        None
    };

    let map = plan.build(target.pid, module_base, target.use_cache)?;
    let results = target
        .session
        .execute(map)
        .context("Scatter read failed")?;

    let stats = results.stats();
    info!(
        rounds = stats.rounds,
        pages = stats.pages_requested,
        failed = stats.failed,
        "scatter plan executed"
    );
    Ok(plan.report(&results))
}

#[cfg(test)]
mod tests {
    use super::super::tests::{mock_target, BASE};
    use super::*;
    use crate::plan::Decoded;
    use memscatter::mock::MockPort;
    use std::fs;

    const PLAN: &str = r#"
indexes = 1

[[rounds]]
[[rounds.entries]]
index = 0
id = 0
kind = "ptr"
address = "module+0x10"

[[rounds]]
[[rounds.entries]]
index = 0
id = 1
kind = "u16"
address_ref = [0, 0]
offset = 2
"#;

    fn port() -> MockPort {
        let mut port = MockPort::new();
        port.put_value(BASE + 0x10, &0x8000u64);
        port.put_value(0x8002, &0xBEEFu16);
        port
    }

    #[test]
    fn test_run_plan() {
        let target = mock_target(port());
        let plan: Plan = PLAN.parse().unwrap();
        let report = run(&target, &plan).unwrap();

        assert_eq!(report.rounds, 2);
        assert_eq!(report.pages_requested, 2);
        assert_eq!(report.entries[1].value, Some(Decoded::Unsigned(0xBEEF)));
        // Both rounds use the session's cache flag
        assert_eq!(target.session.lock().cache_flags(), &[true, true]);
    }

    #[test]
    fn test_handle_plan_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.toml");
        fs::write(&path, PLAN).unwrap();

        let target = mock_target(port());
        handle(&target, &path, false).unwrap();
        handle(&target, &path, true).unwrap();
        assert!(handle(&target, &dir.path().join("missing.toml"), false).is_err());
    }

    #[test]
    fn test_device_failure_is_error() {
        let mut port = port();
        port.fail_device(true);
        let target = mock_target(port);
        let plan: Plan = PLAN.parse().unwrap();
        assert!(run(&target, &plan).is_err());
    }
}
