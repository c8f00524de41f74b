//! Command handlers for the memscatter CLI
//!
//! Each subcommand has its own module with handler functions.

pub mod configure;
pub mod memory;
pub mod scatter;

use crate::address::Address;
use crate::cli::TargetArgs;
use crate::config::Config;
use crate::process::ProcessPort;
use anyhow::{Context, Result};
use memscatter::{MemoryPort, Pid, Session};
use tracing::info;

/// A session attached to one process
pub struct Target<P: MemoryPort> {
    pub session: Session<P>,
    pub pid: Pid,
    pub use_cache: bool,
    module: Option<String>,
}

impl<P: MemoryPort> Target<P> {
    pub fn new(session: Session<P>, pid: Pid, use_cache: bool, module: Option<String>) -> Self {
        Self {
            session,
            pid,
            use_cache,
            module,
        }
    }

    /// Base of `module`, or of the configured module
    pub fn module_base(&self, module: Option<&str>) -> Result<(String, u64)> {
        let name = module.or(self.module.as_deref()).context(
            "No module given. Pass one or run `memscatter configure --module NAME`",
        )?;
        let base = self.session.module_base(self.pid, name)?;
        Ok((name.to_string(), base))
    }

    /// Absolute address for a user-written address
    pub fn resolve(&self, address: &str) -> Result<u64> {
        let address = Address::parse(address)?;
        let base = if address.is_module_relative() {
            Some(self.module_base(None)?.1)
        } else {
            None
        };
        address.resolve(base)
    }
}

/// Open a session on the live process selected by `target` and `config`
pub fn attach(config: &Config, target: &TargetArgs) -> Result<Target<ProcessPort>> {
    let name = config.process_name(target.process.as_deref())?;
    let session = Session::new(ProcessPort::new(config.cache_ttl()));
    let pid = session.process_id(name)?;
    info!(pid, "attached to {}", name);

    Ok(Target::new(
        session,
        pid,
        config.use_cache && !target.no_cache,
        config.module.clone(),
    ))
}
