//! Configuration command handlers
//!
//! Handles the `configure` subcommand for setting up memscatter defaults.

use crate::config::Config;
use anyhow::Result;

/// Requested configuration changes
#[derive(Debug, Default)]
pub struct Changes {
    pub process: Option<String>,
    pub module: Option<String>,
    pub use_cache: Option<bool>,
    pub cache_ttl_ms: Option<u64>,
}

impl Changes {
    fn is_empty(&self) -> bool {
        self.process.is_none()
            && self.module.is_none()
            && self.use_cache.is_none()
            && self.cache_ttl_ms.is_none()
    }

    /// Apply to `config`, returning true if anything changed
    fn apply(self, config: &mut Config) -> bool {
        let before = config.clone();
        if let Some(process) = self.process {
            config.process = Some(process);
        }
        if let Some(module) = self.module {
            config.module = Some(module);
        }
        if let Some(use_cache) = self.use_cache {
            config.use_cache = use_cache;
        }
        if let Some(ttl) = self.cache_ttl_ms {
            config.cache_ttl_ms = ttl;
        }
        *config != before
    }
}

/// Handle the configure command
pub fn handle(changes: Changes, show: bool) -> Result<()> {
    let mut config = Config::load()?;

    if show {
        show_config(&config);
        return Ok(());
    }

    if changes.is_empty() {
        show_usage();
        return Ok(());
    }

    if changes.apply(&mut config) {
        let path = config.save()?;
        println!("Config saved to: {}", path.display());
    }
    show_config(&config);

    Ok(())
}

/// Display current configuration
fn show_config(config: &Config) {
    println!(
        "Process:    {}",
        config.process.as_deref().unwrap_or("(not set)")
    );
    println!(
        "Module:     {}",
        config.module.as_deref().unwrap_or("(not set)")
    );
    println!("Use cache:  {}", config.use_cache);
    println!("Cache TTL:  {} ms", config.cache_ttl_ms);

    if let Ok(path) = Config::config_path() {
        println!("Config file: {}", path.display());
    }
}

/// Show usage help for the configure command
fn show_usage() {
    println!("Usage: memscatter configure --process Game-Win64-Shipping.exe");
    println!("       memscatter configure --module Game-Win64-Shipping.exe --cache-ttl-ms 250");
    println!("   or: memscatter configure --show");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_show_usage_does_not_panic() {
        show_usage();
        show_config(&Config::default());
    }

    #[test]
    fn test_empty_changes() {
        assert!(Changes::default().is_empty());
        let mut config = Config::default();
        assert!(!Changes::default().apply(&mut config));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_apply_changes() {
        let mut config = Config::default();
        let changes = Changes {
            process: Some("game.exe".to_string()),
            use_cache: Some(false),
            cache_ttl_ms: Some(0),
            ..Changes::default()
        };
        assert!(!changes.is_empty());
        assert!(changes.apply(&mut config));
        assert_eq!(config.process.as_deref(), Some("game.exe"));
        assert!(config.module.is_none());
        assert!(!config.use_cache);
        assert_eq!(config.cache_ttl_ms, 0);

        // Re-applying the same values is not a change
        let same = Changes {
            process: Some("game.exe".to_string()),
            ..Changes::default()
        };
        assert!(!same.apply(&mut config));
    }
}
