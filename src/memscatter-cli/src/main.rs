mod address;
mod cli;
mod commands;
mod config;
mod plan;
mod process;

use anyhow::Result;
use clap::Parser;
use config::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::*;

/// Default filter for a `-v` count
fn default_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "memscatter=warn",
        1 => "memscatter=debug",
        _ => "memscatter=trace",
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(cli.verbose).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::load()?;

    match cli.command {
        Commands::Configure {
            process,
            module,
            use_cache,
            cache_ttl_ms,
            show,
        } => {
            let changes = commands::configure::Changes {
                process,
                module,
                use_cache,
                cache_ttl_ms,
            };
            commands::configure::handle(changes, show)?;
        }

        Commands::Pid { name } => {
            commands::memory::handle_pid(&config, &name)?;
        }

        Commands::Module { module, target } => {
            let target = commands::attach(&config, &target)?;
            commands::memory::handle_module(&target, module.as_deref())?;
        }

        Commands::Read {
            address,
            size,
            target,
        } => {
            let target = commands::attach(&config, &target)?;
            commands::memory::handle_read(&target, &address, size)?;
        }

        Commands::ReadPtr {
            address,
            offsets,
            target,
        } => {
            let target = commands::attach(&config, &target)?;
            commands::memory::handle_read_ptr(&target, &address, &offsets)?;
        }

        Commands::Write {
            address,
            bytes,
            target,
        } => {
            let target = commands::attach(&config, &target)?;
            commands::memory::handle_write(&target, &address, &bytes)?;
        }

        Commands::Scatter { plan, json, target } => {
            let target = commands::attach(&config, &target)?;
            commands::scatter::handle(&target, &plan, json)?;
        }
    }

    Ok(())
}
