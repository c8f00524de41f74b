//! CLI definitions

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "memscatter")]
#[command(about = "Batched scatter reads over live process memory", long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Target process selection shared by memory commands
#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Target process name (uses configured default if not provided)
    #[arg(short, long, env = "MEMSCATTER_PROCESS")]
    pub process: Option<String>,

    /// Bypass the page cache for this invocation
    #[arg(long)]
    pub no_cache: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Configure default settings
    #[command(visible_alias = "c")]
    Configure {
        /// Set default target process name
        #[arg(long)]
        process: Option<String>,

        /// Set module used for module-relative addresses
        #[arg(long)]
        module: Option<String>,

        /// Set default cache flag for reads
        #[arg(long)]
        use_cache: Option<bool>,

        /// Set lifetime of cached pages in milliseconds (0 disables)
        #[arg(long)]
        cache_ttl_ms: Option<u64>,

        /// Show current configuration
        #[arg(long)]
        show: bool,
    },

    /// Print the pid of a running process
    Pid {
        /// Executable name (e.g. "Game-Win64-Shipping.exe")
        name: String,
    },

    /// Print the base address of a loaded module
    Module {
        /// Module name (uses configured module if not provided)
        module: Option<String>,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Read bytes from memory and print a hex dump
    #[command(visible_alias = "r")]
    Read {
        /// Memory address (hex, e.g. 0x7f1234567890, or module+0x1234)
        address: String,

        /// Number of bytes to read
        #[arg(short, long, default_value = "64")]
        size: usize,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Follow a pointer chain and print the final address
    ReadPtr {
        /// Address of the first pointer
        address: String,

        /// Offsets applied after each dereference (e.g. 0x30,0x98)
        #[arg(short, long, value_delimiter = ',', allow_hyphen_values = true)]
        offsets: Vec<String>,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Write bytes to memory
    #[command(visible_alias = "w")]
    Write {
        /// Memory address (hex, e.g. 0x7f1234567890, or module+0x1234)
        address: String,

        /// Hex bytes to write (space-separated, e.g. "90 90 90")
        bytes: String,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Execute a scatter plan file
    #[command(visible_alias = "s")]
    Scatter {
        /// Path to the plan (TOML)
        plan: PathBuf,

        /// Print results as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        target: TargetArgs,
    },
}
