//! Command-line interface components
//!
//! This module contains CLI-specific code for the mirror director: argument
//! parsing and the command handlers.

pub mod args;
pub mod commands;

pub use args::{
    CacheAction, CacheArgs, Cli, Commands, GlobalArgs, InventoryArgs, MonitorArgs, ResolveArgs,
    ScanArgs,
};
pub use commands::{
    handle_cache, handle_inventory, handle_monitor, handle_resolve, handle_scan, load_config,
};
