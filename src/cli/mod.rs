//! # CLI Module
//!
//! ## Commands
//!
//! ### `serve`
//!
//! Serve the demo application:
//!
//! ```bash
//! machwire serve --addr 127.0.0.1:8080 --config config/config.yaml --workers 4
//! ```
//!
//! Options:
//! - `--addr <ADDR>` - Bind address (default `0.0.0.0:8080`, env `MACHWIRE_ADDR`)
//! - `--config <FILE>` - YAML configuration (env `MACHWIRE_CONFIG`)
//! - `--workers <N>` - Scheduler threads, overriding the configuration
//!
//! SIGINT and SIGTERM trigger a graceful stop.
//!
//! ### `routes`
//!
//! Print the routing table:
//!
//! ```bash
//! machwire routes
//! ```

mod commands;

#[cfg(test)]
mod tests;

pub use commands::{run, run_cli, Cli, Commands};
