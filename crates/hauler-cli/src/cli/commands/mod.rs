//! CLI command handlers, one file per command.

mod checksum;
mod config;
mod fetch;

pub use checksum::run_checksum;
pub use config::run_config;
pub use fetch::{run_fetch, FetchOptions};
