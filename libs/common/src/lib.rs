//! Shared helpers for the Modbus tools
//!
//! - logging setup (console + daily file)
//! - graceful shutdown signal handling
//! - layered configuration loading

pub mod config_loader;
pub mod error;
pub mod logging;
pub mod shutdown;

pub use error::{Error, Result};
