//! `jobrig-core` — configuration, logging and shared errors for the jobrig
//! test harness crates.

pub mod config;
pub mod error;
pub mod logging;

pub use config::JobrigConfig;
pub use error::{CoreError, Result};
