//! reelkit Common Utilities
//!
//! Shared infrastructure for all reelkit crates:
//! - The 96 kHz tick timebase shared by content and output timelines
//! - Error types and result aliases
//! - Tracing/logging initialization
//! - Configuration loading

pub mod config;
pub mod error;
pub mod logging;
pub mod time;

pub use config::*;
pub use error::*;
pub use time::*;
