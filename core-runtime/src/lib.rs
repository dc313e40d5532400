//! # Core Runtime Module
//!
//! Runtime infrastructure shared by every workshop core crate:
//! - Logging and tracing bootstrap ([`logging`])
//! - Configuration and bridge validation ([`config`])
//! - Typed event bus ([`events`])

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
