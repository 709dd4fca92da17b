//! Infrastructure layer module
//!
//! Cross-cutting concerns the hosts wire together:
//! - Configuration management
//! - Logging infrastructure

pub mod config;
pub mod logging;
