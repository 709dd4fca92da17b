//! Domain layer for the Colony orchestration core
//!
//! This module contains the item and job models and the ports adapters implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult, InvocationError};
