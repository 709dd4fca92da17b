//! Infrastructure adapters for external systems.

pub mod catalog;
pub mod invokers;
pub mod sqlite;
