//! CLI command implementations.

pub mod goal;
pub mod init;
pub mod job;
pub mod run;
pub mod task;
pub mod worker;
