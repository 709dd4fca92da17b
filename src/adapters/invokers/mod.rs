//! Worker invoker implementations.

pub mod http;

pub use http::{HttpInvokerConfig, HttpWorkerInvoker};
