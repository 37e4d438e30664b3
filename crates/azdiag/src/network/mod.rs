//! Network helpers
//!
//! Timeouts and the shared HTTP client

mod timeout;

pub use timeout::*;
