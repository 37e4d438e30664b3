//! Telemetry
//!
//! Application Insights items buffered in memory and posted in batches

mod config;
mod sanitizer;
mod tracker;
mod types;

pub use config::*;
pub use sanitizer::*;
pub use tracker::*;
pub use types::*;
