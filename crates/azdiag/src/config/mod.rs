//! Configuration
//!
//! Every setting is addressed by the environment variable that holds it

mod settings;

pub use settings::*;
