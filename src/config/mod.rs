//! Configuration module for LakeCopy
//!
//! Provides CLI arguments, environment-driven transfer settings and
//! per-query select options.

mod settings;

pub use settings::*;
