//! Core transfer engine module
//!
//! Probes destinations, plans each transfer (skip, metadata patch or full
//! upload), performs single transfers and runs batches on a bounded
//! worker pool with index-aligned results.

mod copier;
mod executor;
mod metadata;
mod planner;
mod probe;

pub use copier::*;
pub use executor::*;
pub use metadata::*;
pub use planner::*;
pub use probe::*;
