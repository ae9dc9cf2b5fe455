//! Progress reporting module
//!
//! Item and byte progress bars for transfer batches.

mod reporter;

pub use reporter::*;
