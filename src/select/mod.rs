//! Select query module
//!
//! Format inference, request construction and incremental decoding of
//! framed select responses into row tables.

mod client;
mod decoder;

pub use client::*;
pub use decoder::*;
