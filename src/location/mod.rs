//! Location module
//!
//! A [`Location`] addresses either a local file or a remote object
//! (bucket, key and optional version) behind one URL-shaped representation.

mod address;

pub use address::*;
