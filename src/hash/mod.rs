//! Content hashing module
//!
//! Computes ETags that reproduce the object store's own integrity tags
//! (plain MD5 for single-part uploads, MD5-of-part-MD5s for multipart
//! uploads) plus SHA-256 content digests.

mod digest;
mod etag;

pub use digest::*;
pub use etag::*;
