//! Object storage module
//!
//! Defines the [`ObjectStore`] contract the transfer engine consumes
//! (head, put, conditional copy, get, paginated list and filtered select)
//! and a native implementation on top of the AWS SDK.

mod store;

#[cfg(feature = "native_s3")]
mod native_s3;

#[cfg(test)]
pub(crate) mod mock;

pub use store::*;

#[cfg(feature = "native_s3")]
pub use native_s3::*;
