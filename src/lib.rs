//! # LakeCopy - Verified Data Movement for Object Storage
//!
//! LakeCopy moves files between local disks and S3-compatible buckets and
//! runs filtered queries against stored objects. Before uploading it
//! compares a locally computed ETag with the destination's, so unchanged
//! content is skipped or only has its metadata patched in place.
//!
//! ## Features
//!
//! - **Store-compatible ETags**: MD5 or MD5-of-part-MD5s, computed in a
//!   single streaming pass
//! - **Skip / patch / upload planning**: one probe per destination decides
//!   the cheapest correct action
//! - **Bounded parallel batches**: outcomes stay aligned with the input
//! - **Versioned outcomes**: results carry the version the store created
//! - **Select queries**: format inference and incremental decoding of
//!   framed responses
//!
//! ## Quick Start
//!
//! ```no_run
//! use lakecopy::config::TransferConfig;
//! use lakecopy::core::{Executor, TransferItem};
//! use lakecopy::location::Location;
//! use lakecopy::storage::ObjectStore;
//! use std::sync::Arc;
//!
//! # async fn example(store: Arc<dyn ObjectStore>) -> lakecopy::error::Result<()> {
//! let executor = Executor::new(store, TransferConfig::default())?;
//!
//! let item = TransferItem::new(
//!     Location::local("data/rows.csv")?,
//!     Location::parse("s3://bucket/rows.csv")?,
//!     1024,
//! );
//!
//! let result = executor.run(vec![item]).await?;
//! for outcome in &result.outcomes {
//!     match outcome {
//!         Ok(location) => println!("{location}"),
//!         Err(e) => eprintln!("{e}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Select Queries
//!
//! ```no_run
//! use lakecopy::config::SelectOptions;
//! use lakecopy::location::Location;
//! use lakecopy::select::QueryClient;
//! use lakecopy::storage::ObjectStore;
//! use std::sync::Arc;
//!
//! # async fn example(store: Arc<dyn ObjectStore>) -> lakecopy::error::Result<()> {
//! let client = QueryClient::new(store);
//! let location = Location::parse("s3://bucket/rows.json.gz")?;
//! let result = client
//!     .select(&location, "select * from S3Object", &SelectOptions::default())
//!     .await?;
//!
//! println!("columns: {:?}", result.columns());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod core;
pub mod error;
pub mod fs;
pub mod hash;
pub mod location;
pub mod progress;
pub mod select;
pub mod storage;

pub use error::{Result, TransferError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{SelectOptions, TransferConfig};
    pub use crate::core::{BatchResult, Copier, Executor, TransferItem};
    pub use crate::error::{Result, TransferError};
    pub use crate::fs::{ListEntry, Lister};
    pub use crate::hash::{compute_etag, ETag};
    pub use crate::location::Location;
    pub use crate::progress::ProgressReporter;
    pub use crate::select::{QueryClient, QueryResult};
    pub use crate::storage::ObjectStore;
}
