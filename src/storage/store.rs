//! Remote object store contract
//!
//! The store is an injected dependency: every component that talks to the
//! remote side takes an `Arc<dyn ObjectStore>`, so tests can substitute an
//! in-memory implementation.

use crate::config::{Compression, DataFormat};
use crate::error::{Result, TransferError};
use crate::hash::ETag;
use crate::location::Location;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Version id some stores report for objects in unversioned buckets
pub const NULL_VERSION: &str = "null";

/// User metadata attached to an object
pub type UserMetadata = HashMap<String, String>;

/// Size, tag, version and user metadata of a remote object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHead {
    /// Content length in bytes
    pub size: u64,
    /// Integrity tag reported by the store
    pub etag: ETag,
    /// Current version, `None` for unversioned buckets
    pub version: Option<String>,
    /// User metadata map
    pub metadata: UserMetadata,
}

/// Content of a put request
#[derive(Debug, Clone)]
pub enum Body {
    /// Upload the content of a local file
    File(PathBuf),
    /// Upload in-memory bytes
    Bytes(Bytes),
}

/// Upload of a whole object body
#[derive(Debug, Clone)]
pub struct PutRequest {
    /// Destination (the version is ignored)
    pub destination: Location,
    /// Object body
    pub body: Body,
    /// User metadata to attach
    pub metadata: UserMetadata,
}

/// Result of a put or copy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteResponse {
    /// Version created, if the bucket is versioned
    pub version: Option<String>,
    /// Tag of the new object, when reported
    pub etag: Option<ETag>,
}

/// Server-side copy that replaces the destination's user metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyRequest {
    /// Source object; its version, if any, is copied
    pub source: Location,
    /// Destination object
    pub destination: Location,
    /// Copy only if the source still carries this tag
    pub if_match: Option<ETag>,
    /// Replacement user metadata
    pub metadata: UserMetadata,
}

/// Streamed object body with its metadata
pub struct GetResponse {
    /// Content length in bytes
    pub size: u64,
    /// Version served
    pub version: Option<String>,
    /// User metadata map
    pub metadata: UserMetadata,
    /// Body chunks
    pub body: BoxStream<'static, Result<Bytes>>,
}

/// One listed object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSummary {
    /// Full object key
    pub key: String,
    /// Size in bytes
    pub size: u64,
}

/// One page of a listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Objects on this page, in key order
    pub objects: Vec<ObjectSummary>,
    /// Token for the next page, `None` on the last page
    pub next_token: Option<String>,
}

/// Query language of a select expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExpressionType {
    /// SQL
    #[default]
    Sql,
}

/// Describes how the store should parse the queried object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSerialization {
    /// Record format
    pub format: DataFormat,
    /// Compression of the stored object
    pub compression: Compression,
}

/// Describes how the store should encode result rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputSerialization {
    /// One JSON object per record, separated by the delimiter byte
    Json {
        /// Record delimiter
        record_delimiter: u8,
    },
}

impl OutputSerialization {
    /// Record delimiter of the encoded output
    pub fn record_delimiter(&self) -> u8 {
        match self {
            Self::Json { record_delimiter } => *record_delimiter,
        }
    }
}

impl Default for OutputSerialization {
    fn default() -> Self {
        Self::Json {
            record_delimiter: b'\n',
        }
    }
}

/// Filtered read against one object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectRequest {
    /// Object to query
    pub location: Location,
    /// Query text, passed through verbatim
    pub expression: String,
    /// Query language
    pub expression_type: ExpressionType,
    /// Input description
    pub input: InputSerialization,
    /// Output description
    pub output: OutputSerialization,
}

/// Scan statistics reported at the end of a select
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    /// Bytes read from storage
    pub bytes_scanned: u64,
    /// Bytes processed after decompression
    pub bytes_processed: u64,
    /// Bytes returned to the client
    pub bytes_returned: u64,
}

/// One unit of a streamed select response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectFrame {
    /// Opaque chunk of encoded records; boundaries are arbitrary
    Records(Bytes),
    /// Final scan statistics
    Stats(ScanStats),
    /// End of stream marker
    End,
}

/// Stream of select frames
pub type FrameStream = BoxStream<'static, Result<SelectFrame>>;

/// Remote object store operations used by the transfer engine
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch size, tag, version and metadata; `Ok(None)` when absent
    async fn head_object(&self, location: &Location) -> Result<Option<ObjectHead>>;

    /// Upload a whole object
    async fn put_object(&self, request: PutRequest) -> Result<WriteResponse>;

    /// Server-side copy replacing user metadata.
    ///
    /// Fails with [`TransferError::PreconditionFailed`] when `if_match` is
    /// set and the source tag no longer matches.
    async fn copy_object(&self, request: CopyRequest) -> Result<WriteResponse>;

    /// Stream an object body
    async fn get_object(&self, location: &Location) -> Result<GetResponse>;

    /// Fetch one page of keys under `prefix`
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ListPage>;

    /// Run a filtered query and stream the framed response
    async fn select_object_content(&self, request: SelectRequest) -> Result<FrameStream>;
}

/// Split a remote location into bucket and key
pub fn bucket_and_key(location: &Location) -> Result<(&str, &str)> {
    match location.container() {
        Some(bucket) if location.is_remote() => Ok((bucket, location.key())),
        _ => Err(TransferError::InvalidLocation(format!(
            "{location}: expected a remote location"
        ))),
    }
}

/// Treat the literal `null` version of unversioned buckets as no version
pub fn normalize_version(version: Option<String>) -> Option<String> {
    version.filter(|v| !v.is_empty() && v != NULL_VERSION)
}
