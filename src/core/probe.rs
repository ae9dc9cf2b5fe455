//! Size, metadata and version probing
//!
//! A probe is a single read-only request. Absence is a normal answer
//! (`Ok(None)`), since "destination does not exist yet" drives planning.

use super::metadata::{decode_attachment, CustomMetadata};
use crate::error::{Result, TransferError};
use crate::hash::ETag;
use crate::location::Location;
use crate::storage::{normalize_version, ObjectStore};
use std::sync::Arc;
use tracing::{debug, warn};

/// What a probe learned about an existing file or object
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
    /// Size in bytes
    pub size: u64,
    /// Store-reported tag (remote only)
    pub etag: Option<ETag>,
    /// Current version (remote, versioned buckets only)
    pub version: Option<String>,
    /// Decoded custom metadata; `None` when the attachment is unreadable
    pub metadata: Option<CustomMetadata>,
}

/// Fetches size, custom metadata and version of a location
#[derive(Clone)]
pub struct Prober {
    store: Arc<dyn ObjectStore>,
    metadata_key: String,
}

impl Prober {
    /// Create a prober reading the attachment stored under `metadata_key`
    pub fn new(store: Arc<dyn ObjectStore>, metadata_key: impl Into<String>) -> Self {
        Self {
            store,
            metadata_key: metadata_key.into(),
        }
    }

    /// Probe a location, returning `Ok(None)` when it does not exist
    #[tracing::instrument(skip_all, fields(location = %location))]
    pub async fn probe(&self, location: &Location) -> Result<Option<ObjectInfo>> {
        if location.is_local() {
            return probe_local(location).await;
        }

        let Some(head) = self.store.head_object(location).await? else {
            debug!("object not found");
            return Ok(None);
        };

        let metadata = match decode_attachment(&head.metadata, &self.metadata_key) {
            Ok(map) => Some(map),
            Err(e) => {
                warn!("ignoring unreadable metadata attachment: {}", e);
                None
            }
        };

        Ok(Some(ObjectInfo {
            size: head.size,
            etag: Some(head.etag),
            version: normalize_version(head.version),
            metadata,
        }))
    }

    /// Probe a location that must exist
    pub async fn require(&self, location: &Location) -> Result<ObjectInfo> {
        self.probe(location)
            .await?
            .ok_or_else(|| TransferError::NotFound(location.to_string()))
    }
}

async fn probe_local(location: &Location) -> Result<Option<ObjectInfo>> {
    let path = location.local_path();
    match tokio::fs::metadata(&path).await {
        Ok(meta) => Ok(Some(ObjectInfo {
            size: meta.len(),
            etag: None,
            version: None,
            metadata: Some(CustomMetadata::new()),
        })),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(TransferError::io(path, e)),
    }
}
