//! Transfer planning
//!
//! Decides per item whether an upload can be skipped, reduced to a
//! metadata-only patch, or needs the full body:
//!
//! 1. destination absent: full upload
//! 2. size differs: full upload
//! 3. size and ETag match: skip when the metadata attachment already
//!    matches, otherwise patch the metadata in place
//! 4. size matches but ETag differs: full upload
//!
//! Transfers that do not upload a local file to the store bypass planning.

use super::metadata::CustomMetadata;
use super::probe::Prober;
use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::hash::{compute_etag, ETag, EtagConfig};
use crate::location::{Location, LocationKind};
use crate::storage::ObjectStore;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// One file or object to move
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferItem {
    /// Where to read from
    pub source: Location,
    /// Where to write to
    pub destination: Location,
    /// Size of the source in bytes
    pub size: u64,
    /// Custom metadata to attach to the destination
    pub metadata: Option<CustomMetadata>,
}

impl TransferItem {
    /// Create an item without custom metadata
    pub fn new(source: Location, destination: Location, size: u64) -> Self {
        Self {
            source,
            destination,
            size,
            metadata: None,
        }
    }

    /// Attach custom metadata
    pub fn with_metadata(mut self, metadata: CustomMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Why a full upload was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadReason {
    /// Item is below the probe threshold
    NotProbed,
    /// Destination does not exist
    NotFound,
    /// Destination size differs
    SizeMismatch,
    /// Same size, different content
    EtagMismatch,
}

/// What to do for one transfer item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferAction {
    /// Local to local byte copy
    LocalCopy,
    /// Remote to local download
    Download,
    /// Server-side copy between remote locations
    RemoteCopy,
    /// Upload the whole body
    Upload(UploadReason),
    /// Replace only the metadata of identical content, guarded by its tag
    PatchMetadata {
        /// Tag the destination must still carry
        etag: ETag,
        /// Probed destination version
        version: Option<String>,
    },
    /// Destination already holds identical content and metadata
    Skip {
        /// Probed destination version
        version: Option<String>,
    },
}

impl TransferAction {
    /// Check if this action sends the object body
    pub fn is_upload(&self) -> bool {
        matches!(self, Self::Upload(_))
    }
}

/// Chooses the cheapest correct action for each transfer item
#[derive(Clone)]
pub struct Planner {
    prober: Prober,
    config: TransferConfig,
}

impl Planner {
    /// Create a planner
    pub fn new(store: Arc<dyn ObjectStore>, config: TransferConfig) -> Self {
        Self {
            prober: Prober::new(store, config.metadata_key.clone()),
            config,
        }
    }

    /// The prober used for destination checks
    pub fn prober(&self) -> &Prober {
        &self.prober
    }

    /// Plan one item
    #[tracing::instrument(skip_all, fields(source = %item.source, destination = %item.destination))]
    pub async fn plan(&self, item: &TransferItem) -> Result<TransferAction> {
        let action = match (item.source.kind(), item.destination.kind()) {
            (LocationKind::Local, LocationKind::Local) => TransferAction::LocalCopy,
            (LocationKind::Remote, LocationKind::Local) => TransferAction::Download,
            (LocationKind::Remote, LocationKind::Remote) => TransferAction::RemoteCopy,
            (LocationKind::Local, LocationKind::Remote) => self.plan_upload(item).await?,
        };
        debug!(?action, "planned transfer");
        Ok(action)
    }

    async fn plan_upload(&self, item: &TransferItem) -> Result<TransferAction> {
        if item.size < self.config.probe_min_size {
            return Ok(TransferAction::Upload(UploadReason::NotProbed));
        }

        let Some(existing) = self.prober.probe(&item.destination.latest()).await? else {
            return Ok(TransferAction::Upload(UploadReason::NotFound));
        };

        if existing.size != item.size {
            return Ok(TransferAction::Upload(UploadReason::SizeMismatch));
        }

        let Some(remote_etag) = existing.etag else {
            return Ok(TransferAction::Upload(UploadReason::EtagMismatch));
        };
        let local = local_etag(item.source.local_path(), self.config.etag_config()).await?;
        if local != remote_etag {
            debug!(%local, remote = %remote_etag, "content differs");
            return Ok(TransferAction::Upload(UploadReason::EtagMismatch));
        }

        let desired = item.metadata.clone().unwrap_or_default();
        if existing.metadata.as_ref() == Some(&desired) {
            Ok(TransferAction::Skip {
                version: existing.version,
            })
        } else {
            Ok(TransferAction::PatchMetadata {
                etag: remote_etag,
                version: existing.version,
            })
        }
    }
}

/// Hash a local file off the async runtime
async fn local_etag(path: PathBuf, config: EtagConfig) -> Result<ETag> {
    tokio::task::spawn_blocking(move || {
        compute_etag(&path, config.part_size, config.multipart_threshold)
    })
    .await
    .map_err(|e| TransferError::Join(e.to_string()))?
}
