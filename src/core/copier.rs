//! Single-item transfers
//!
//! Applies the planned action for one item and reports the resulting
//! destination, pinned to the version the store created when there is one.

use super::metadata::{decode_attachment, encode_attachment, CustomMetadata};
use super::planner::{Planner, TransferAction, TransferItem};
use crate::config::TransferConfig;
use crate::error::{IoResultExt, Result, TransferError};
use crate::hash::ETag;
use crate::location::Location;
use crate::storage::{
    normalize_version, Body, CopyRequest, ObjectStore, PutRequest, WriteResponse,
};
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::TryStreamExt;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Copies one file or object at a time
#[derive(Clone)]
pub struct Copier {
    store: Arc<dyn ObjectStore>,
    planner: Planner,
    config: TransferConfig,
}

impl Copier {
    /// Create a copier after validating `config`
    pub fn new(store: Arc<dyn ObjectStore>, config: TransferConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            planner: Planner::new(Arc::clone(&store), config.clone()),
            store,
            config,
        })
    }

    /// Active configuration
    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Planner used for upload decisions
    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    /// Copy `source` to `destination`, looking up the source size first
    pub async fn copy_file(
        &self,
        source: &Location,
        destination: &Location,
        metadata: Option<CustomMetadata>,
    ) -> Result<Location> {
        let size = self.planner.prober().require(source).await?.size;
        let mut item = TransferItem::new(source.clone(), destination.clone(), size);
        item.metadata = metadata;
        self.transfer(&item).await
    }

    /// Plan and perform one transfer
    pub async fn transfer(&self, item: &TransferItem) -> Result<Location> {
        let action = self.planner.plan(item).await?;
        let outcome = match action {
            TransferAction::LocalCopy => copy_local(item).await,
            TransferAction::Download => self.download(item).await,
            TransferAction::RemoteCopy => self.copy_remote(item).await,
            TransferAction::Upload(reason) => {
                debug!(?reason, destination = %item.destination, "uploading");
                self.upload(item).await
            }
            TransferAction::Skip { version } => {
                debug!(destination = %item.destination, "destination up to date");
                Ok(item.destination.latest().with_optional_version(version))
            }
            TransferAction::PatchMetadata { etag, version } => {
                match self.patch_metadata(item, etag, version).await {
                    Err(TransferError::PreconditionFailed(location)) => {
                        warn!(%location, "destination changed during metadata patch, uploading");
                        self.upload(item).await
                    }
                    other => other,
                }
            }
        };

        if let Ok(location) = &outcome {
            info!(source = %item.source, destination = %location, "transferred");
        }
        outcome
    }

    /// Read a whole file or object into memory with its custom metadata
    pub async fn get_bytes(&self, location: &Location) -> Result<(Bytes, CustomMetadata)> {
        if location.is_local() {
            let path = location.local_path();
            let data = tokio::fs::read(&path).await.with_path(&path)?;
            return Ok((Bytes::from(data), CustomMetadata::new()));
        }

        let response = self.store.get_object(location).await?;
        let metadata = decode_attachment(&response.metadata, &self.config.metadata_key)?;
        let mut buffer = BytesMut::with_capacity(response.size as usize);
        let mut body = response.body;
        while let Some(chunk) = body.try_next().await? {
            buffer.extend_from_slice(&chunk);
        }
        Ok((buffer.freeze(), metadata))
    }

    /// Write in-memory bytes to a file or object
    pub async fn put_bytes(
        &self,
        data: Bytes,
        destination: &Location,
        metadata: Option<&CustomMetadata>,
    ) -> Result<Location> {
        if destination.is_local() {
            let path = destination.local_path();
            create_parent(&path).await?;
            tokio::fs::write(&path, &data).await.with_path(&path)?;
            return Ok(destination.clone());
        }

        let destination = destination.latest();
        let response = self
            .store
            .put_object(PutRequest {
                destination: destination.clone(),
                body: Body::Bytes(data),
                metadata: encode_attachment(metadata, &self.config.metadata_key)?,
            })
            .await?;
        Ok(pinned(&destination, response))
    }

    async fn upload(&self, item: &TransferItem) -> Result<Location> {
        let destination = item.destination.latest();
        let response = self
            .store
            .put_object(PutRequest {
                destination: destination.clone(),
                body: Body::File(item.source.local_path()),
                metadata: encode_attachment(item.metadata.as_ref(), &self.config.metadata_key)?,
            })
            .await?;
        Ok(pinned(&destination, response))
    }

    async fn patch_metadata(
        &self,
        item: &TransferItem,
        etag: ETag,
        version: Option<String>,
    ) -> Result<Location> {
        let destination = item.destination.latest();
        let response = self
            .store
            .copy_object(CopyRequest {
                source: destination.with_optional_version(version),
                destination: destination.clone(),
                if_match: Some(etag),
                metadata: encode_attachment(item.metadata.as_ref(), &self.config.metadata_key)?,
            })
            .await?;
        Ok(pinned(&destination, response))
    }

    async fn copy_remote(&self, item: &TransferItem) -> Result<Location> {
        let destination = item.destination.latest();
        let response = self
            .store
            .copy_object(CopyRequest {
                source: item.source.clone(),
                destination: destination.clone(),
                if_match: None,
                metadata: encode_attachment(item.metadata.as_ref(), &self.config.metadata_key)?,
            })
            .await?;
        Ok(pinned(&destination, response))
    }

    async fn download(&self, item: &TransferItem) -> Result<Location> {
        let response = self.store.get_object(&item.source).await?;
        let path = item.destination.local_path();
        let written = write_stream(&path, response.body).await?;
        debug!(bytes = written, path = %path.display(), "downloaded");
        Ok(item.destination.clone())
    }
}

fn pinned(destination: &Location, response: WriteResponse) -> Location {
    destination.with_optional_version(normalize_version(response.version))
}

async fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.with_path(parent)?;
    }
    Ok(())
}

async fn copy_local(item: &TransferItem) -> Result<Location> {
    let source = item.source.local_path();
    let destination = item.destination.local_path();
    create_parent(&destination).await?;
    tokio::fs::copy(&source, &destination)
        .await
        .with_path(&source)?;
    Ok(item.destination.clone())
}

async fn write_stream(path: &Path, mut body: BoxStream<'static, Result<Bytes>>) -> Result<u64> {
    create_parent(path).await?;
    let mut file = tokio::fs::File::create(path).await.with_path(path)?;
    let mut written = 0u64;
    while let Some(chunk) = body.try_next().await? {
        file.write_all(&chunk).await.with_path(path)?;
        written += chunk.len() as u64;
    }
    file.flush().await.with_path(path)?;
    Ok(written)
}
