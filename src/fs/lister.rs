//! Tree listing
//!
//! Enumerates every file or object under a location as
//! `(relative path, size)` pairs. Local trees are walked depth-first with
//! entries sorted by file name on a blocking thread; remote prefixes follow
//! continuation tokens until the last page. Every call to [`Lister::list`]
//! starts a fresh walk.

use crate::error::{Result, TransferError};
use crate::location::Location;
use crate::storage::{bucket_and_key, ObjectStore, ObjectSummary};
use futures::future;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use walkdir::{DirEntry, WalkDir};

/// Entries buffered between the walking thread and the consumer
const WALK_CHANNEL_CAPACITY: usize = 256;

/// One listed file or object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntry {
    /// Path relative to the listed root, `/`-separated
    pub relative_path: String,
    /// Size in bytes
    pub size: u64,
}

impl ListEntry {
    fn new(relative_path: impl Into<String>, size: u64) -> Self {
        Self {
            relative_path: relative_path.into(),
            size,
        }
    }
}

/// Lists local directories and remote prefixes
#[derive(Clone)]
pub struct Lister {
    store: Arc<dyn ObjectStore>,
}

impl Lister {
    /// Create a lister using `store` for remote locations
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Lazily list everything under `location`
    pub fn list(&self, location: &Location) -> BoxStream<'static, Result<ListEntry>> {
        if location.is_local() {
            list_local(location.local_path())
        } else {
            list_remote(Arc::clone(&self.store), location)
        }
    }

    /// Collect a full listing
    pub async fn collect(&self, location: &Location) -> Result<Vec<ListEntry>> {
        self.list(location).try_collect().await
    }
}

/// Location of a listed entry under the root it was listed from.
///
/// A local root that is itself a file lists as its own name, and resolves
/// back to the root rather than to a child of it.
pub fn entry_location(root: &Location, entry: &ListEntry) -> Location {
    if root.is_local() && root.basename() == entry.relative_path && root.local_path().is_file() {
        return root.clone();
    }
    root.join(&entry.relative_path)
}

/// Walk a local tree on the blocking pool, streaming entries as they are found
pub fn list_local(root: PathBuf) -> BoxStream<'static, Result<ListEntry>> {
    stream::once(async move {
        let (tx, rx) = mpsc::channel(WALK_CHANNEL_CAPACITY);
        tokio::task::spawn_blocking(move || walk_local(&root, &tx));
        stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|entry| (entry, rx)) })
    })
    .flatten()
    .boxed()
}

fn walk_local(root: &Path, tx: &mpsc::Sender<Result<ListEntry>>) {
    let walker = WalkDir::new(root).follow_links(true).sort_by_file_name();
    for entry in walker {
        if let Some(entry) = local_entry(root, entry).transpose() {
            // Receiver dropped: nobody wants the rest of the walk
            if tx.blocking_send(entry).is_err() {
                return;
            }
        }
    }
}

fn local_entry(root: &Path, entry: walkdir::Result<DirEntry>) -> Result<Option<ListEntry>> {
    let entry = match entry {
        Ok(entry) => entry,
        Err(e) => {
            let path = e.path().unwrap_or(root).to_path_buf();
            return Err(TransferError::io(path, e.into()));
        }
    };
    if !entry.file_type().is_file() {
        return Ok(None);
    }

    let size = entry
        .metadata()
        .map_err(|e| TransferError::io(entry.path(), e.into()))?
        .len();

    let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
    let mut relative_path = slash_path(relative);
    if relative_path.is_empty() {
        // The root itself is a file
        relative_path = entry.file_name().to_string_lossy().into_owned();
    }
    Ok(Some(ListEntry::new(relative_path, size)))
}

fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(segment) => Some(segment.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

enum Page {
    First,
    Next(String),
    Done,
}

/// Page through every key under a remote prefix
fn list_remote(store: Arc<dyn ObjectStore>, location: &Location) -> BoxStream<'static, Result<ListEntry>> {
    let (bucket, prefix) = match bucket_and_key(location) {
        Ok((bucket, key)) => (bucket.to_string(), directory_prefix(key)),
        Err(e) => return stream::once(future::ready(Err(e))).boxed(),
    };

    let strip = prefix.clone();
    stream::try_unfold(Page::First, move |page| {
        next_page(Arc::clone(&store), bucket.clone(), prefix.clone(), page)
    })
    .map_ok(|objects| stream::iter(objects.into_iter().map(Ok::<_, TransferError>)))
    .try_flatten()
    .try_filter_map(move |object| future::ready(Ok(remote_entry(&strip, object))))
    .boxed()
}

async fn next_page(
    store: Arc<dyn ObjectStore>,
    bucket: String,
    prefix: String,
    page: Page,
) -> Result<Option<(Vec<ObjectSummary>, Page)>> {
    let token = match page {
        Page::Done => return Ok(None),
        Page::First => None,
        Page::Next(token) => Some(token),
    };
    let page = store.list_objects(&bucket, &prefix, token).await?;
    let next = page.next_token.map_or(Page::Done, Page::Next);
    Ok(Some((page.objects, next)))
}

fn directory_prefix(key: &str) -> String {
    if key.is_empty() || key.ends_with('/') {
        key.to_string()
    } else {
        format!("{key}/")
    }
}

fn remote_entry(prefix: &str, object: ObjectSummary) -> Option<ListEntry> {
    let relative = object.key.strip_prefix(prefix)?;
    // Directory markers have nothing after the prefix
    if relative.is_empty() || relative.ends_with('/') {
        return None;
    }
    Some(ListEntry::new(relative, object.size))
}
