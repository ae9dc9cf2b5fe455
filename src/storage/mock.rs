//! In-memory object store for tests
//!
//! Records every request so tests can assert exactly which remote calls a
//! transfer made, and supports versioned buckets, injected write failures,
//! rejected copy guards and scripted select frames.

use super::store::*;
use crate::error::{IoResultExt, Result, TransferError};
use crate::hash::{etag_bytes, ETag, EtagConfig};
use crate::location::Location;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

/// A request received by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Request {
    Head(Location),
    Put {
        destination: Location,
        metadata: UserMetadata,
        size: u64,
    },
    Copy(CopyRequest),
    Get(Location),
    List {
        bucket: String,
        prefix: String,
        continuation: Option<String>,
    },
    Select(SelectRequest),
}

impl Request {
    pub(crate) fn is_head(&self) -> bool {
        matches!(self, Request::Head(_))
    }

    pub(crate) fn is_put(&self) -> bool {
        matches!(self, Request::Put { .. })
    }

    pub(crate) fn is_copy(&self) -> bool {
        matches!(self, Request::Copy(_))
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    metadata: UserMetadata,
    version: Option<String>,
    etag: ETag,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<(String, String), StoredObject>,
    requests: Vec<Request>,
    next_version: u64,
    failing_keys: HashSet<String>,
    rejected_guards: usize,
    select_frames: Vec<SelectFrame>,
}

pub(crate) struct MockStore {
    state: Mutex<State>,
    versioned: HashSet<String>,
    etag_config: EtagConfig,
    page_size: usize,
}

impl MockStore {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            versioned: HashSet::new(),
            etag_config: EtagConfig::default(),
            page_size: 1000,
        }
    }

    /// Mark `bucket` as versioned; other buckets report the `null` version
    pub(crate) fn versioned(mut self, bucket: &str) -> Self {
        self.versioned.insert(bucket.to_string());
        self
    }

    pub(crate) fn with_etag_config(mut self, config: EtagConfig) -> Self {
        self.etag_config = config;
        self
    }

    pub(crate) fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Store an object directly, without recording a request
    pub(crate) fn insert(
        &self,
        bucket: &str,
        key: &str,
        data: impl Into<Bytes>,
        metadata: UserMetadata,
    ) -> Option<String> {
        let data = data.into();
        let etag = etag_bytes(&data, &self.etag_config);
        let mut state = self.state.lock().unwrap();
        let version = self.next_version(bucket, &mut state);
        state.objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data,
                metadata,
                version: version.clone(),
                etag,
            },
        );
        version
    }

    /// Make every put or copy to `key` fail
    pub(crate) fn fail_writes_to(&self, key: &str) {
        self.state.lock().unwrap().failing_keys.insert(key.to_string());
    }

    /// Reject the next `count` conditional copies as if the source changed
    pub(crate) fn reject_next_guards(&self, count: usize) {
        self.state.lock().unwrap().rejected_guards = count;
    }

    pub(crate) fn set_select_frames(&self, frames: Vec<SelectFrame>) {
        self.state.lock().unwrap().select_frames = frames;
    }

    pub(crate) fn requests(&self) -> Vec<Request> {
        self.state.lock().unwrap().requests.clone()
    }

    pub(crate) fn count(&self, predicate: impl Fn(&Request) -> bool) -> usize {
        self.requests().iter().filter(|r| predicate(r)).count()
    }

    /// Content, metadata and version of a stored object
    pub(crate) fn object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Option<(Bytes, UserMetadata, Option<String>)> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| (o.data.clone(), o.metadata.clone(), o.version.clone()))
    }

    fn next_version(&self, bucket: &str, state: &mut State) -> Option<String> {
        if self.versioned.contains(bucket) {
            state.next_version += 1;
            Some(format!("v{}", state.next_version))
        } else {
            Some(NULL_VERSION.to_string())
        }
    }

    fn record(&self, request: Request) {
        self.state.lock().unwrap().requests.push(request);
    }

    fn lookup(&self, location: &Location) -> Option<StoredObject> {
        let (bucket, key) = bucket_and_key(location).ok()?;
        let state = self.state.lock().unwrap();
        let object = state.objects.get(&(bucket.to_string(), key.to_string()))?;
        match location.version() {
            Some(v) if object.version.as_deref() != Some(v) => None,
            _ => Some(object.clone()),
        }
    }

    fn store(
        &self,
        destination: &Location,
        data: Bytes,
        etag: ETag,
        metadata: UserMetadata,
    ) -> Result<WriteResponse> {
        let (bucket, key) = bucket_and_key(destination)?;
        let mut state = self.state.lock().unwrap();
        if state.failing_keys.contains(key) {
            return Err(TransferError::transfer("put_object", destination, "injected failure"));
        }
        let version = self.next_version(bucket, &mut state);
        state.objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data,
                metadata,
                version: version.clone(),
                etag: etag.clone(),
            },
        );
        Ok(WriteResponse {
            version,
            etag: Some(etag),
        })
    }
}

#[async_trait]
impl ObjectStore for MockStore {
    async fn head_object(&self, location: &Location) -> Result<Option<ObjectHead>> {
        self.record(Request::Head(location.clone()));
        Ok(self.lookup(location).map(|object| ObjectHead {
            size: object.data.len() as u64,
            etag: object.etag,
            version: object.version,
            metadata: object.metadata,
        }))
    }

    async fn put_object(&self, request: PutRequest) -> Result<WriteResponse> {
        let data = match &request.body {
            Body::File(path) => Bytes::from(tokio::fs::read(path).await.with_path(path)?),
            Body::Bytes(bytes) => bytes.clone(),
        };
        self.record(Request::Put {
            destination: request.destination.clone(),
            metadata: request.metadata.clone(),
            size: data.len() as u64,
        });
        let etag = etag_bytes(&data, &self.etag_config);
        self.store(&request.destination, data, etag, request.metadata)
    }

    async fn copy_object(&self, request: CopyRequest) -> Result<WriteResponse> {
        self.record(Request::Copy(request.clone()));
        let source = self.lookup(&request.source).ok_or_else(|| {
            TransferError::transfer("copy_object", &request.source, "NoSuchKey")
        })?;

        if let Some(expected) = &request.if_match {
            let mut state = self.state.lock().unwrap();
            if state.rejected_guards > 0 {
                state.rejected_guards -= 1;
                return Err(TransferError::PreconditionFailed(request.source.to_string()));
            }
            if *expected != source.etag {
                return Err(TransferError::PreconditionFailed(request.source.to_string()));
            }
        }

        self.store(&request.destination, source.data, source.etag, request.metadata)
    }

    async fn get_object(&self, location: &Location) -> Result<GetResponse> {
        self.record(Request::Get(location.clone()));
        let object = self
            .lookup(location)
            .ok_or_else(|| TransferError::NotFound(location.to_string()))?;

        // Serve the body in small chunks to exercise reassembly
        let chunks: Vec<Result<Bytes>> = object
            .data
            .chunks(7)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();

        Ok(GetResponse {
            size: object.data.len() as u64,
            version: object.version,
            metadata: object.metadata,
            body: stream::iter(chunks).boxed(),
        })
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ListPage> {
        self.record(Request::List {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            continuation: continuation.clone(),
        });

        let start: usize = match continuation {
            Some(token) => token
                .parse()
                .map_err(|_| TransferError::transfer("list_objects", bucket, "bad token"))?,
            None => 0,
        };

        let state = self.state.lock().unwrap();
        let matching: Vec<ObjectSummary> = state
            .objects
            .iter()
            .filter(|((b, k), _)| b == bucket && k.starts_with(prefix))
            .map(|((_, k), o)| ObjectSummary {
                key: k.clone(),
                size: o.data.len() as u64,
            })
            .collect();

        let end = (start + self.page_size).min(matching.len());
        Ok(ListPage {
            objects: matching[start.min(end)..end].to_vec(),
            next_token: (end < matching.len()).then(|| end.to_string()),
        })
    }

    async fn select_object_content(&self, request: SelectRequest) -> Result<FrameStream> {
        self.record(Request::Select(request));
        let frames = self.state.lock().unwrap().select_frames.clone();
        Ok(stream::iter(frames.into_iter().map(Ok)).boxed())
    }
}
