//! Native AWS S3 SDK backend
//!
//! Implements [`ObjectStore`] on top of `aws-sdk-s3`. Supports
//! S3-compatible endpoints (MinIO, Wasabi, etc.) through a custom endpoint
//! and path-style addressing. Uploads above the multipart threshold are
//! split with the configured part size so stored ETags match locally
//! computed ones.

use super::store::*;
use crate::config::{Compression, DataFormat};
use crate::error::{IoResultExt, Result, TransferError};
use crate::hash::{ETag, EtagConfig};
use crate::location::Location;
use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    CompletedMultipartUpload, CompletedPart, CompressionType, CsvInput, FileHeaderInfo,
    JsonInput, JsonOutput, JsonType, MetadataDirective, ParquetInput,
    SelectObjectContentEventStream, Stats,
};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// Characters left unescaped in a copy source (besides alphanumerics)
const COPY_SOURCE_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Connection settings for the native S3 backend
#[derive(Debug, Clone)]
pub struct S3Config {
    /// AWS region (e.g., "us-east-1")
    pub region: String,
    /// Custom endpoint URL for S3-compatible services (MinIO, Wasabi)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for some S3-compatible services)
    pub force_path_style: bool,
    /// Access key ID (optional, falls back to AWS credential chain)
    pub access_key_id: Option<String>,
    /// Secret access key (optional, falls back to AWS credential chain)
    pub secret_access_key: Option<String>,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint_url: None,
            force_path_style: false,
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

impl S3Config {
    /// Read `AWS_REGION` and the `LAKECOPY_S3_*` variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(region) = std::env::var("AWS_REGION") {
            config.region = region;
        }
        config.endpoint_url = std::env::var("LAKECOPY_S3_ENDPOINT").ok();
        config.force_path_style = std::env::var("LAKECOPY_S3_PATH_STYLE")
            .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        config.access_key_id = std::env::var("LAKECOPY_S3_ACCESS_KEY_ID").ok();
        config.secret_access_key = std::env::var("LAKECOPY_S3_SECRET_ACCESS_KEY").ok();
        config
    }
}

/// Object store backed by the AWS SDK
pub struct NativeS3Store {
    client: aws_sdk_s3::Client,
    etag_config: EtagConfig,
}

impl NativeS3Store {
    /// Create a store; `etag_config` decides single versus multipart uploads
    pub async fn new(config: S3Config, etag_config: EtagConfig) -> Result<Self> {
        etag_config.validate()?;

        let mut aws_config_builder = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));

        if let Some(ref endpoint) = config.endpoint_url {
            aws_config_builder = aws_config_builder.endpoint_url(endpoint);
        }

        if let (Some(ref key_id), Some(ref secret)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let creds = aws_credential_types::Credentials::new(
                key_id,
                secret,
                None,
                None,
                "lakecopy-static",
            );
            aws_config_builder = aws_config_builder.credentials_provider(creds);
        }

        let aws_config = aws_config_builder.load().await;

        let mut s3_config = aws_sdk_s3::config::Builder::from(&aws_config);
        if config.force_path_style {
            s3_config = s3_config.force_path_style(true);
        }

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(s3_config.build()),
            etag_config,
        })
    }

    async fn put_single(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        metadata: UserMetadata,
    ) -> Result<WriteResponse> {
        let response = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .set_metadata(Some(metadata))
            .send()
            .await
            .map_err(|e| sdk_failure("put_object", bucket, key, e))?;

        Ok(WriteResponse {
            version: response.version_id().map(str::to_string),
            etag: response.e_tag().map(ETag::parse),
        })
    }

    async fn put_multipart(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        size: u64,
        metadata: UserMetadata,
    ) -> Result<WriteResponse> {
        let create = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .set_metadata(Some(metadata))
            .send()
            .await
            .map_err(|e| sdk_failure("create_multipart_upload", bucket, key, e))?;

        let upload_id = create
            .upload_id()
            .ok_or_else(|| {
                TransferError::transfer("create_multipart_upload", key, "missing upload id")
            })?
            .to_string();

        match self.upload_parts(bucket, key, &upload_id, path, size).await {
            Ok(parts) => {
                let completed = CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build();
                let response = self
                    .client
                    .complete_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(completed)
                    .send()
                    .await
                    .map_err(|e| sdk_failure("complete_multipart_upload", bucket, key, e))?;

                Ok(WriteResponse {
                    version: response.version_id().map(str::to_string),
                    etag: response.e_tag().map(ETag::parse),
                })
            }
            Err(e) => {
                if let Err(abort) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(key, "failed to abort multipart upload: {}", DisplayErrorContext(abort));
                }
                Err(e)
            }
        }
    }

    /// Upload one part at a time; at most one part is held in memory
    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        path: &Path,
        size: u64,
    ) -> Result<Vec<CompletedPart>> {
        let mut file = tokio::fs::File::open(path).await.with_path(path)?;
        let part_size = self.etag_config.part_size;
        let mut parts = Vec::new();
        let mut offset = 0u64;
        let mut part_number = 1i32;

        while offset < size {
            let len = part_size.min(size - offset) as usize;
            let mut chunk = vec![0u8; len];
            file.read_exact(&mut chunk).await.with_path(path)?;

            let upload_part = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk))
                .send()
                .await
                .map_err(|e| sdk_failure("upload_part", bucket, key, e))?;

            parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(upload_part.e_tag().map(str::to_string))
                    .build(),
            );

            offset += len as u64;
            part_number += 1;
        }

        debug!(key, parts = parts.len(), "uploaded parts");
        Ok(parts)
    }
}

#[async_trait]
impl ObjectStore for NativeS3Store {
    async fn head_object(&self, location: &Location) -> Result<Option<ObjectHead>> {
        let (bucket, key) = bucket_and_key(location)?;
        let result = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .set_version_id(location.version().map(str::to_string))
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) if http_status(&e) == Some(404) => return Ok(None),
            Err(e) if e.as_service_error().is_some_and(|s| s.is_not_found()) => return Ok(None),
            Err(e) => return Err(sdk_failure("head_object", bucket, key, e)),
        };

        Ok(Some(ObjectHead {
            size: response.content_length().unwrap_or(0).max(0) as u64,
            etag: ETag::parse(response.e_tag().unwrap_or_default()),
            version: response.version_id().map(str::to_string),
            metadata: response.metadata().cloned().unwrap_or_default(),
        }))
    }

    async fn put_object(&self, request: PutRequest) -> Result<WriteResponse> {
        let (bucket, key) = bucket_and_key(&request.destination)?;
        match request.body {
            Body::Bytes(data) => {
                self.put_single(bucket, key, ByteStream::from(data), request.metadata)
                    .await
            }
            Body::File(path) => {
                let size = tokio::fs::metadata(&path).await.with_path(&path)?.len();
                if self.etag_config.is_multipart(size) {
                    self.put_multipart(bucket, key, &path, size, request.metadata)
                        .await
                } else {
                    let body = ByteStream::from_path(&path).await.map_err(|e| {
                        TransferError::transfer("put_object", &request.destination, e)
                    })?;
                    self.put_single(bucket, key, body, request.metadata).await
                }
            }
        }
    }

    async fn copy_object(&self, request: CopyRequest) -> Result<WriteResponse> {
        let (bucket, key) = bucket_and_key(&request.destination)?;
        let result = self
            .client
            .copy_object()
            .bucket(bucket)
            .key(key)
            .copy_source(copy_source(&request.source)?)
            .set_copy_source_if_match(request.if_match.as_ref().map(ETag::to_string))
            .metadata_directive(MetadataDirective::Replace)
            .set_metadata(Some(request.metadata))
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) if is_precondition_failure(&e) => {
                return Err(TransferError::PreconditionFailed(request.source.to_string()));
            }
            Err(e) => return Err(sdk_failure("copy_object", bucket, key, e)),
        };

        Ok(WriteResponse {
            version: response.version_id().map(str::to_string),
            etag: response
                .copy_object_result()
                .and_then(|r| r.e_tag())
                .map(ETag::parse),
        })
    }

    async fn get_object(&self, location: &Location) -> Result<GetResponse> {
        let (bucket, key) = bucket_and_key(location)?;
        let result = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .set_version_id(location.version().map(str::to_string))
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) if http_status(&e) == Some(404) => {
                return Err(TransferError::NotFound(location.to_string()));
            }
            Err(e) => return Err(sdk_failure("get_object", bucket, key, e)),
        };

        let size = response.content_length().unwrap_or(0).max(0) as u64;
        let version = response.version_id().map(str::to_string);
        let metadata = response.metadata().cloned().unwrap_or_default();
        let target = location.to_string();

        let body = stream::unfold(Some(response.body), move |state| {
            let target = target.clone();
            async move {
                let mut body = state?;
                match body.next().await {
                    Some(Ok(chunk)) => Some((Ok(chunk), Some(body))),
                    Some(Err(e)) => Some((Err(TransferError::transfer("get_object", target, e)), None)),
                    None => None,
                }
            }
        })
        .boxed();

        Ok(GetResponse {
            size,
            version,
            metadata,
            body,
        })
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ListPage> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .set_continuation_token(continuation)
            .send()
            .await
            .map_err(|e| sdk_failure("list_objects_v2", bucket, prefix, e))?;

        let objects = response
            .contents()
            .iter()
            .filter_map(|object| {
                Some(ObjectSummary {
                    key: object.key()?.to_string(),
                    size: object.size().unwrap_or(0).max(0) as u64,
                })
            })
            .collect();

        Ok(ListPage {
            objects,
            next_token: response.next_continuation_token().map(str::to_string),
        })
    }

    async fn select_object_content(&self, request: SelectRequest) -> Result<FrameStream> {
        let (bucket, key) = bucket_and_key(&request.location)?;
        let OutputSerialization::Json { record_delimiter } = request.output;

        let output = aws_sdk_s3::types::OutputSerialization::builder()
            .json(
                JsonOutput::builder()
                    .record_delimiter((record_delimiter as char).to_string())
                    .build(),
            )
            .build();

        let response = self
            .client
            .select_object_content()
            .bucket(bucket)
            .key(key)
            .expression(request.expression)
            .expression_type(match request.expression_type {
                ExpressionType::Sql => aws_sdk_s3::types::ExpressionType::Sql,
            })
            .input_serialization(input_serialization(&request.input))
            .output_serialization(output)
            .send()
            .await
            .map_err(|e| sdk_failure("select_object_content", bucket, key, e))?;

        let target = request.location.to_string();
        let frames = stream::unfold(Some(response.payload), move |state| {
            let target = target.clone();
            async move {
                let mut payload = state?;
                loop {
                    match payload.recv().await {
                        Ok(Some(event)) => {
                            if let Some(frame) = select_frame(event) {
                                let next = (frame != SelectFrame::End).then_some(payload);
                                return Some((Ok(frame), next));
                            }
                        }
                        Ok(None) => return None,
                        Err(e) => {
                            let error = TransferError::transfer(
                                "select_object_content",
                                target,
                                DisplayErrorContext(e),
                            );
                            return Some((Err(error), None));
                        }
                    }
                }
            }
        })
        .boxed();

        Ok(frames)
    }
}

/// `bucket/key[?versionId=...]` with the key percent-encoded
fn copy_source(location: &Location) -> Result<String> {
    let (bucket, key) = bucket_and_key(location)?;
    let mut source = format!(
        "{}/{}",
        bucket,
        utf8_percent_encode(key, COPY_SOURCE_ENCODE_SET)
    );
    if let Some(version) = location.version() {
        source.push_str("?versionId=");
        source.push_str(&utf8_percent_encode(version, NON_ALPHANUMERIC).to_string());
    }
    Ok(source)
}

fn input_serialization(input: &InputSerialization) -> aws_sdk_s3::types::InputSerialization {
    let compression = match input.compression {
        Compression::None => CompressionType::None,
        Compression::Gzip => CompressionType::Gzip,
        Compression::Bzip2 => CompressionType::Bzip2,
    };
    let builder = aws_sdk_s3::types::InputSerialization::builder().compression_type(compression);
    match input.format {
        DataFormat::Json => builder.json(JsonInput::builder().r#type(JsonType::Document).build()),
        DataFormat::JsonLines => builder.json(JsonInput::builder().r#type(JsonType::Lines).build()),
        DataFormat::Csv => builder.csv(
            CsvInput::builder()
                .file_header_info(FileHeaderInfo::Use)
                .build(),
        ),
        DataFormat::Tsv => builder.csv(
            CsvInput::builder()
                .file_header_info(FileHeaderInfo::Use)
                .field_delimiter("\t")
                .build(),
        ),
        DataFormat::Parquet => builder.parquet(ParquetInput::builder().build()),
    }
    .build()
}

fn select_frame(event: SelectObjectContentEventStream) -> Option<SelectFrame> {
    match event {
        SelectObjectContentEventStream::Records(records) => records
            .payload()
            .map(|blob| SelectFrame::Records(Bytes::copy_from_slice(blob.as_ref()))),
        SelectObjectContentEventStream::Stats(stats) => {
            Some(SelectFrame::Stats(stats.details().map(scan_stats).unwrap_or_default()))
        }
        SelectObjectContentEventStream::End(_) => Some(SelectFrame::End),
        _ => None,
    }
}

fn scan_stats(stats: &Stats) -> ScanStats {
    let count = |v: Option<i64>| v.unwrap_or(0).max(0) as u64;
    ScanStats {
        bytes_scanned: count(stats.bytes_scanned()),
        bytes_processed: count(stats.bytes_processed()),
        bytes_returned: count(stats.bytes_returned()),
    }
}

fn http_status<E>(error: &SdkError<E, HttpResponse>) -> Option<u16> {
    error.raw_response().map(|response| response.status().as_u16())
}

fn is_precondition_failure<E: ProvideErrorMetadata>(error: &SdkError<E, HttpResponse>) -> bool {
    error.code() == Some("PreconditionFailed") || http_status(error) == Some(412)
}

fn sdk_failure<E, R>(operation: &'static str, bucket: &str, key: &str, error: SdkError<E, R>) -> TransferError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    TransferError::transfer(
        operation,
        format!("s3://{bucket}/{key}"),
        DisplayErrorContext(error),
    )
}
