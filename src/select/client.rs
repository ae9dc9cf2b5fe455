//! Filtered remote reads
//!
//! Builds one select request per query. The input format comes from the
//! options when given, otherwise from the key's extension after stripping
//! a `.gz` or `.bz2` suffix. Results always come back as newline-delimited
//! JSON.

use super::decoder::{QueryResult, RecordDecoder};
use crate::config::{Compression, DataFormat, SelectOptions};
use crate::error::{Result, TransferError};
use crate::location::Location;
use crate::storage::{
    ExpressionType, InputSerialization, ObjectStore, OutputSerialization, SelectFrame,
    SelectRequest,
};
use futures::TryStreamExt;
use std::sync::Arc;
use tracing::debug;

/// Runs select queries against remote objects
#[derive(Clone)]
pub struct QueryClient {
    store: Arc<dyn ObjectStore>,
}

impl QueryClient {
    /// Create a client
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Run `expression` against the object at `location`
    #[tracing::instrument(skip_all, fields(location = %location))]
    pub async fn select(
        &self,
        location: &Location,
        expression: &str,
        options: &SelectOptions,
    ) -> Result<QueryResult> {
        if !location.is_remote() {
            return Err(TransferError::InvalidLocation(format!(
                "{location}: select needs a remote object"
            )));
        }

        let input = resolve_input(location, options)?;
        let output = OutputSerialization::default();
        debug!(format = input.format.name(), compression = input.compression.as_request_str(), "select");

        let mut frames = self
            .store
            .select_object_content(SelectRequest {
                location: location.clone(),
                expression: expression.to_string(),
                expression_type: ExpressionType::Sql,
                input,
                output,
            })
            .await?;

        let mut decoder = RecordDecoder::new(output.record_delimiter());
        while let Some(frame) = frames.try_next().await? {
            let end = frame == SelectFrame::End;
            decoder.feed(frame)?;
            if end {
                break;
            }
        }

        let result = decoder.into_result()?;
        debug!(rows = result.len(), "select complete");
        Ok(result)
    }
}

/// Decide the input serialization of a select.
///
/// Explicit options win, each half independently.
pub fn resolve_input(location: &Location, options: &SelectOptions) -> Result<InputSerialization> {
    let (stem, inferred_compression) = split_compression(location.basename());
    let compression = options
        .compression
        .or(inferred_compression)
        .unwrap_or_default();

    let format = options
        .format
        .or_else(|| extension(stem).and_then(DataFormat::from_extension))
        .ok_or_else(|| {
            TransferError::UnsupportedFormat(format!(
                "{location}: cannot infer the input format, set it explicitly"
            ))
        })?;

    if format == DataFormat::Parquet && compression != Compression::None {
        return Err(TransferError::UnsupportedFormat(format!(
            "{location}: Parquet input cannot be {}-compressed",
            compression.as_request_str()
        )));
    }

    Ok(InputSerialization {
        format,
        compression,
    })
}

fn extension(name: &str) -> Option<&str> {
    name.rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
}

fn split_compression(name: &str) -> (&str, Option<Compression>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) => match Compression::from_extension(ext) {
            Some(compression) => (stem, Some(compression)),
            None => (name, None),
        },
        None => (name, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mock::{MockStore, Request};
    use crate::storage::ScanStats;
    use bytes::Bytes;
    use serde_json::json;

    const CHUNKS: [&[u8]; 11] = [
        b"{\"foo\": ",
        b"9, \"b",
        b"ar\": 3",
        b"}\n{\"foo\"",
        b": 9, \"bar\": 1}\n{\"foo\": 6, \"bar\": 9}\n{\"foo\":",
        b" 1, \"bar\": 7}\n{\"foo\":",
        b" 6, \"bar\": 1}\n{\"foo\": 6, \"bar\": 6}",
        b"\n{\"foo\": 9, \"bar\": 6}",
        b"\n{\"foo\": 6, \"bar\": 4}\n",
        b"{\"foo\": 2, \"bar\": 0}",
        b"\n{\"foo\": 2, \"bar\": 0}\n",
    ];

    fn scripted_store() -> Arc<MockStore> {
        let store = Arc::new(MockStore::new());
        let mut frames: Vec<SelectFrame> = CHUNKS
            .iter()
            .map(|c| SelectFrame::Records(Bytes::from_static(c)))
            .collect();
        frames.push(SelectFrame::Stats(ScanStats {
            bytes_scanned: 100,
            bytes_processed: 100,
            bytes_returned: 210,
        }));
        frames.push(SelectFrame::End);
        store.set_select_frames(frames);
        store
    }

    fn select_requests(store: &MockStore) -> Vec<SelectRequest> {
        store
            .requests()
            .into_iter()
            .filter_map(|r| match r {
                Request::Select(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_select_json_by_extension() {
        let store = scripted_store();
        let client = QueryClient::new(store.clone());
        let location = Location::parse("s3://foo/bar/baz.json").unwrap();

        let result = client
            .select(&location, "select * from S3Object", &SelectOptions::default())
            .await
            .unwrap();

        let expected = [(9, 3), (9, 1), (6, 9), (1, 7), (6, 1), (6, 6), (9, 6), (6, 4), (2, 0), (2, 0)];
        assert_eq!(result.len(), expected.len());
        for (row, (foo, bar)) in result.rows().zip(expected) {
            assert_eq!(row.get("foo"), Some(&json!(foo)));
            assert_eq!(row.get("bar"), Some(&json!(bar)));
        }
        assert_eq!(result.columns(), vec!["foo", "bar"]);
        assert_eq!(result.stats().map(|s| s.bytes_returned), Some(210));

        let requests = select_requests(&store);
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0],
            SelectRequest {
                location,
                expression: "select * from S3Object".to_string(),
                expression_type: ExpressionType::Sql,
                input: InputSerialization {
                    format: DataFormat::Json,
                    compression: Compression::None,
                },
                output: OutputSerialization::Json {
                    record_delimiter: b'\n'
                },
            }
        );
    }

    #[tokio::test]
    async fn test_select_without_format_sends_nothing() {
        let store = scripted_store();
        let client = QueryClient::new(store.clone());

        let err = client
            .select(
                &Location::parse("s3://foo/bar/baz").unwrap(),
                "select * from S3Object",
                &SelectOptions::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::UnsupportedFormat(_)));
        assert!(store.requests().is_empty());
    }

    #[tokio::test]
    async fn test_select_explicit_format() {
        let store = scripted_store();
        let client = QueryClient::new(store.clone());

        let result = client
            .select(
                &Location::parse("s3://foo/bar/baz").unwrap(),
                "select * from S3Object",
                &SelectOptions::with_format(DataFormat::Json),
            )
            .await
            .unwrap();

        assert_eq!(result.len(), 10);
        assert_eq!(select_requests(&store)[0].input.format, DataFormat::Json);
    }

    #[tokio::test]
    async fn test_select_gzip_suffix() {
        let store = scripted_store();
        let client = QueryClient::new(store.clone());

        client
            .select(
                &Location::parse("s3://foo/bar/baz.json.gz").unwrap(),
                "select * from S3Object",
                &SelectOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(
            select_requests(&store)[0].input,
            InputSerialization {
                format: DataFormat::Json,
                compression: Compression::Gzip,
            }
        );
    }

    #[tokio::test]
    async fn test_select_truncated_stream() {
        let store = Arc::new(MockStore::new());
        store.set_select_frames(vec![
            SelectFrame::Records(Bytes::from_static(b"{\"a\": 1}\n{\"a\": ")),
            SelectFrame::End,
        ]);
        let client = QueryClient::new(store);

        let err = client
            .select(
                &Location::parse("s3://foo/a.json").unwrap(),
                "select * from S3Object",
                &SelectOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::DecodeError(_)));
    }

    #[tokio::test]
    async fn test_select_rejects_local_location() {
        let dir = tempfile::TempDir::new().unwrap();
        let client = QueryClient::new(Arc::new(MockStore::new()));
        let location = Location::local(dir.path().join("a.json")).unwrap();

        let err = client
            .select(&location, "select * from S3Object", &SelectOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidLocation(_)));
    }

    #[test]
    fn test_resolve_input_table() {
        let cases = [
            ("s3://b/x.csv", DataFormat::Csv, Compression::None),
            ("s3://b/x.tsv.bz2", DataFormat::Tsv, Compression::Bzip2),
            ("s3://b/x.jsonl", DataFormat::JsonLines, Compression::None),
            ("s3://b/x.ndjson.gz", DataFormat::JsonLines, Compression::Gzip),
            ("s3://b/dir/x.parquet", DataFormat::Parquet, Compression::None),
        ];
        for (raw, format, compression) in cases {
            let input = resolve_input(&Location::parse(raw).unwrap(), &SelectOptions::default())
                .unwrap();
            assert_eq!(input, InputSerialization { format, compression }, "{raw}");
        }
    }

    #[test]
    fn test_resolve_input_overrides() {
        let location = Location::parse("s3://b/x.csv.gz").unwrap();
        let options = SelectOptions {
            format: Some(DataFormat::Tsv),
            compression: Some(Compression::None),
        };
        assert_eq!(
            resolve_input(&location, &options).unwrap(),
            InputSerialization {
                format: DataFormat::Tsv,
                compression: Compression::None,
            }
        );

        // Format override keeps the inferred compression
        let input = resolve_input(&location, &SelectOptions::with_format(DataFormat::Json)).unwrap();
        assert_eq!(input.compression, Compression::Gzip);
    }

    #[test]
    fn test_compressed_parquet_rejected() {
        let location = Location::parse("s3://b/x.parquet.gz").unwrap();
        assert!(matches!(
            resolve_input(&location, &SelectOptions::default()),
            Err(TransferError::UnsupportedFormat(_))
        ));
    }
}
