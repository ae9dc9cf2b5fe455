//! Object store compatible ETag computation
//!
//! For a file no larger than the multipart threshold the ETag is the hex MD5
//! of the whole content. Above the threshold the file is split into parts of
//! `part_size` bytes (the last part may be shorter); the ETag is the hex MD5
//! of the concatenated raw part digests, suffixed with the part count. This
//! reproduces the tag the store assigns to a chunked upload, so a local file
//! can be compared with a remote object without downloading it.
//!
//! Part size and threshold must match the chunking convention that wrote the
//! remote object, so both are configuration rather than constants.

use crate::error::{IoResultExt, Result, TransferError};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::str::FromStr;

/// Default part size for chunked uploads: 8 MiB.
pub const DEFAULT_PART_SIZE: u64 = 8 * 1024 * 1024;

/// Default multipart threshold: 8 MiB.
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 8 * 1024 * 1024;

/// Read buffer used while hashing
const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Content identity tag.
///
/// Two tags are equal only when both the digest and the part count match, so
/// a single-part tag never equals a multipart tag over the same bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ETag {
    digest: String,
    part_count: Option<u32>,
}

impl ETag {
    /// Tag of a single-part object
    pub fn single(digest: impl Into<String>) -> Self {
        Self {
            digest: digest.into().to_ascii_lowercase(),
            part_count: None,
        }
    }

    /// Tag of an object uploaded in `part_count` parts
    pub fn multipart(digest: impl Into<String>, part_count: u32) -> Self {
        Self {
            digest: digest.into().to_ascii_lowercase(),
            part_count: Some(part_count),
        }
    }

    /// Parse a tag as reported by the store, e.g. `"9b2c...-3"`.
    ///
    /// Surrounding quotes and a weak-validator prefix are ignored. A suffix
    /// that is not a part count is kept as part of the digest.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let raw = raw.strip_prefix("W/").unwrap_or(raw);
        let raw = raw.trim_matches('"');

        if let Some((digest, parts)) = raw.rsplit_once('-') {
            if let Ok(part_count) = parts.parse::<u32>() {
                return Self::multipart(digest, part_count);
            }
        }
        Self::single(raw)
    }

    /// Hex digest without part count
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Number of parts, `None` for single-part tags
    pub fn part_count(&self) -> Option<u32> {
        self.part_count
    }

    /// Check if this tag describes a multipart upload
    pub fn is_multipart(&self) -> bool {
        self.part_count.is_some()
    }
}

/// Renders the quoted form the store reports and expects in conditional
/// requests.
impl fmt::Display for ETag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.part_count {
            Some(parts) => write!(f, "\"{}-{}\"", self.digest, parts),
            None => write!(f, "\"{}\"", self.digest),
        }
    }
}

impl FromStr for ETag {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

/// Chunking convention used to compute ETags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtagConfig {
    /// Size of each upload part in bytes
    pub part_size: u64,
    /// Files larger than this are hashed as multipart uploads
    pub multipart_threshold: u64,
}

impl Default for EtagConfig {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
        }
    }
}

impl EtagConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.part_size == 0 {
            return Err(TransferError::config("part size must be greater than zero"));
        }
        Ok(())
    }

    /// Check if content of `size` bytes is tagged as a multipart upload
    pub fn is_multipart(&self, size: u64) -> bool {
        size > self.multipart_threshold
    }
}

/// Compute the ETag of a local file
pub fn compute_etag(path: &Path, part_size: u64, multipart_threshold: u64) -> Result<ETag> {
    let config = EtagConfig {
        part_size,
        multipart_threshold,
    };
    compute_etag_with_buffer(path, &config, READ_BUFFER_SIZE)
}

/// Compute the ETag of a local file with a custom read buffer size.
///
/// The result depends only on the file content and `config`, never on
/// `buffer_size`. At most one buffer of file data is held in memory.
pub fn compute_etag_with_buffer(
    path: &Path,
    config: &EtagConfig,
    buffer_size: usize,
) -> Result<ETag> {
    config.validate()?;
    if buffer_size == 0 {
        return Err(TransferError::config("read buffer size must be greater than zero"));
    }

    let file = File::open(path).with_path(path)?;
    let size = file.metadata().with_path(path)?.len();
    let mut reader = BufReader::with_capacity(buffer_size, file);
    let mut buffer = vec![0u8; buffer_size];

    let (etag, bytes_read) = if config.is_multipart(size) {
        multipart_etag(&mut reader, &mut buffer, config.part_size).with_path(path)?
    } else {
        let mut hasher = Md5::new();
        let bytes_read = hash_span(&mut reader, &mut buffer, u64::MAX, &mut hasher).with_path(path)?;
        (ETag::single(hex::encode(hasher.finalize())), bytes_read)
    };

    if bytes_read != size {
        return Err(TransferError::io(
            path,
            std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("expected {size} bytes, read {bytes_read}"),
            ),
        ));
    }

    Ok(etag)
}

/// Compute the ETag of in-memory content
pub fn etag_bytes(data: &[u8], config: &EtagConfig) -> ETag {
    if !config.is_multipart(data.len() as u64) || config.part_size == 0 {
        return ETag::single(hex::encode(Md5::digest(data)));
    }

    let mut combined = Md5::new();
    let mut parts = 0u32;
    for chunk in data.chunks(config.part_size as usize) {
        combined.update(Md5::digest(chunk));
        parts += 1;
    }
    ETag::multipart(hex::encode(combined.finalize()), parts)
}

fn multipart_etag<R: Read>(
    reader: &mut R,
    buffer: &mut [u8],
    part_size: u64,
) -> std::io::Result<(ETag, u64)> {
    let mut combined = Md5::new();
    let mut parts = 0u32;
    let mut total = 0u64;

    loop {
        let mut part = Md5::new();
        let part_len = hash_span(reader, buffer, part_size, &mut part)?;
        if part_len == 0 {
            break;
        }
        combined.update(part.finalize());
        parts += 1;
        total += part_len;
        if part_len < part_size {
            break;
        }
    }

    Ok((ETag::multipart(hex::encode(combined.finalize()), parts), total))
}

/// Feed up to `limit` bytes from `reader` into `hasher`, returning the count.
fn hash_span<R: Read>(
    reader: &mut R,
    buffer: &mut [u8],
    limit: u64,
    hasher: &mut Md5,
) -> std::io::Result<u64> {
    let mut consumed = 0u64;
    while consumed < limit {
        let want = (limit - consumed).min(buffer.len() as u64) as usize;
        let bytes_read = reader.read(&mut buffer[..want])?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        consumed += bytes_read as u64;
    }
    Ok(consumed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 256) as u8).collect()
    }

    fn create_test_file(dir: &Path, content: &[u8]) -> std::path::PathBuf {
        let path = dir.join("test.bin");
        let mut file = File::create(&path).unwrap();
        file.write_all(content).unwrap();
        path
    }

    #[test]
    fn test_single_part_is_plain_md5() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), b"hello world");

        let etag = compute_etag(&path, DEFAULT_PART_SIZE, DEFAULT_MULTIPART_THRESHOLD).unwrap();
        assert_eq!(etag, ETag::single("5eb63bbbe01eeed093cb22bb8f5acdc3"));
        assert_eq!(etag.part_count(), None);
        assert_eq!(etag.to_string(), "\"5eb63bbbe01eeed093cb22bb8f5acdc3\"");

        // Deterministic across calls
        let again = compute_etag(&path, DEFAULT_PART_SIZE, DEFAULT_MULTIPART_THRESHOLD).unwrap();
        assert_eq!(etag, again);
    }

    #[test]
    fn test_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), b"");
        let etag = compute_etag(&path, 10, 10).unwrap();
        assert_eq!(etag, ETag::single("d41d8cd98f00b204e9800998ecf8427e"));
    }

    #[test]
    fn test_size_equal_to_threshold_is_single_part() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), b"0123456789");
        let etag = compute_etag(&path, 5, 10).unwrap();
        assert_eq!(etag, ETag::single("781e5e245d69b566979b86e28d23f2c7"));
    }

    #[test]
    fn test_multipart_with_short_last_part() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), &pattern(25));

        let etag = compute_etag(&path, 10, 10).unwrap();
        assert_eq!(etag, ETag::multipart("704bbbf0caffa731e3361851ec17ae6c", 3));
        assert_eq!(etag.to_string(), "\"704bbbf0caffa731e3361851ec17ae6c-3\"");
    }

    #[test]
    fn test_multipart_exact_part_boundary() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), &pattern(20));

        let etag = compute_etag(&path, 10, 15).unwrap();
        assert_eq!(etag, ETag::multipart("3efc1c6fa9406e93078ae105f0e46de6", 2));
    }

    #[test]
    fn test_file_and_memory_agree() {
        let dir = TempDir::new().unwrap();
        let data = pattern(1000);
        let path = create_test_file(dir.path(), &data);
        let config = EtagConfig {
            part_size: 64,
            multipart_threshold: 100,
        };

        let from_file = compute_etag_with_buffer(&path, &config, 7).unwrap();
        assert_eq!(from_file, etag_bytes(&data, &config));
        assert_eq!(from_file.part_count(), Some(16));
    }

    #[test]
    fn test_single_and_multipart_tags_differ() {
        let digest = "0123456789abcdef0123456789abcdef";
        assert_ne!(ETag::single(digest), ETag::multipart(digest, 1));
    }

    #[test]
    fn test_parse_reported_tags() {
        assert_eq!(
            ETag::parse("\"0BEC5BF6F93C547BC9C6774ACAF85E1A\""),
            ETag::single("0bec5bf6f93c547bc9c6774acaf85e1a")
        );
        assert_eq!(
            ETag::parse("\"dfb5aca048931d396f4534395617363f-12\""),
            ETag::multipart("dfb5aca048931d396f4534395617363f", 12)
        );
        assert_eq!(ETag::parse("W/\"abc\""), ETag::single("abc"));
        assert_eq!(ETag::parse("\"abc-def\""), ETag::single("abc-def"));
        assert_eq!("\"123\"".parse::<ETag>().unwrap(), ETag::single("123"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = compute_etag(&dir.path().join("absent"), 10, 10).unwrap_err();
        assert!(matches!(err, TransferError::Io { .. }));
    }

    #[test]
    fn test_zero_part_size_rejected() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), b"data");
        let err = compute_etag(&path, 0, 0).unwrap_err();
        assert!(matches!(err, TransferError::ConfigError(_)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_multipart_independent_of_buffer_size(
            len in 0usize..4096,
            part_size in 1u64..512,
            buffer_a in 1usize..300,
            buffer_b in 1usize..300,
        ) {
            let dir = TempDir::new().unwrap();
            let data = pattern(len);
            let path = create_test_file(dir.path(), &data);
            let config = EtagConfig { part_size, multipart_threshold: 0 };

            let a = compute_etag_with_buffer(&path, &config, buffer_a).unwrap();
            let b = compute_etag_with_buffer(&path, &config, buffer_b).unwrap();
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(a, etag_bytes(&data, &config));
        }
    }
}
