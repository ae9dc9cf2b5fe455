//! URL-shaped addresses for local files and remote objects
//!
//! Remote objects render as `s3://bucket/key[?versionId=...]`, local files
//! as `file:///absolute/path`. Keys are always `/`-separated, whatever the
//! host path convention is.

use crate::error::{Result, TransferError};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use url::Url;

/// Scheme used for remote object locations
pub const REMOTE_SCHEME: &str = "s3";

/// Scheme used for local file locations
pub const LOCAL_SCHEME: &str = "file";

/// Query parameter carrying an object version
pub const VERSION_PARAM: &str = "versionId";

/// Characters left unescaped in a rendered key
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Characters left unescaped in a rendered version
const VERSION_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Whether a location refers to the local filesystem or a remote store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationKind {
    /// A file on the local filesystem
    Local,
    /// An object in a remote object store
    Remote,
}

/// A local file or remote object reference.
///
/// Immutable once constructed; the `with_*` methods return new values.
/// A remote location without a version denotes the latest version, which is
/// distinct from any explicit version value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    kind: LocationKind,
    container: Option<String>,
    key: String,
    version: Option<String>,
}

impl Location {
    /// Remote object reference for the latest version of `bucket/key`
    pub fn remote(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            kind: LocationKind::Remote,
            container: Some(bucket.into()),
            key: key.into(),
            version: None,
        }
    }

    /// Local file reference. Relative paths are resolved against the
    /// current working directory.
    pub fn local(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|e| TransferError::io(path, e))?
                .join(path)
        };
        let key = path_to_key(&absolute)?;
        Ok(Self {
            kind: LocationKind::Local,
            container: None,
            key,
            version: None,
        })
    }

    /// Parse a URL-shaped string.
    ///
    /// Remote locations must name both a bucket and a non-empty key.
    pub fn parse(s: &str) -> Result<Self> {
        let location = Self::parse_prefix(s)?;
        if location.is_remote() && location.key.is_empty() {
            return Err(TransferError::InvalidLocation(format!("{s}: empty object key")));
        }
        Ok(location)
    }

    /// Parse a URL-shaped string, additionally requiring local paths to exist
    pub fn parse_strict(s: &str) -> Result<Self> {
        let location = Self::parse(s)?;
        if location.is_local() && !location.local_path().exists() {
            return Err(TransferError::InvalidLocation(format!("{s}: no such file")));
        }
        Ok(location)
    }

    /// Parse a URL-shaped string that names a directory or key prefix.
    ///
    /// Unlike [`Location::parse`], an empty remote key (`s3://bucket` or
    /// `s3://bucket/`) is accepted and denotes the whole bucket.
    pub fn parse_prefix(s: &str) -> Result<Self> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| TransferError::InvalidLocation(format!("{s}: missing scheme")))?;

        match scheme {
            REMOTE_SCHEME => parse_remote(s, rest),
            LOCAL_SCHEME => parse_local(s),
            other => Err(TransferError::InvalidLocation(format!(
                "{s}: unsupported scheme '{other}'"
            ))),
        }
    }

    /// Local or remote
    pub fn kind(&self) -> LocationKind {
        self.kind
    }

    /// Check if this is a local file
    pub fn is_local(&self) -> bool {
        self.kind == LocationKind::Local
    }

    /// Check if this is a remote object
    pub fn is_remote(&self) -> bool {
        self.kind == LocationKind::Remote
    }

    /// Bucket name for remote locations
    pub fn container(&self) -> Option<&str> {
        self.container.as_deref()
    }

    /// `/`-separated key (object key, or absolute path for local files)
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Explicit object version, `None` meaning latest
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Same location pinned to `version`
    pub fn with_version(&self, version: impl Into<String>) -> Self {
        self.with_optional_version(Some(version.into()))
    }

    /// Same location qualified with `version`, or latest when `None`.
    /// Local locations never carry a version, so the argument is ignored for
    /// them.
    pub fn with_optional_version(&self, version: Option<String>) -> Self {
        let mut location = self.clone();
        if location.is_remote() {
            location.version = version;
        }
        location
    }

    /// Same location referring to the latest version
    pub fn latest(&self) -> Self {
        Self {
            version: None,
            ..self.clone()
        }
    }

    /// Filesystem path of a local location
    pub fn local_path(&self) -> PathBuf {
        PathBuf::from(&self.key)
    }

    /// Last `/`-separated segment of the key
    pub fn basename(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }

    /// Append a `/`-separated relative suffix to the key.
    ///
    /// The result refers to a different object, so any version is dropped.
    pub fn join(&self, suffix: &str) -> Self {
        let suffix = suffix.trim_start_matches('/');
        let key = if self.key.is_empty() || self.key.ends_with('/') {
            format!("{}{}", self.key, suffix)
        } else {
            format!("{}/{}", self.key, suffix)
        };
        Self {
            kind: self.kind,
            container: self.container.clone(),
            key,
            version: None,
        }
    }
}

fn parse_remote(original: &str, rest: &str) -> Result<Location> {
    let (path, query) = match rest.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (rest, None),
    };
    let (bucket, raw_key) = path.split_once('/').unwrap_or((path, ""));
    if bucket.is_empty() {
        return Err(TransferError::InvalidLocation(format!("{original}: empty bucket")));
    }

    let key = decode(original, raw_key)?;

    let mut version = None;
    if let Some(query) = query {
        for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if name != VERSION_PARAM {
                return Err(TransferError::InvalidLocation(format!(
                    "{original}: unexpected query parameter '{name}'"
                )));
            }
            version = Some(value.into_owned());
        }
    }

    Ok(Location {
        kind: LocationKind::Remote,
        container: Some(bucket.to_string()),
        key,
        version,
    })
}

fn parse_local(original: &str) -> Result<Location> {
    let url = Url::parse(original)
        .map_err(|e| TransferError::InvalidLocation(format!("{original}: {e}")))?;
    if url.query().is_some() {
        return Err(TransferError::InvalidLocation(format!(
            "{original}: local locations cannot carry a query"
        )));
    }
    let path = url.to_file_path().map_err(|_| {
        TransferError::InvalidLocation(format!("{original}: not a local file URI"))
    })?;
    Ok(Location {
        kind: LocationKind::Local,
        container: None,
        key: path_to_key(&path)?,
        version: None,
    })
}

fn decode(original: &str, raw: &str) -> Result<String> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| TransferError::InvalidLocation(format!("{original}: key is not UTF-8")))
}

fn path_to_key(path: &Path) -> Result<String> {
    let s = path.to_str().ok_or_else(|| {
        TransferError::InvalidLocation(format!("{}: path is not UTF-8", path.display()))
    })?;
    if cfg!(windows) {
        Ok(s.replace('\\', "/"))
    } else {
        Ok(s.to_string())
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            LocationKind::Remote => {
                write!(
                    f,
                    "{}://{}/{}",
                    REMOTE_SCHEME,
                    self.container.as_deref().unwrap_or_default(),
                    utf8_percent_encode(&self.key, KEY_ENCODE_SET)
                )?;
                if let Some(version) = &self.version {
                    write!(
                        f,
                        "?{}={}",
                        VERSION_PARAM,
                        utf8_percent_encode(version, VERSION_ENCODE_SET)
                    )?;
                }
                Ok(())
            }
            LocationKind::Local => match Url::from_file_path(self.local_path()) {
                Ok(url) => write!(f, "{url}"),
                Err(()) => write!(f, "{}://{}", LOCAL_SCHEME, self.key),
            },
        }
    }
}

impl FromStr for Location {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Location {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Location {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Location::parse_prefix(&s).map_err(serde::de::Error::custom)
    }
}
