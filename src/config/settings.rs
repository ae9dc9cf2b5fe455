//! Configuration settings for LakeCopy
//!
//! Defines the CLI arguments, the transfer configuration shared by the
//! planner and executor, and the per-query select options.

use crate::error::{Result, TransferError};
use crate::hash::{EtagConfig, DEFAULT_MULTIPART_THRESHOLD, DEFAULT_PART_SIZE};
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default number of concurrent transfers
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Reserved user-metadata key holding the serialized custom metadata
pub const DEFAULT_METADATA_KEY: &str = "helium";

/// LakeCopy - verified copies between local files and object storage
#[derive(Parser, Debug, Clone)]
#[command(name = "lakecopy")]
#[command(author = "LakeCopy Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Verified data movement between local files and S3-compatible storage")]
#[command(long_about = r#"
LakeCopy copies files to, from and between S3-compatible buckets.

Before uploading, it compares the local ETag with the destination's and
skips or patches metadata in place when the bytes are already there.

Examples:
  lakecopy cp data.csv s3://bucket/data.csv            # Upload one file
  lakecopy cp big.npy s3://bucket/big.npy --meta '{"a":1}'
  lakecopy sync ./dir s3://bucket/prefix/ -j 16        # Upload a tree
  lakecopy select s3://bucket/rows.json.gz "select * from S3Object"
  lakecopy etag big.npy --part-size 8M                 # Local ETag
"#)]
pub struct CliArgs {
    /// Number of concurrent transfers
    #[arg(short = 'j', long, env = "LAKECOPY_CONCURRENCY", value_name = "NUM", global = true)]
    pub concurrency: Option<usize>,

    /// Multipart part size (e.g., 8M)
    #[arg(long, env = "LAKECOPY_PART_SIZE", value_name = "SIZE", global = true)]
    pub part_size: Option<String>,

    /// Files larger than this are uploaded in parts (e.g., 8M)
    #[arg(long, env = "LAKECOPY_MULTIPART_THRESHOLD", value_name = "SIZE", global = true)]
    pub multipart_threshold: Option<String>,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (suppress progress output)
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Copy a single file or object
    #[command(name = "cp")]
    Copy {
        /// Source (path, file:// or s3:// URL)
        source: String,
        /// Destination (path, file:// or s3:// URL)
        destination: String,
        /// Custom metadata as a JSON object
        #[arg(long, value_name = "JSON")]
        meta: Option<String>,
    },

    /// Copy every file under a directory or prefix
    #[command(name = "sync")]
    Sync {
        /// Source directory or prefix
        source: String,
        /// Destination directory or prefix
        destination: String,
    },

    /// List files under a directory or prefix
    #[command(name = "ls")]
    List {
        /// Directory or prefix to list
        location: String,
    },

    /// Show size, version and metadata of an object
    #[command(name = "head")]
    Head {
        /// Object to inspect
        location: String,
    },

    /// Run a filtered query against one object
    #[command(name = "select")]
    Select {
        /// Object to query
        location: String,
        /// Query expression, passed through verbatim
        expression: String,
        /// Input format (inferred from the key when omitted)
        #[arg(long, value_enum)]
        format: Option<DataFormat>,
        /// Input compression (inferred from the key when omitted)
        #[arg(long, value_enum)]
        compression: Option<Compression>,
    },

    /// Compute the store-compatible ETag of a local file
    #[command(name = "etag")]
    Etag {
        /// File to hash
        file: PathBuf,

        /// Also print the SHA-256 content digest
        #[arg(long)]
        sha256: bool,
    },
}

/// Input serialization format of a queried object
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    /// A stream of JSON documents
    Json,
    /// One JSON document per line
    #[value(name = "jsonl")]
    JsonLines,
    /// Comma-separated values with a header row
    Csv,
    /// Tab-separated values with a header row
    Tsv,
    /// Apache Parquet
    Parquet,
}

impl DataFormat {
    /// Infer a format from a file extension (without the dot)
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "jsonl" | "ndjson" => Some(Self::JsonLines),
            "csv" => Some(Self::Csv),
            "tsv" => Some(Self::Tsv),
            "parquet" => Some(Self::Parquet),
            _ => None,
        }
    }

    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Json => "JSON",
            Self::JsonLines => "JSON lines",
            Self::Csv => "CSV",
            Self::Tsv => "TSV",
            Self::Parquet => "Parquet",
        }
    }
}

/// Compression applied to a queried object
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Uncompressed
    #[default]
    None,
    /// gzip
    Gzip,
    /// bzip2
    Bzip2,
}

impl Compression {
    /// Infer compression from a file extension (without the dot)
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "gz" => Some(Self::Gzip),
            "bz2" => Some(Self::Bzip2),
            _ => None,
        }
    }

    /// Name used in select requests
    pub fn as_request_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Gzip => "GZIP",
            Self::Bzip2 => "BZIP2",
        }
    }
}

/// Per-query overrides for format and compression inference
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOptions {
    /// Input format; inferred from the key extension when `None`
    pub format: Option<DataFormat>,
    /// Input compression; inferred from a `.gz`/`.bz2` suffix when `None`
    pub compression: Option<Compression>,
}

impl SelectOptions {
    /// Options with an explicit format
    pub fn with_format(format: DataFormat) -> Self {
        Self {
            format: Some(format),
            compression: None,
        }
    }
}

/// Transfer configuration shared by the planner and the executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Maximum number of items transferred at once (at least 1)
    pub concurrency: usize,
    /// Part size of multipart uploads, and of multipart ETags
    pub part_size: u64,
    /// Files larger than this are uploaded (and hashed) in parts
    pub multipart_threshold: u64,
    /// User-metadata key holding the serialized custom metadata
    pub metadata_key: String,
    /// Items smaller than this are uploaded without probing the destination
    pub probe_min_size: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            part_size: DEFAULT_PART_SIZE,
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
            metadata_key: DEFAULT_METADATA_KEY.to_string(),
            probe_min_size: 0,
        }
    }
}

impl TransferConfig {
    /// Create config from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(value) = std::env::var("LAKECOPY_CONCURRENCY") {
            config.concurrency = value
                .parse()
                .map_err(|_| TransferError::config(format!("invalid concurrency: {value}")))?;
        }
        if let Ok(value) = std::env::var("LAKECOPY_PART_SIZE") {
            config.part_size = parse_size(&value).map_err(TransferError::ConfigError)?;
        }
        if let Ok(value) = std::env::var("LAKECOPY_MULTIPART_THRESHOLD") {
            config.multipart_threshold = parse_size(&value).map_err(TransferError::ConfigError)?;
        }
        if let Ok(value) = std::env::var("LAKECOPY_METADATA_KEY") {
            config.metadata_key = value;
        }
        Ok(config)
    }

    /// Build configuration from CLI arguments
    pub fn from_cli(args: &CliArgs) -> std::result::Result<Self, String> {
        let mut config = Self::default();

        if let Some(concurrency) = args.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(ref size) = args.part_size {
            config.part_size = parse_size(size)?;
        }
        if let Some(ref size) = args.multipart_threshold {
            config.multipart_threshold = parse_size(size)?;
        }

        config.validate().map_err(|e| e.to_string())?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(TransferError::config("concurrency must be at least 1"));
        }
        if self.metadata_key.is_empty() {
            return Err(TransferError::config("metadata key must not be empty"));
        }
        self.etag_config().validate()
    }

    /// Chunking convention used for ETags
    pub fn etag_config(&self) -> EtagConfig {
        EtagConfig {
            part_size: self.part_size,
            multipart_threshold: self.multipart_threshold,
        }
    }
}

/// Parse human-readable size (e.g., "1G", "100M", "64K")
pub fn parse_size(size: &str) -> std::result::Result<u64, String> {
    let size = size.trim().to_uppercase();

    if size.is_empty() {
        return Err("Empty size string".to_string());
    }

    let size = size.trim_end_matches("IB").trim_end_matches('B');
    let (num_str, multiplier) = match size.chars().last() {
        Some('T') => (&size[..size.len() - 1], 1024u64 * 1024 * 1024 * 1024),
        Some('G') => (&size[..size.len() - 1], 1024u64 * 1024 * 1024),
        Some('M') => (&size[..size.len() - 1], 1024u64 * 1024),
        Some('K') => (&size[..size.len() - 1], 1024u64),
        // Assume bytes if no suffix
        _ => (size, 1u64),
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number: {}", num_str))?;

    if num < 0.0 {
        return Err(format!("Negative size: {}", num_str));
    }

    Ok((num * multiplier as f64) as u64)
}
