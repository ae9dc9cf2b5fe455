//! LakeCopy CLI - verified copies between local files and object storage

use anyhow::{bail, Context, Result};
use clap::Parser;
use futures::TryStreamExt;
use lakecopy::config::{CliArgs, Commands, SelectOptions, TransferConfig};
use lakecopy::core::{CustomMetadata, Executor, Prober, TransferItem};
use lakecopy::fs::{entry_location, Lister};
use lakecopy::hash::{compute_etag, sha256_file};
use lakecopy::location::Location;
use lakecopy::progress::ProgressReporter;
use lakecopy::select::QueryClient;
use lakecopy::storage::ObjectStore;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging(&args);

    if let Err(e) = run(args).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(args: &CliArgs) {
    let default_level = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if args.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(args: CliArgs) -> Result<()> {
    // Size and concurrency flags also read their LAKECOPY_* variables
    let mut config = TransferConfig::from_cli(&args).map_err(anyhow::Error::msg)?;
    config.metadata_key = TransferConfig::from_env()?.metadata_key;
    config.validate()?;

    if args.verbose > 1 {
        print_config(&config);
    }

    match &args.command {
        Commands::Copy {
            source,
            destination,
            meta,
        } => cmd_copy(&args, config, source, destination, meta.as_deref()).await,
        Commands::Sync {
            source,
            destination,
        } => cmd_sync(&args, config, source, destination).await,
        Commands::List { location } => cmd_list(config, location).await,
        Commands::Head { location } => cmd_head(config, location).await,
        Commands::Select {
            location,
            expression,
            format,
            compression,
        } => {
            let options = SelectOptions {
                format: *format,
                compression: *compression,
            };
            cmd_select(&args, config, location, expression, &options).await
        }
        Commands::Etag { file, sha256 } => cmd_etag(&config, file, *sha256),
    }
}

/// Bare paths are local; anything with a scheme is parsed as a URL
fn parse_location(raw: &str) -> lakecopy::Result<Location> {
    if raw.contains("://") {
        Location::parse(raw)
    } else {
        Location::local(raw)
    }
}

fn parse_prefix(raw: &str) -> lakecopy::Result<Location> {
    if raw.contains("://") {
        Location::parse_prefix(raw)
    } else {
        Location::local(raw)
    }
}

fn parse_metadata(raw: &str) -> Result<CustomMetadata> {
    match serde_json::from_str(raw).context("--meta is not valid JSON")? {
        serde_json::Value::Object(map) => Ok(map),
        _ => bail!("--meta must be a JSON object"),
    }
}

fn progress_for(args: &CliArgs) -> ProgressReporter {
    if args.quiet {
        ProgressReporter::disabled()
    } else {
        ProgressReporter::new()
    }
}

async fn cmd_copy(
    args: &CliArgs,
    config: TransferConfig,
    source: &str,
    destination: &str,
    meta: Option<&str>,
) -> Result<()> {
    let source = parse_location(source)?;
    let destination = if destination.ends_with('/') {
        parse_prefix(destination)?.join(source.basename())
    } else {
        parse_location(destination)?
    };

    let store = open_store(&config).await?;
    let prober = Prober::new(Arc::clone(&store), config.metadata_key.clone());
    let size = prober.require(&source).await?.size;

    let mut item = TransferItem::new(source, destination, size);
    if let Some(raw) = meta {
        item = item.with_metadata(parse_metadata(raw)?);
    }

    let executor = Executor::new(store, config)?.with_progress(progress_for(args));
    let result = executor.execute(vec![item], 1).await?;
    for outcome in result.into_outcomes() {
        println!("{}", outcome?);
    }
    Ok(())
}

async fn cmd_sync(
    args: &CliArgs,
    config: TransferConfig,
    source: &str,
    destination: &str,
) -> Result<()> {
    let source = parse_prefix(source)?;
    let destination = parse_prefix(destination)?;
    let store = open_store(&config).await?;

    let entries = Lister::new(Arc::clone(&store)).collect(&source).await?;
    if entries.is_empty() {
        println!("Nothing to copy under {}", source);
        return Ok(());
    }

    let items: Vec<TransferItem> = entries
        .into_iter()
        .map(|entry| {
            TransferItem::new(
                entry_location(&source, &entry),
                destination.join(&entry.relative_path),
                entry.size,
            )
        })
        .collect();

    let executor = Executor::new(store, config)?.with_progress(progress_for(args));
    let result = executor.run(items).await?;

    if !args.quiet {
        for location in result.outcomes.iter().flatten() {
            println!("{}", location);
        }
        result.print_summary();
    }

    if !result.is_success() {
        bail!("{} of {} transfers failed", result.failures().len(), result.len());
    }
    Ok(())
}

async fn cmd_list(config: TransferConfig, location: &str) -> Result<()> {
    let location = parse_prefix(location)?;
    let store = open_store(&config).await?;
    let mut entries = Lister::new(store).list(&location);

    while let Some(entry) = entries.try_next().await? {
        println!("{}\t{}", entry.size, entry.relative_path);
    }
    Ok(())
}

async fn cmd_head(config: TransferConfig, location: &str) -> Result<()> {
    let location = parse_location(location)?;
    let store = open_store(&config).await?;
    let info = Prober::new(store, config.metadata_key.clone())
        .require(&location)
        .await?;

    println!("Location: {}", location.with_optional_version(info.version.clone()));
    println!(
        "Size:     {} ({})",
        info.size,
        humansize::format_size(info.size, humansize::BINARY)
    );
    if let Some(etag) = &info.etag {
        println!("ETag:     {}", etag);
    }
    println!("Version:  {}", info.version.as_deref().unwrap_or("-"));
    match &info.metadata {
        Some(metadata) => println!("Metadata: {}", serde_json::to_string(metadata)?),
        None => println!("Metadata: <unreadable>"),
    }
    Ok(())
}

async fn cmd_select(
    args: &CliArgs,
    config: TransferConfig,
    location: &str,
    expression: &str,
    options: &SelectOptions,
) -> Result<()> {
    let location = parse_location(location)?;
    let store = open_store(&config).await?;
    let result = QueryClient::new(store)
        .select(&location, expression, options)
        .await?;

    for row in result.rows() {
        println!("{}", serde_json::to_string(row)?);
    }

    if !args.quiet {
        if let Some(stats) = result.stats() {
            eprintln!(
                "Scanned {}, processed {}, returned {}",
                humansize::format_size(stats.bytes_scanned, humansize::BINARY),
                humansize::format_size(stats.bytes_processed, humansize::BINARY),
                humansize::format_size(stats.bytes_returned, humansize::BINARY)
            );
        }
    }
    Ok(())
}

fn cmd_etag(config: &TransferConfig, file: &Path, sha256: bool) -> Result<()> {
    let etag = compute_etag(file, config.part_size, config.multipart_threshold)?;
    println!("{}", etag);
    if sha256 {
        println!("sha256:{}", sha256_file(file)?);
    }
    Ok(())
}

fn print_config(config: &TransferConfig) {
    eprintln!("=== Configuration ===");
    eprintln!("Concurrency:         {}", config.concurrency);
    eprintln!(
        "Part size:           {}",
        humansize::format_size(config.part_size, humansize::BINARY)
    );
    eprintln!(
        "Multipart threshold: {}",
        humansize::format_size(config.multipart_threshold, humansize::BINARY)
    );
    eprintln!("Metadata key:        {}", config.metadata_key);
    eprintln!();
}

#[cfg(feature = "native_s3")]
async fn open_store(config: &TransferConfig) -> Result<Arc<dyn ObjectStore>> {
    use lakecopy::storage::{NativeS3Store, S3Config};

    let store = NativeS3Store::new(S3Config::from_env(), config.etag_config()).await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "native_s3"))]
async fn open_store(_config: &TransferConfig) -> Result<Arc<dyn ObjectStore>> {
    Ok(Arc::new(offline::OfflineStore))
}

#[cfg(not(feature = "native_s3"))]
mod offline {
    use async_trait::async_trait;
    use lakecopy::error::{Result, TransferError};
    use lakecopy::location::Location;
    use lakecopy::storage::*;

    /// Store for builds without a remote backend; local transfers never reach it
    pub struct OfflineStore;

    fn unavailable<T>() -> Result<T> {
        Err(TransferError::config(
            "remote locations need a build with the `native_s3` feature",
        ))
    }

    #[async_trait]
    impl ObjectStore for OfflineStore {
        async fn head_object(&self, _location: &Location) -> Result<Option<ObjectHead>> {
            unavailable()
        }

        async fn put_object(&self, _request: PutRequest) -> Result<WriteResponse> {
            unavailable()
        }

        async fn copy_object(&self, _request: CopyRequest) -> Result<WriteResponse> {
            unavailable()
        }

        async fn get_object(&self, _location: &Location) -> Result<GetResponse> {
            unavailable()
        }

        async fn list_objects(
            &self,
            _bucket: &str,
            _prefix: &str,
            _continuation: Option<String>,
        ) -> Result<ListPage> {
            unavailable()
        }

        async fn select_object_content(&self, _request: SelectRequest) -> Result<FrameStream> {
            unavailable()
        }
    }
}
