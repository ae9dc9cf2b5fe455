//! Batch execution
//!
//! Runs transfer items on a bounded pool of tokio tasks. Outcomes are
//! index-aligned with the input: slot `i` always holds the result of item
//! `i`, whatever order the transfers finish in. A failing item never
//! cancels the others.

use super::copier::Copier;
use super::planner::TransferItem;
use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::location::Location;
use crate::progress::ProgressReporter;
use crate::storage::ObjectStore;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Outcome of one transfer item
pub type TransferOutcome = Result<Location>;

/// Index-aligned outcomes of a batch
#[derive(Debug)]
pub struct BatchResult {
    /// One outcome per input item, in input order
    pub outcomes: Vec<TransferOutcome>,
    /// Sum of item sizes
    pub total_bytes: u64,
    /// Wall-clock duration
    pub duration: Duration,
}

impl BatchResult {
    /// Number of items in the batch
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Check if the batch was empty
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Check if every item succeeded
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(Result::is_ok)
    }

    /// Number of successful items
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    /// Failed items with their input index
    pub fn failures(&self) -> Vec<(usize, &TransferError)> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(i, o)| o.as_ref().err().map(|e| (i, e)))
            .collect()
    }

    /// Consume into the outcomes
    pub fn into_outcomes(self) -> Vec<TransferOutcome> {
        self.outcomes
    }

    /// Print summary to console
    pub fn print_summary(&self) {
        let throughput = if self.duration.as_secs_f64() > 0.0 {
            self.total_bytes as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        };

        println!("\n=== Transfer Summary ===");
        println!("Items:           {}", self.len());
        println!("Succeeded:       {}", self.succeeded());
        println!("Bytes planned:   {}", humansize::format_size(self.total_bytes, humansize::BINARY));
        println!("Duration:        {:.2?}", self.duration);
        println!("Throughput:      {}/s", humansize::format_size(throughput as u64, humansize::BINARY));

        let failures = self.failures();
        if !failures.is_empty() {
            println!("\nFailures: {}", failures.len());
            for (index, error) in failures {
                println!("  #{} - {}", index, error);
            }
        }
    }
}

/// Runs batches of transfers with bounded parallelism
pub struct Executor {
    copier: Arc<Copier>,
    progress: Option<Arc<ProgressReporter>>,
}

impl Executor {
    /// Create an executor after validating `config`
    pub fn new(store: Arc<dyn ObjectStore>, config: TransferConfig) -> Result<Self> {
        Ok(Self {
            copier: Arc::new(Copier::new(store, config)?),
            progress: None,
        })
    }

    /// Report progress of each batch
    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    /// The single-item copier
    pub fn copier(&self) -> &Copier {
        &self.copier
    }

    /// Run `items` with the configured concurrency
    pub async fn run(&self, items: Vec<TransferItem>) -> Result<BatchResult> {
        let concurrency = self.copier.config().concurrency;
        self.execute(items, concurrency).await
    }

    /// Run `items` with at most `concurrency` transfers in flight.
    ///
    /// With a concurrency of 1 items run strictly one after another.
    #[tracing::instrument(skip_all, fields(items = items.len(), concurrency = concurrency))]
    pub async fn execute(
        &self,
        items: Vec<TransferItem>,
        concurrency: usize,
    ) -> Result<BatchResult> {
        if concurrency == 0 {
            return Err(TransferError::config("concurrency must be at least 1"));
        }

        let start = Instant::now();
        let total_bytes: u64 = items.iter().map(|item| item.size).sum();
        if let Some(progress) = &self.progress {
            progress.set_totals(items.len() as u64, total_bytes);
        }

        // Slots free up as soon as any transfer finishes; order is restored by index
        let mut finished: Vec<(usize, TransferOutcome)> = stream::iter(items.into_iter().enumerate())
            .map(|(index, item)| {
                let copier = Arc::clone(&self.copier);
                let progress = self.progress.clone();
                async move {
                    let label = item.destination.to_string();
                    let size = item.size;
                    let outcome = tokio::spawn(async move { copier.transfer(&item).await })
                        .await
                        .unwrap_or_else(|e| Err(TransferError::Join(e.to_string())));

                    if let Err(e) = &outcome {
                        warn!(index, destination = %label, "transfer failed: {}", e);
                    }
                    if let Some(progress) = progress {
                        progress.item_finished(&label, size, outcome.is_ok());
                    }
                    (index, outcome)
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;
        finished.sort_unstable_by_key(|(index, _)| *index);
        let outcomes: Vec<TransferOutcome> = finished.into_iter().map(|(_, outcome)| outcome).collect();

        if let Some(progress) = &self.progress {
            progress.finish();
        }

        let result = BatchResult {
            outcomes,
            total_bytes,
            duration: start.elapsed(),
        };
        info!(
            succeeded = result.succeeded(),
            failed = result.len() - result.succeeded(),
            "batch complete"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mock::{MockStore, Request};
    use crate::storage::{
        CopyRequest, FrameStream, GetResponse, ListPage, ObjectHead, PutRequest, SelectRequest,
        WriteResponse,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Delays heads per item index and tracks parallelism
    struct SlowStore {
        inner: MockStore,
        delay: fn(u64) -> Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        first_running: AtomicBool,
        overtaken: AtomicUsize,
    }

    impl SlowStore {
        /// Later items finish first
        fn new() -> Self {
            Self::with_delay(|index| Duration::from_millis(40u64.saturating_sub(index * 4)))
        }

        fn with_delay(delay: fn(u64) -> Duration) -> Self {
            Self {
                inner: MockStore::new(),
                delay,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                first_running: AtomicBool::new(false),
                overtaken: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ObjectStore for SlowStore {
        async fn head_object(&self, location: &Location) -> Result<Option<ObjectHead>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let index: u64 = location
                .key()
                .trim_start_matches("item-")
                .parse()
                .unwrap_or(0);
            if index == 0 {
                self.first_running.store(true, Ordering::SeqCst);
            }
            tokio::time::sleep((self.delay)(index)).await;
            if index == 0 {
                self.first_running.store(false, Ordering::SeqCst);
            } else if self.first_running.load(Ordering::SeqCst) {
                self.overtaken.fetch_add(1, Ordering::SeqCst);
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.inner.head_object(location).await
        }

        async fn put_object(&self, request: PutRequest) -> Result<WriteResponse> {
            self.inner.put_object(request).await
        }

        async fn copy_object(&self, request: CopyRequest) -> Result<WriteResponse> {
            self.inner.copy_object(request).await
        }

        async fn get_object(&self, location: &Location) -> Result<GetResponse> {
            self.inner.get_object(location).await
        }

        async fn list_objects(
            &self,
            bucket: &str,
            prefix: &str,
            continuation: Option<String>,
        ) -> Result<ListPage> {
            self.inner.list_objects(bucket, prefix, continuation).await
        }

        async fn select_object_content(&self, request: SelectRequest) -> Result<FrameStream> {
            self.inner.select_object_content(request).await
        }
    }

    fn items(dir: &TempDir, count: usize) -> Vec<TransferItem> {
        (0..count)
            .map(|i| {
                let path = dir.path().join(format!("file-{i}"));
                std::fs::write(&path, format!("content {i}")).unwrap();
                let size = std::fs::metadata(&path).unwrap().len();
                TransferItem::new(
                    Location::local(&path).unwrap(),
                    Location::remote("bucket", format!("item-{i}")),
                    size,
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_outcomes_follow_input_order() {
        let dir = TempDir::new().unwrap();
        for concurrency in [1, 2, 8] {
            let store = Arc::new(SlowStore::new());
            let executor = Executor::new(store.clone(), TransferConfig::default()).unwrap();

            let result = executor.execute(items(&dir, 8), concurrency).await.unwrap();

            assert!(result.is_success());
            let keys: Vec<String> = result
                .into_outcomes()
                .into_iter()
                .map(|o| o.unwrap().key().to_string())
                .collect();
            let expected: Vec<String> = (0..8).map(|i| format!("item-{i}")).collect();
            assert_eq!(keys, expected, "concurrency {concurrency}");
            assert!(store.peak.load(Ordering::SeqCst) <= concurrency);
        }
    }

    #[tokio::test]
    async fn test_slow_first_item_does_not_hold_other_slots() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SlowStore::with_delay(|index| {
            Duration::from_millis(if index == 0 { 400 } else { 5 })
        }));
        let executor = Executor::new(store.clone(), TransferConfig::default()).unwrap();

        let result = executor.execute(items(&dir, 20), 4).await.unwrap();

        assert!(result.is_success());
        assert_eq!(result.outcomes[0].as_ref().unwrap().key(), "item-0");
        assert_eq!(result.outcomes[19].as_ref().unwrap().key(), "item-19");
        // The other three slots keep draining the list meanwhile
        assert!(store.overtaken.load(Ordering::SeqCst) >= 10);
        assert!(store.peak.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn test_sequential_when_concurrency_is_one() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SlowStore::new());
        let executor = Executor::new(store.clone(), TransferConfig::default()).unwrap();

        executor.execute(items(&dir, 4), 1).await.unwrap();

        assert_eq!(store.peak.load(Ordering::SeqCst), 1);
        let heads: Vec<String> = store
            .inner
            .requests()
            .into_iter()
            .filter_map(|r| match r {
                Request::Head(location) => Some(location.key().to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(heads, vec!["item-0", "item-1", "item-2", "item-3"]);
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MockStore::new());
        store.fail_writes_to("item-3");
        let executor = Executor::new(store.clone(), TransferConfig::default())
            .unwrap()
            .with_progress(ProgressReporter::disabled());

        let result = executor.execute(items(&dir, 6), 3).await.unwrap();

        assert!(!result.is_success());
        assert_eq!(result.succeeded(), 5);
        let failures = result.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, 3);
        assert_eq!(store.count(Request::is_put), 6);
    }

    #[tokio::test]
    async fn test_run_uses_configured_concurrency() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SlowStore::new());
        let config = TransferConfig {
            concurrency: 3,
            ..Default::default()
        };
        let executor = Executor::new(store.clone(), config).unwrap();

        let result = executor.run(items(&dir, 9)).await.unwrap();

        assert_eq!(result.len(), 9);
        assert!(store.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_zero_concurrency_rejected() {
        let executor = Executor::new(Arc::new(MockStore::new()), TransferConfig::default()).unwrap();
        let err = executor.execute(Vec::new(), 0).await.unwrap_err();
        assert!(matches!(err, TransferError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let executor = Executor::new(Arc::new(MockStore::new()), TransferConfig::default()).unwrap();
        let result = executor.execute(Vec::new(), 4).await.unwrap();
        assert!(result.is_empty());
        assert!(result.is_success());
    }
}
