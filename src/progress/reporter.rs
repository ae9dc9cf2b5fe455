//! Batch progress reporter
//!
//! Uses indicatif to show:
//! - Item count progress, including failures
//! - Byte progress with throughput and ETA
//! - The most recently finished item

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

const ITEMS_TEMPLATE: &str =
    "{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} items ({percent}%)";
const BYTES_TEMPLATE: &str =
    "{prefix:.bold.dim} [{bar:40.green/white}] {bytes}/{total_bytes} ({bytes_per_sec}, ETA {eta})";

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

/// Progress of a transfer batch
pub struct ProgressReporter {
    multi: MultiProgress,
    items_bar: ProgressBar,
    bytes_bar: ProgressBar,
    status: ProgressBar,
    start_time: Instant,
    total_items: AtomicU64,
    total_bytes: AtomicU64,
    items_done: AtomicU64,
    items_failed: AtomicU64,
    bytes_done: AtomicU64,
    enabled: AtomicBool,
}

impl ProgressReporter {
    /// Create a reporter drawing to stderr
    pub fn new() -> Self {
        let multi = MultiProgress::new();

        let status = multi.add(ProgressBar::new_spinner());
        status.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );

        let items_bar = multi.add(ProgressBar::new(0));
        items_bar.set_style(bar_style(ITEMS_TEMPLATE));
        items_bar.set_prefix("Items");

        let bytes_bar = multi.add(ProgressBar::new(0));
        bytes_bar.set_style(bar_style(BYTES_TEMPLATE));
        bytes_bar.set_prefix("Data ");

        Self {
            multi,
            items_bar,
            bytes_bar,
            status,
            start_time: Instant::now(),
            total_items: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            items_done: AtomicU64::new(0),
            items_failed: AtomicU64::new(0),
            bytes_done: AtomicU64::new(0),
            enabled: AtomicBool::new(true),
        }
    }

    /// Create a hidden reporter (quiet mode and tests)
    pub fn disabled() -> Self {
        let reporter = Self::new();
        reporter.enabled.store(false, Ordering::SeqCst);
        reporter.multi.set_draw_target(ProgressDrawTarget::hidden());
        reporter
    }

    /// Set the batch size
    pub fn set_totals(&self, items: u64, bytes: u64) {
        self.total_items.store(items, Ordering::Relaxed);
        self.total_bytes.store(bytes, Ordering::Relaxed);
        self.items_bar.set_length(items);
        self.bytes_bar.set_length(bytes);
    }

    /// Record one finished item
    pub fn item_finished(&self, label: &str, bytes: u64, succeeded: bool) {
        self.items_done.fetch_add(1, Ordering::Relaxed);
        self.items_bar.inc(1);

        if succeeded {
            self.bytes_done.fetch_add(bytes, Ordering::Relaxed);
            self.bytes_bar.inc(bytes);
            self.status.set_message(truncate(label));
        } else {
            self.items_failed.fetch_add(1, Ordering::Relaxed);
            self.status.set_message(format!("failed: {}", truncate(label)));
        }
    }

    /// Elapsed time since creation
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Bytes per second so far
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.bytes_done.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Close all bars
    pub fn finish(&self) {
        let failed = self.items_failed.load(Ordering::Relaxed);
        if failed == 0 {
            self.status.finish_with_message("✓ done");
            self.items_bar.finish();
            self.bytes_bar.finish();
        } else {
            self.status.finish_with_message(format!("✗ {failed} failed"));
            self.items_bar.abandon();
            self.bytes_bar.abandon();
        }
    }

    /// Check if bars are drawn
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Snapshot of the counters
    pub fn summary(&self) -> ProgressSummary {
        ProgressSummary {
            total_items: self.total_items.load(Ordering::Relaxed),
            items_done: self.items_done.load(Ordering::Relaxed),
            items_failed: self.items_failed.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            bytes_done: self.bytes_done.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate(label: &str) -> String {
    let chars: Vec<char> = label.chars().collect();
    if chars.len() > 60 {
        let tail: String = chars[chars.len() - 57..].iter().collect();
        format!("...{tail}")
    } else {
        label.to_string()
    }
}

/// Counters of a batch
#[derive(Debug, Clone)]
pub struct ProgressSummary {
    /// Items in the batch
    pub total_items: u64,
    /// Items finished, successfully or not
    pub items_done: u64,
    /// Items that failed
    pub items_failed: u64,
    /// Bytes in the batch
    pub total_bytes: u64,
    /// Bytes of successfully finished items
    pub bytes_done: u64,
    /// Elapsed time
    pub elapsed: Duration,
}

impl ProgressSummary {
    /// Item completion percentage
    pub fn percentage(&self) -> f64 {
        if self.total_items == 0 {
            0.0
        } else {
            (self.items_done as f64 / self.total_items as f64) * 100.0
        }
    }
}
