//! Statistics tracking for the telemetry pipeline.
//!
//! Counts what the reader loop sees and does: lines and bytes read, records
//! per kind, rejections, and how many values the change gate forwarded or
//! held back.

use hdrhistogram::Histogram;
use serde::Serialize;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::parser::RecordKind;

/// Thread-safe statistics collector for the reader loop.
#[derive(Debug)]
pub struct PipelineStats {
    /// Lines received from the source
    pub lines: AtomicU64,

    /// Total bytes of raw input processed
    pub bytes_processed: AtomicU64,

    /// `pm` records seen
    pub process_value_records: AtomicU64,

    /// `z` records seen
    pub event_records: AtomicU64,

    /// Records with an unrecognized first token
    pub unknown_records: AtomicU64,

    /// Lines or records dropped as malformed
    pub rejected_records: AtomicU64,

    /// Single `pm` fields skipped because they did not convert
    pub field_failures: AtomicU64,

    /// Values forwarded to the bus
    pub forwarded_values: AtomicU64,

    /// Values held back by the change gate
    pub suppressed_values: AtomicU64,

    /// Histogram of raw line lengths
    line_length_histogram: RwLock<Histogram<u64>>,

    /// When stats collection started
    start_time: Instant,
}

impl PipelineStats {
    /// Create a new statistics collector.
    pub fn new() -> Self {
        Self {
            lines: AtomicU64::new(0),
            bytes_processed: AtomicU64::new(0),
            process_value_records: AtomicU64::new(0),
            event_records: AtomicU64::new(0),
            unknown_records: AtomicU64::new(0),
            rejected_records: AtomicU64::new(0),
            field_failures: AtomicU64::new(0),
            forwarded_values: AtomicU64::new(0),
            suppressed_values: AtomicU64::new(0),
            // Line length: 1 byte to 4KB, 3 significant figures
            line_length_histogram: RwLock::new(
                Histogram::new_with_bounds(1, 4_096, 3)
                    .expect("Failed to create line length histogram"),
            ),
            start_time: Instant::now(),
        }
    }

    /// Record one raw line.
    pub fn record_line(&self, bytes: usize) {
        self.lines.fetch_add(1, Ordering::Relaxed);
        self.bytes_processed
            .fetch_add(bytes as u64, Ordering::Relaxed);
        if let Ok(mut hist) = self.line_length_histogram.write() {
            let _ = hist.record((bytes as u64).clamp(1, 4_096));
        }
    }

    /// Record a classified record.
    pub fn record_kind(&self, kind: RecordKind) {
        let counter = match kind {
            RecordKind::ProcessValues => &self.process_value_records,
            RecordKind::Event => &self.event_records,
            RecordKind::Unknown => &self.unknown_records,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a dropped line or rejected record.
    pub fn record_rejected(&self) {
        self.rejected_records.fetch_add(1, Ordering::Relaxed);
    }

    /// Record skipped `pm` fields.
    pub fn record_field_failures(&self, count: usize) {
        self.field_failures
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Record the outcome of one publish proposal.
    pub fn record_publish(&self, forwarded: bool) {
        let counter = if forwarded {
            &self.forwarded_values
        } else {
            &self.suppressed_values
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the elapsed time since stats collection started.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Generate a summary report.
    pub fn summary(&self) -> StatsSummary {
        let line_length_percentiles = self
            .line_length_histogram
            .read()
            .ok()
            .filter(|h| h.len() > 0)
            .map(|h| HistogramPercentiles {
                p50: h.value_at_quantile(0.50),
                p90: h.value_at_quantile(0.90),
                p99: h.value_at_quantile(0.99),
                min: h.min(),
                max: h.max(),
                mean: h.mean(),
            });

        StatsSummary {
            elapsed_secs: self.elapsed().as_secs_f64(),
            lines: self.lines.load(Ordering::Relaxed),
            bytes_processed: self.bytes_processed.load(Ordering::Relaxed),
            process_value_records: self.process_value_records.load(Ordering::Relaxed),
            event_records: self.event_records.load(Ordering::Relaxed),
            unknown_records: self.unknown_records.load(Ordering::Relaxed),
            rejected_records: self.rejected_records.load(Ordering::Relaxed),
            field_failures: self.field_failures.load(Ordering::Relaxed),
            forwarded_values: self.forwarded_values.load(Ordering::Relaxed),
            suppressed_values: self.suppressed_values.load(Ordering::Relaxed),
            line_length_percentiles,
        }
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Percentile values from a histogram.
#[derive(Debug, Clone, Serialize)]
pub struct HistogramPercentiles {
    pub p50: u64,
    pub p90: u64,
    pub p99: u64,
    pub min: u64,
    pub max: u64,
    pub mean: f64,
}

/// Summary of collected statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSummary {
    pub elapsed_secs: f64,
    pub lines: u64,
    pub bytes_processed: u64,
    pub process_value_records: u64,
    pub event_records: u64,
    pub unknown_records: u64,
    pub rejected_records: u64,
    pub field_failures: u64,
    pub forwarded_values: u64,
    pub suppressed_values: u64,
    pub line_length_percentiles: Option<HistogramPercentiles>,
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "═══════════════════════════════════════════════════════")?;
        writeln!(f, "               BOILER TELEMETRY STATISTICS")?;
        writeln!(f, "═══════════════════════════════════════════════════════")?;
        writeln!(f)?;
        writeln!(f, "Runtime: {:.1}s", self.elapsed_secs)?;
        writeln!(f, "Lines: {}", self.lines)?;
        writeln!(f, "Bytes processed: {} KB", self.bytes_processed / 1024)?;
        writeln!(f, "Process value records: {}", self.process_value_records)?;
        writeln!(f, "Event records: {}", self.event_records)?;
        writeln!(f, "Unknown records: {}", self.unknown_records)?;
        writeln!(f, "Rejected records: {}", self.rejected_records)?;
        writeln!(f, "Skipped fields: {}", self.field_failures)?;
        let proposed = self.forwarded_values + self.suppressed_values;
        writeln!(
            f,
            "Values forwarded: {} of {} ({:.1}%)",
            self.forwarded_values,
            proposed,
            if proposed > 0 {
                self.forwarded_values as f64 / proposed as f64 * 100.0
            } else {
                0.0
            }
        )?;

        if let Some(ref p) = self.line_length_percentiles {
            writeln!(f)?;
            writeln!(f, "Line Length Distribution (bytes):")?;
            writeln!(f, "  Min: {}, Max: {}, Mean: {:.1}", p.min, p.max, p.mean)?;
            writeln!(f, "  P50: {}, P90: {}, P99: {}", p.p50, p.p90, p.p99)?;
        }

        Ok(())
    }
}
