use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::pipeline::Stage;

pub struct Metrics {
    // Counters
    uploads_total: AtomicUsize,
    uploads_succeeded: AtomicUsize,
    uploads_failed: AtomicUsize,
    stage_failures: AtomicUsize,

    // Timing (in microseconds)
    total_text_time_us: AtomicU64,
    total_entities_time_us: AtomicU64,
    total_tables_time_us: AtomicU64,

    // Counts
    text_runs: AtomicUsize,
    entity_runs: AtomicUsize,
    table_runs: AtomicUsize,
    entities_extracted: AtomicUsize,
    tables_extracted: AtomicUsize,
    spreadsheets_written: AtomicUsize,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            uploads_total: AtomicUsize::new(0),
            uploads_succeeded: AtomicUsize::new(0),
            uploads_failed: AtomicUsize::new(0),
            stage_failures: AtomicUsize::new(0),
            total_text_time_us: AtomicU64::new(0),
            total_entities_time_us: AtomicU64::new(0),
            total_tables_time_us: AtomicU64::new(0),
            text_runs: AtomicUsize::new(0),
            entity_runs: AtomicUsize::new(0),
            table_runs: AtomicUsize::new(0),
            entities_extracted: AtomicUsize::new(0),
            tables_extracted: AtomicUsize::new(0),
            spreadsheets_written: AtomicUsize::new(0),
        })
    }

    pub fn record_upload(&self, success: bool) {
        self.uploads_total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.uploads_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.uploads_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Counts failures whether or not the policy let the request continue.
    pub fn record_stage_failure(&self) {
        self.stage_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stage(&self, stage: Stage, duration: Duration) {
        let (total, runs) = match stage {
            Stage::Text => (&self.total_text_time_us, &self.text_runs),
            Stage::Entities => (&self.total_entities_time_us, &self.entity_runs),
            Stage::Tables => (&self.total_tables_time_us, &self.table_runs),
        };
        total.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_entities(&self, count: usize) {
        self.entities_extracted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_tables(&self, count: usize, spreadsheet_written: bool) {
        self.tables_extracted.fetch_add(count, Ordering::Relaxed);
        if spreadsheet_written {
            self.spreadsheets_written.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uploads_total: self.uploads_total.load(Ordering::Relaxed),
            uploads_succeeded: self.uploads_succeeded.load(Ordering::Relaxed),
            uploads_failed: self.uploads_failed.load(Ordering::Relaxed),
            stage_failures: self.stage_failures.load(Ordering::Relaxed),
            avg_text_time_ms: self.avg_time_ms(&self.total_text_time_us, &self.text_runs),
            avg_entities_time_ms: self.avg_time_ms(&self.total_entities_time_us, &self.entity_runs),
            avg_tables_time_ms: self.avg_time_ms(&self.total_tables_time_us, &self.table_runs),
            entities_extracted: self.entities_extracted.load(Ordering::Relaxed),
            tables_extracted: self.tables_extracted.load(Ordering::Relaxed),
            spreadsheets_written: self.spreadsheets_written.load(Ordering::Relaxed),
        }
    }

    fn avg_time_ms(&self, total_us: &AtomicU64, count: &AtomicUsize) -> f64 {
        let total = total_us.load(Ordering::Relaxed) as f64;
        let cnt = count.load(Ordering::Relaxed) as f64;
        if cnt > 0.0 {
            total / cnt / 1000.0 // Convert to ms
        } else {
            0.0
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub uploads_total: usize,
    pub uploads_succeeded: usize,
    pub uploads_failed: usize,
    pub stage_failures: usize,
    pub avg_text_time_ms: f64,
    pub avg_entities_time_ms: f64,
    pub avg_tables_time_ms: f64,
    pub entities_extracted: usize,
    pub tables_extracted: usize,
    pub spreadsheets_written: usize,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
