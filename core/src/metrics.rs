use std::time::{Duration, Instant};
use tracing::info;

/// Counters for one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    start_time: Option<Instant>,
    end_time: Option<Instant>,
    records_read: u64,
    records_transformed: u64,
    documents_inserted: u64,
    archive_key: Option<String>,
    archive_failed: bool,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_run(&mut self) {
        self.start_time = Some(Instant::now());
    }

    pub fn end_run(&mut self) {
        self.end_time = Some(Instant::now());
    }

    pub fn record_read(&mut self, rows: usize) {
        self.records_read += rows as u64;
    }

    pub fn record_transformed(&mut self, rows: usize) {
        self.records_transformed += rows as u64;
    }

    pub fn record_inserted(&mut self, documents: u64) {
        self.documents_inserted += documents;
    }

    pub fn record_archived(&mut self, archive_key: &str) {
        self.archive_key = Some(archive_key.to_string());
    }

    pub fn record_archive_failure(&mut self) {
        self.archive_failed = true;
    }

    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    pub fn documents_inserted(&self) -> u64 {
        self.documents_inserted
    }

    pub fn elapsed(&self) -> Duration {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => end.duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }

    pub fn print_summary(&self) {
        let duration = self.elapsed();
        let secs = duration.as_secs_f64();
        let throughput = if secs > 0.0 {
            self.records_read as f64 / secs
        } else {
            0.0
        };

        info!(
            duration = ?duration,
            records_read = self.records_read,
            records_transformed = self.records_transformed,
            documents_inserted = self.documents_inserted,
            archive_key = self.archive_key.as_deref().unwrap_or("-"),
            archive_failed = self.archive_failed,
            throughput,
            "Run summary"
        );
    }
}
