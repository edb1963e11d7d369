//! Processing counters and their JSON snapshot.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::MetricsError;

/// Default location of the snapshot file.
pub const DEFAULT_METRICS_FILE: &str = "logs/metrics.json";

/// Counters for one process lifetime. Owned by the poll loop.
#[derive(Debug, Clone)]
pub struct ProcessingMetrics {
    pub total_processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub low_confidence: u64,
    pub start_time: DateTime<Utc>,
}

impl Default for ProcessingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingMetrics {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(start_time: DateTime<Utc>) -> Self {
        Self {
            total_processed: 0,
            successful: 0,
            failed: 0,
            low_confidence: 0,
            start_time,
        }
    }

    pub fn record_success(&mut self) {
        self.total_processed += 1;
        self.successful += 1;
    }

    pub fn record_failure(&mut self) {
        self.total_processed += 1;
        self.failed += 1;
    }

    /// Does not touch `total_processed`; a low-confidence message is also
    /// a success or a failure.
    pub fn record_low_confidence(&mut self) {
        self.low_confidence += 1;
    }

    /// Zero the counters and restart the uptime clock.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.snapshot_at(Utc::now())
    }

    pub fn snapshot_at(&self, now: DateTime<Utc>) -> MetricsSnapshot {
        let uptime_secs = (now - self.start_time).num_milliseconds().max(0) as f64 / 1000.0;
        let uptime_hours = uptime_secs / 3600.0;

        let success_rate = if self.total_processed > 0 {
            self.successful as f64 / self.total_processed as f64 * 100.0
        } else {
            0.0
        };
        let emails_per_hour = if uptime_secs > 0.0 {
            self.total_processed as f64 / uptime_hours
        } else {
            0.0
        };

        MetricsSnapshot {
            total_processed: self.total_processed,
            successful: self.successful,
            failed: self.failed,
            low_confidence: self.low_confidence,
            success_rate: round2(success_rate),
            uptime_hours: round2(uptime_hours),
            emails_per_hour: round2(emails_per_hour),
        }
    }

    pub fn log_stats(&self) {
        let s = self.snapshot();
        info!(
            processed = s.total_processed,
            successful = s.successful,
            failed = s.failed,
            low_confidence = s.low_confidence,
            success_rate = s.success_rate,
            uptime_hours = s.uptime_hours,
            emails_per_hour = s.emails_per_hour,
            "Processing stats"
        );
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Point-in-time view written to the metrics file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub low_confidence: u64,
    pub success_rate: f64,
    pub uptime_hours: f64,
    pub emails_per_hour: f64,
}

/// Snapshot destination. Writes go to a temp file in the same directory
/// and are renamed into place, so readers never see a partial file.
#[derive(Debug, Clone)]
pub struct MetricsFile {
    path: PathBuf,
}

impl MetricsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, snapshot: &MetricsSnapshot) -> Result<(), MetricsError> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, snapshot)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| MetricsError::Io(e.error))?;
        Ok(())
    }

    pub fn load(&self) -> Result<MetricsSnapshot, MetricsError> {
        let raw = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}
