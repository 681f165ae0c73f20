use crate::pipeline::router::FanOutReport;
use crate::pipeline::types::StageState;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// Counters updated by a stage's own thread and read by anyone.
#[derive(Debug, Default)]
pub struct StageStats {
    pub runs: AtomicU64,
    pub processed: AtomicU64,
    pub failed: AtomicU64,
    pub delivered: AtomicU64,
    /// Jobs this stage produced that a full recipient mailbox lost.
    pub dropped_downstream: AtomicU64,
    /// Smoothed processing time per job.
    ms_per_job: RwLock<f64>,
}

impl StageStats {
    pub fn record_job(&self, duration_ms: f64) {
        let previous = self.processed.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut avg) = self.ms_per_job.write() {
            // Simple exponential moving average for smoothing durations
            if previous == 0 {
                *avg = duration_ms;
            } else {
                *avg = *avg * 0.9 + duration_ms * 0.1;
            }
        }
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fan_out(&self, report: &FanOutReport) {
        self.delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.dropped_downstream
            .fetch_add(report.dropped as u64, Ordering::Relaxed);
    }

    pub fn ms_per_job(&self) -> f64 {
        self.ms_per_job.read().map(|v| *v).unwrap_or(0.0)
    }
}

/// Point-in-time view of one stage, for progress reporting.
#[derive(Debug, Clone, Serialize)]
pub struct StageSnapshot {
    pub name: String,
    pub state: StageState,
    pub queued: usize,
    pub capacity: usize,
    pub dropped_incoming: u64,
    pub runs: u64,
    pub processed: u64,
    pub failed: u64,
    pub delivered: u64,
    pub dropped_downstream: u64,
    pub ms_per_job: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<String>,
}

impl StageSnapshot {
    pub fn jobs_per_sec(&self) -> f64 {
        if self.ms_per_job > 0.0 {
            1000.0 / self.ms_per_job
        } else {
            0.0
        }
    }
}
