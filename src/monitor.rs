//! Background resource monitor.
//!
//! A periodic task samples host statistics on a `tokio::time::interval` and
//! keeps the latest sample for `/stats`. It has its own cancellation token,
//! independent of the per-request tokens used by the orchestrator, and stops
//! when cancelled or dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::tools::stat::{collect_host_stats, HostStats};

type Sampler = Arc<dyn Fn() -> HostStats + Send + Sync>;

/// One host sample.
#[derive(Debug, Clone)]
pub struct MonitorSample {
    pub taken_at: DateTime<Utc>,
    pub stats: HostStats,
}

impl MonitorSample {
    /// One-line rendering for `/stats`.
    pub fn describe(&self) -> String {
        format!(
            "cpu {:.1}% | mem {}/{} MB | {} processes (at {})",
            self.stats.cpu_usage_percent,
            self.stats.memory_used_mb,
            self.stats.memory_total_mb,
            self.stats.process_count,
            self.taken_at.format("%H:%M:%S")
        )
    }
}

/// Handle to the running monitor task.
pub struct ResourceMonitor {
    latest: Arc<Mutex<Option<MonitorSample>>>,
    samples: Arc<AtomicU64>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ResourceMonitor {
    /// Start sampling the host every `interval`.
    pub fn start(interval: Duration) -> Self {
        Self::start_with(interval, Arc::new(collect_host_stats))
    }

    fn start_with(interval: Duration, sampler: Sampler) -> Self {
        let latest = Arc::new(Mutex::new(None));
        let samples = Arc::new(AtomicU64::new(0));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_monitor(
            interval.max(Duration::from_millis(10)),
            sampler,
            latest.clone(),
            samples.clone(),
            cancel.clone(),
        ));
        tracing::info!(interval_ms = interval.as_millis() as u64, "resource monitor started");

        Self {
            latest,
            samples,
            cancel,
            handle: Some(handle),
        }
    }

    /// Most recent sample, if one has been taken.
    pub fn latest(&self) -> Option<MonitorSample> {
        self.latest.lock().ok().and_then(|guard| guard.clone())
    }

    /// Number of samples taken so far.
    pub fn sample_count(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancel the task and wait for it to exit.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "resource monitor task ended abnormally");
            }
        }
        tracing::info!(samples = self.sample_count(), "resource monitor stopped");
    }
}

impl Drop for ResourceMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_monitor(
    interval: Duration,
    sampler: Sampler,
    latest: Arc<Mutex<Option<MonitorSample>>>,
    samples: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let sample = sampler.clone();
        let stats = match tokio::task::spawn_blocking(move || sample()).await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!(error = %e, "resource sample failed");
                continue;
            }
        };

        tracing::debug!(
            cpu_usage_percent = stats.cpu_usage_percent,
            memory_used_mb = stats.memory_used_mb,
            process_count = stats.process_count,
            "resource sample"
        );
        if let Ok(mut guard) = latest.lock() {
            *guard = Some(MonitorSample {
                taken_at: Utc::now(),
                stats,
            });
        }
        samples.fetch_add(1, Ordering::Relaxed);
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
