//! Memory pressure monitoring.
//!
//! Samples system and process memory via `sysinfo`, on demand and on a
//! periodic background tick, and invokes configurable callbacks when
//! usage crosses the warning or critical thresholds.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sysinfo::System;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Bytes per mebibyte.
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Thresholds and cadence for the monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Background sampling interval.
    pub sample_interval: Duration,
    /// Usage percentage where pressure becomes moderate.
    pub moderate_threshold_pct: f64,
    /// Usage percentage where the warning callback fires.
    pub warning_threshold_pct: f64,
    /// Usage percentage where the critical callback fires.
    pub critical_threshold_pct: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(30),
            moderate_threshold_pct: 50.0,
            warning_threshold_pct: 75.0,
            critical_threshold_pct: 90.0,
        }
    }
}

/// Bucketed memory pressure derived from usage vs thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PressureLevel {
    /// Below the moderate threshold.
    Low,
    /// At or above the moderate threshold.
    Moderate,
    /// At or above the warning threshold.
    High,
    /// At or above the critical threshold.
    Critical,
}

/// One memory sample.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    /// Total system memory in MiB.
    pub total_mb: f64,
    /// Used system memory in MiB.
    pub used_mb: f64,
    /// Available system memory in MiB.
    pub available_mb: f64,
    /// `used / total` as a percentage.
    pub usage_pct: f64,
    /// Resident set size of this process in MiB.
    pub process_rss_mb: f64,
    /// Virtual memory of this process in MiB.
    pub process_virtual_mb: f64,
    /// When the sample was taken.
    pub timestamp: DateTime<Utc>,
    /// Samples taken since the monitor was created.
    pub sample_count: u64,
    /// Whether usage is at or above the warning threshold.
    pub is_warning_level: bool,
    /// Whether usage is at or above the critical threshold.
    pub is_critical_level: bool,
}

/// Callback invoked with the sample that crossed a threshold.
pub type PressureCallback = Box<dyn Fn(&MemoryStats) + Send + Sync>;

struct Sampler {
    system: System,
    sample_count: u64,
}

/// Samples memory and dispatches threshold callbacks.
pub struct MemoryMonitor {
    config: MonitorConfig,
    sampler: Mutex<Sampler>,
    last: RwLock<Option<MemoryStats>>,
    warning_cb: Mutex<Option<PressureCallback>>,
    critical_cb: Mutex<Option<PressureCallback>>,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryMonitor {
    /// Monitor with the given thresholds; sampling starts on
    /// [`MemoryMonitor::start`].
    pub fn new(config: MonitorConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            sampler: Mutex::new(Sampler {
                system: System::new(),
                sample_count: 0,
            }),
            last: RwLock::new(None),
            warning_cb: Mutex::new(None),
            critical_cb: Mutex::new(None),
            shutdown,
            worker: Mutex::new(None),
        }
    }

    /// Install the warning-threshold callback.
    ///
    /// Callbacks run synchronously on the sampling path and must not
    /// block indefinitely.
    pub fn on_warning(&self, callback: PressureCallback) {
        if let Ok(mut slot) = self.warning_cb.lock() {
            *slot = Some(callback);
        }
    }

    /// Install the critical-threshold callback.
    pub fn on_critical(&self, callback: PressureCallback) {
        if let Ok(mut slot) = self.critical_cb.lock() {
            *slot = Some(callback);
        }
    }

    /// Take a fresh sample.
    pub fn sample(&self) -> MemoryStats {
        let Ok(mut sampler) = self.sampler.lock() else {
            return self.empty_stats();
        };
        sampler.system.refresh_memory();

        let pid = sysinfo::get_current_pid().ok();
        let (rss, virt) = match pid {
            Some(pid) => {
                sampler.system.refresh_process(pid);
                sampler
                    .system
                    .process(pid)
                    .map(|p| (p.memory(), p.virtual_memory()))
                    .unwrap_or((0, 0))
            }
            None => (0, 0),
        };

        sampler.sample_count = sampler.sample_count.saturating_add(1);

        #[allow(clippy::cast_precision_loss)]
        let (total_mb, used_mb, available_mb, process_rss_mb, process_virtual_mb) = (
            (sampler.system.total_memory() as f64) / BYTES_PER_MB,
            (sampler.system.used_memory() as f64) / BYTES_PER_MB,
            (sampler.system.available_memory() as f64) / BYTES_PER_MB,
            (rss as f64) / BYTES_PER_MB,
            (virt as f64) / BYTES_PER_MB,
        );
        let usage_pct = if total_mb > 0.0 {
            used_mb / total_mb * 100.0
        } else {
            0.0
        };

        let stats = MemoryStats {
            total_mb,
            used_mb,
            available_mb,
            usage_pct,
            process_rss_mb,
            process_virtual_mb,
            timestamp: Utc::now(),
            sample_count: sampler.sample_count,
            is_warning_level: usage_pct >= self.config.warning_threshold_pct,
            is_critical_level: usage_pct >= self.config.critical_threshold_pct,
        };
        drop(sampler);

        if let Ok(mut last) = self.last.write() {
            *last = Some(stats.clone());
        }
        stats
    }

    /// The most recent sample, taking one if none exists yet.
    pub fn stats(&self) -> MemoryStats {
        if let Ok(last) = self.last.read() {
            if let Some(stats) = last.as_ref() {
                return stats.clone();
            }
        }
        self.sample()
    }

    /// Force a sample and invoke the matching threshold callback.
    pub fn check_memory(&self) -> MemoryStats {
        let stats = self.sample();
        if stats.is_critical_level {
            warn!(
                usage_pct = stats.usage_pct,
                "memory usage at critical level"
            );
            if let Ok(slot) = self.critical_cb.lock() {
                if let Some(callback) = slot.as_ref() {
                    callback(&stats);
                }
            }
        } else if stats.is_warning_level {
            warn!(usage_pct = stats.usage_pct, "memory usage at warning level");
            if let Ok(slot) = self.warning_cb.lock() {
                if let Some(callback) = slot.as_ref() {
                    callback(&stats);
                }
            }
        }
        stats
    }

    /// Force a refresh and return before/after snapshots.
    ///
    /// Rust has no collector to trigger; this re-samples so callers
    /// can observe how much pressure changed since the last sample.
    pub fn force_reclaim(&self) -> (MemoryStats, MemoryStats) {
        let before = self.stats();
        let after = self.sample();
        (before, after)
    }

    /// Pressure bucket for a usage percentage.
    pub fn level_for(&self, usage_pct: f64) -> PressureLevel {
        if usage_pct >= self.config.critical_threshold_pct {
            PressureLevel::Critical
        } else if usage_pct >= self.config.warning_threshold_pct {
            PressureLevel::High
        } else if usage_pct >= self.config.moderate_threshold_pct {
            PressureLevel::Moderate
        } else {
            PressureLevel::Low
        }
    }

    /// Pressure bucket of the most recent sample.
    pub fn pressure_level(&self) -> PressureLevel {
        self.level_for(self.stats().usage_pct)
    }

    /// Start the background sampling task. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let Ok(mut worker) = self.worker.lock() else {
            return;
        };
        if worker.is_some() {
            return;
        }
        // Reset the shutdown flag so a stopped monitor can restart.
        self.shutdown.send_replace(false);
        let monitor = Arc::clone(self);
        let mut shutdown_rx = self.shutdown.subscribe();
        let interval = self.config.sample_interval;
        *worker = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let stats = monitor.check_memory();
                        debug!(
                            usage_pct = stats.usage_pct,
                            rss_mb = stats.process_rss_mb,
                            "memory sampled"
                        );
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        }));
    }

    /// Stop the background task and wait for it to exit. Idempotent.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let handle = match self.worker.lock() {
            Ok(mut worker) => worker.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    fn empty_stats(&self) -> MemoryStats {
        MemoryStats {
            total_mb: 0.0,
            used_mb: 0.0,
            available_mb: 0.0,
            usage_pct: 0.0,
            process_rss_mb: 0.0,
            process_virtual_mb: 0.0,
            timestamp: Utc::now(),
            sample_count: 0,
            is_warning_level: false,
            is_critical_level: false,
        }
    }
}
