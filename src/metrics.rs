// Build run metrics
//
// Counters for one orchestrator run, logged as a summary when the run stops

use crate::services::Outcome;
use std::time::{Duration, Instant};

/// Per-run build counters.
///
/// The orchestrator is single-threaded, so these are plain fields owned by it.
/// Counts cover this run only; steps finished by earlier runs are not included.
#[derive(Debug)]
pub struct BuildMetrics {
    /// Steps installed cleanly
    pub installed: usize,

    /// Steps installed with warnings
    pub warned: usize,

    /// Steps recorded Failed after exhausting retries
    pub failed: usize,

    /// Steps skipped because the game already has them
    pub skipped: usize,

    /// Retries consumed
    pub retries: usize,

    /// Mods uninstalled before a reinstall
    pub uninstalled: usize,

    /// Installer processes started
    pub invocations: usize,

    /// Total wall time spent inside the installer
    pub installer_time: Duration,

    start_time: Instant,
}

impl BuildMetrics {
    pub fn new() -> Self {
        Self {
            installed: 0,
            warned: 0,
            failed: 0,
            skipped: 0,
            retries: 0,
            uninstalled: 0,
            invocations: 0,
            installer_time: Duration::ZERO,
            start_time: Instant::now(),
        }
    }

    /// Record one installer attempt
    pub fn record_invocation(&mut self, duration: Duration) {
        self.invocations += 1;
        self.installer_time += duration;
    }

    pub fn record_retry(&mut self) {
        self.retries += 1;
    }

    /// Record the terminal outcome of a step
    pub fn record_outcome(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Success => self.installed += 1,
            Outcome::Warning => self.warned += 1,
            Outcome::Error => self.failed += 1,
        }
    }

    pub fn record_skipped(&mut self) {
        self.skipped += 1;
    }

    pub fn record_uninstall(&mut self) {
        self.uninstalled += 1;
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average installer time per invocation in milliseconds
    pub fn avg_invocation_ms(&self) -> f64 {
        if self.invocations > 0 {
            self.installer_time.as_millis() as f64 / self.invocations as f64
        } else {
            0.0
        }
    }

    pub fn log_summary(&self) {
        tracing::info!("=== Build Summary ===");
        tracing::info!("Elapsed: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Steps: {} installed, {} with warnings, {} failed, {} skipped",
            self.installed,
            self.warned,
            self.failed,
            self.skipped
        );
        if self.uninstalled > 0 {
            tracing::info!("Mods uninstalled for reinstall: {}", self.uninstalled);
        }
        tracing::info!(
            "Installer: {} invocations, {} retries, {:.2}s total (avg: {:.2}ms)",
            self.invocations,
            self.retries,
            self.installer_time.as_secs_f64(),
            self.avg_invocation_ms()
        );
    }
}

impl Default for BuildMetrics {
    fn default() -> Self {
        Self::new()
    }
}
