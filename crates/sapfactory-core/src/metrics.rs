//! Global atomic counters for run and job throughput.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (the executor does this at the end of each run).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters. No allocations, no locking.
pub struct Metrics {
    runs_started: AtomicU64,
    runs_finished: AtomicU64,
    jobs_succeeded: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_skipped: AtomicU64,
    job_retries: AtomicU64,
    adapter_calls: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            runs_started: AtomicU64::new(0),
            runs_finished: AtomicU64::new(0),
            jobs_succeeded: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_skipped: AtomicU64::new(0),
            job_retries: AtomicU64::new(0),
            adapter_calls: AtomicU64::new(0),
        }
    }

    pub fn inc_runs_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_started", "counter incremented");
    }

    pub fn inc_runs_finished(&self) {
        self.runs_finished.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_finished", "counter incremented");
    }

    pub fn inc_jobs_succeeded(&self) {
        self.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_jobs_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_jobs_skipped(&self) {
        self.jobs_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// One extra attempt of a job after a transient adapter failure.
    pub fn inc_job_retries(&self) {
        self.job_retries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "job_retries", "counter incremented");
    }

    /// Any call into a simulation or real adapter.
    pub fn inc_adapter_calls(&self) {
        self.adapter_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            runs_started = self.runs_started(),
            runs_finished = self.runs_finished(),
            jobs_succeeded = self.jobs_succeeded(),
            jobs_failed = self.jobs_failed(),
            jobs_skipped = self.jobs_skipped(),
            job_retries = self.job_retries(),
            adapter_calls = self.adapter_calls(),
        );
    }

    pub fn runs_started(&self) -> u64 {
        self.runs_started.load(Ordering::Relaxed)
    }

    pub fn runs_finished(&self) -> u64 {
        self.runs_finished.load(Ordering::Relaxed)
    }

    pub fn jobs_succeeded(&self) -> u64 {
        self.jobs_succeeded.load(Ordering::Relaxed)
    }

    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    pub fn jobs_skipped(&self) -> u64 {
        self.jobs_skipped.load(Ordering::Relaxed)
    }

    pub fn job_retries(&self) -> u64 {
        self.job_retries.load(Ordering::Relaxed)
    }

    pub fn adapter_calls(&self) -> u64 {
        self.adapter_calls.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.runs_started.store(0, Ordering::Relaxed);
        self.runs_finished.store(0, Ordering::Relaxed);
        self.jobs_succeeded.store(0, Ordering::Relaxed);
        self.jobs_failed.store(0, Ordering::Relaxed);
        self.jobs_skipped.store(0, Ordering::Relaxed);
        self.job_retries.store(0, Ordering::Relaxed);
        self.adapter_calls.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        assert_eq!(m.runs_started(), 0);
        m.inc_runs_started();
        m.inc_runs_started();
        assert_eq!(m.runs_started(), 2);

        m.inc_jobs_failed();
        assert_eq!(m.jobs_failed(), 1);

        m.inc_adapter_calls();
        m.inc_adapter_calls();
        m.inc_adapter_calls();
        assert_eq!(m.adapter_calls(), 3);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_runs_finished();
        m.inc_jobs_succeeded();
        m.inc_jobs_skipped();
        m.inc_job_retries();
        m.reset();
        assert_eq!(m.runs_finished(), 0);
        assert_eq!(m.jobs_succeeded(), 0);
        assert_eq!(m.jobs_skipped(), 0);
        assert_eq!(m.job_retries(), 0);
    }
}
