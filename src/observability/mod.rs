//! Observability for dispatch operations.
//!
//! Log events go through `tracing` when the `tracing` feature is enabled;
//! counters are always collected in [`DispatchMetrics`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Dispatch metrics collector.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    /// Messages transmitted successfully.
    pub messages_sent: AtomicU64,
    /// Messages that ended in failure (validation or transport).
    pub messages_failed: AtomicU64,
    /// Messages rejected by validation.
    pub validation_failures: AtomicU64,
    /// Transport attempts made.
    pub attempts: AtomicU64,
    /// Transport attempts that failed.
    pub attempt_failures: AtomicU64,
    /// Waits between attempts.
    pub retries: AtomicU64,
    /// Batch dispatches started.
    pub batches: AtomicU64,
}

impl DispatchMetrics {
    /// Creates a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successfully sent message.
    pub fn record_send_success(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a message that could not be sent.
    pub fn record_send_failure(&self) {
        self.messages_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a validation failure.
    pub fn record_validation_failure(&self) {
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a transport attempt.
    pub fn record_attempt(&self, success: bool) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.attempt_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records a retry wait.
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a batch dispatch.
    pub fn record_batch(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_failed: self.messages_failed.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            attempt_failures: self.attempt_failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
        }
    }

    /// Resets all metrics.
    pub fn reset(&self) {
        self.messages_sent.store(0, Ordering::Relaxed);
        self.messages_failed.store(0, Ordering::Relaxed);
        self.validation_failures.store(0, Ordering::Relaxed);
        self.attempts.store(0, Ordering::Relaxed);
        self.attempt_failures.store(0, Ordering::Relaxed);
        self.retries.store(0, Ordering::Relaxed);
        self.batches.store(0, Ordering::Relaxed);
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Messages transmitted successfully.
    pub messages_sent: u64,
    /// Messages that ended in failure.
    pub messages_failed: u64,
    /// Messages rejected by validation.
    pub validation_failures: u64,
    /// Transport attempts made.
    pub attempts: u64,
    /// Transport attempts that failed.
    pub attempt_failures: u64,
    /// Waits between attempts.
    pub retries: u64,
    /// Batch dispatches started.
    pub batches: u64,
}

impl MetricsSnapshot {
    /// Returns the message success rate.
    pub fn success_rate(&self) -> f64 {
        let total = self.messages_sent + self.messages_failed;
        if total == 0 {
            1.0
        } else {
            self.messages_sent as f64 / total as f64
        }
    }

    /// Returns the per-attempt success rate.
    pub fn attempt_success_rate(&self) -> f64 {
        if self.attempts == 0 {
            1.0
        } else {
            (self.attempts - self.attempt_failures) as f64 / self.attempts as f64
        }
    }
}

/// Timer for measuring operation duration.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    name: &'static str,
}

impl Timer {
    /// Creates and starts a new timer.
    pub fn start(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    /// Returns the elapsed time.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stops the timer and returns the duration.
    pub fn stop(self) -> Duration {
        let elapsed = self.start.elapsed();

        #[cfg(feature = "tracing")]
        tracing::debug!(
            timer = self.name,
            duration_ms = elapsed.as_millis() as u64,
            "Timer stopped"
        );

        elapsed
    }

    /// Returns the timer name.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let metrics = DispatchMetrics::new();

        metrics.record_send_success();
        metrics.record_send_success();
        metrics.record_send_failure();
        metrics.record_attempt(true);
        metrics.record_attempt(false);
        metrics.record_retry();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_sent, 2);
        assert_eq!(snapshot.messages_failed, 1);
        assert_eq!(snapshot.attempts, 2);
        assert_eq!(snapshot.attempt_failures, 1);
        assert_eq!(snapshot.retries, 1);
        assert!((snapshot.success_rate() - 0.666).abs() < 0.01);
        assert!((snapshot.attempt_success_rate() - 0.5).abs() < f64::EPSILON);

        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_timer() {
        let timer = Timer::start("send");
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(timer.name(), "send");
        let duration = timer.stop();
        assert!(duration >= Duration::from_millis(10));
    }
}
