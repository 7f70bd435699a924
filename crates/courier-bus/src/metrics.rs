//! Counters for pipeline activity.
//!
//! Owned by the processor that records into them (or shared explicitly via
//! `Arc`); there is no process-wide registry.
//!
//! ## Usage
//!
//! ```ignore
//! let processor = MessageProcessor::new(handler, exception_handler);
//! // ... process messages ...
//! let snapshot = processor.metrics().snapshot();
//! println!("{}", serde_json::to_string(&snapshot)?);
//! ```

use crate::exception::FailureStage;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for one pipeline.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// Payloads handed to `process`
    received: AtomicU64,
    /// Payloads handled and acknowledged
    acknowledged: AtomicU64,
    /// Calls abandoned because the token fired
    cancelled: AtomicU64,
    decode_failures: AtomicU64,
    handle_failures: AtomicU64,
    acknowledge_failures: AtomicU64,
    /// Failures absorbed by the exception handler
    suppressed: AtomicU64,
    /// Failures returned to the caller
    propagated: AtomicU64,
    /// Exception handlers that themselves failed
    exception_handler_failures: AtomicU64,
}

/// Point-in-time copy of [`PipelineMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub acknowledged: u64,
    pub cancelled: u64,
    pub decode_failures: u64,
    pub handle_failures: u64,
    pub acknowledge_failures: u64,
    pub suppressed: u64,
    pub propagated: u64,
    pub exception_handler_failures: u64,
}

impl MetricsSnapshot {
    /// Failures across every stage.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.decode_failures + self.handle_failures + self.acknowledge_failures
    }
}

impl PipelineMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_acknowledged(&self) {
        self.acknowledged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failure at `stage`.
    pub fn record_failure(&self, stage: FailureStage) {
        let counter = match stage {
            FailureStage::Decode => &self.decode_failures,
            FailureStage::Handle => &self.handle_failures,
            FailureStage::Acknowledge => &self.acknowledge_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_suppressed(&self) {
        self.suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_propagated(&self) {
        self.propagated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_exception_handler_failure(&self) {
        self.exception_handler_failures
            .fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            handle_failures: self.handle_failures.load(Ordering::Relaxed),
            acknowledge_failures: self.acknowledge_failures.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            propagated: self.propagated.load(Ordering::Relaxed),
            exception_handler_failures: self.exception_handler_failures.load(Ordering::Relaxed),
        }
    }
}
