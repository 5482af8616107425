//! Structured logging and run metrics for loomwork.
//!
//! [`install`] wires up a `tracing-subscriber` `fmt` layer driven by
//! `RUST_LOG` (falling back to `info`), selected once by the CLI at
//! startup. [`TelemetrySpan`] gives callers a lightweight, serializable
//! span descriptor for one-off structured log lines (used by the relay and
//! dispatcher, which don't otherwise hold a live `tracing::Span` across
//! await points cleanly). [`MetricsCollector`] aggregates per-step timing
//! for a workflow run, the way the teacher's own collector aggregates
//! per-backend-run metrics.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::info;
use tracing_subscriber::EnvFilter;

static INSTALLED: OnceLock<()> = OnceLock::new();

/// Install the global tracing subscriber. Idempotent: subsequent calls
/// within the same process are no-ops, so test harnesses that each spin up
/// their own CLI invocation can call this freely.
pub fn install() {
    INSTALLED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
    });
}

/// A structured, serializable span descriptor emitted as a single
/// `tracing::info!` record — used at call sites (relay channel open/close,
/// dispatcher transport selection) where holding a live `Span` guard across
/// `.await` boundaries would be awkward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySpan {
    /// Span name / operation, e.g. `"relay.channel"`.
    pub name: String,
    /// Arbitrary key-value attributes (deterministic ordering).
    pub attributes: BTreeMap<String, String>,
}

impl TelemetrySpan {
    /// Create a new span descriptor with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Insert an attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Emit the span via `tracing::info!`.
    pub fn emit(&self) {
        info!(
            span_name = %self.name,
            attributes = ?self.attributes,
            "telemetry_span"
        );
    }
}

/// Timing and outcome for one executed workflow step.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StepMetrics {
    /// The step's transform key.
    pub transform_key: String,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Whether the step completed successfully.
    pub succeeded: bool,
}

/// Aggregated statistics across a workflow run's steps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    /// Number of steps recorded.
    pub count: usize,
    /// Mean step duration in milliseconds.
    pub mean_duration_ms: f64,
    /// Number of failed steps.
    pub failures: usize,
}

impl Default for RunSummary {
    fn default() -> Self {
        Self {
            count: 0,
            mean_duration_ms: 0.0,
            failures: 0,
        }
    }
}

/// Thread-safe collector for [`StepMetrics`], shared across the tokio tasks
/// that execute a workflow's steps.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    steps: Arc<Mutex<Vec<StepMetrics>>>,
}

impl MetricsCollector {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a step's metrics.
    pub fn record(&self, metrics: StepMetrics) {
        self.steps.lock().expect("metrics lock poisoned").push(metrics);
    }

    /// Snapshot every recorded step, in recording order.
    pub fn steps(&self) -> Vec<StepMetrics> {
        self.steps.lock().expect("metrics lock poisoned").clone()
    }

    /// Compute an aggregate [`RunSummary`] over everything recorded so far.
    pub fn summary(&self) -> RunSummary {
        let steps = self.steps();
        if steps.is_empty() {
            return RunSummary::default();
        }
        let total: u64 = steps.iter().map(|s| s.duration_ms).sum();
        let failures = steps.iter().filter(|s| !s.succeeded).count();
        RunSummary {
            count: steps.len(),
            mean_duration_ms: total as f64 / steps.len() as f64,
            failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_is_idempotent() {
        install();
        install();
    }

    #[test]
    fn telemetry_span_builder() {
        let span = TelemetrySpan::new("relay.channel").with_attribute("channel", "work-1");
        assert_eq!(span.name, "relay.channel");
        assert_eq!(span.attributes.get("channel").unwrap(), "work-1");
    }

    #[test]
    fn collector_summarizes_steps() {
        let collector = MetricsCollector::new();
        collector.record(StepMetrics {
            transform_key: "a1b2c".into(),
            duration_ms: 100,
            succeeded: true,
        });
        collector.record(StepMetrics {
            transform_key: "d3e4f".into(),
            duration_ms: 300,
            succeeded: false,
        });
        let summary = collector.summary();
        assert_eq!(summary.count, 2);
        assert_eq!(summary.mean_duration_ms, 200.0);
        assert_eq!(summary.failures, 1);
    }

    #[test]
    fn collector_summary_empty_by_default() {
        let collector = MetricsCollector::new();
        assert_eq!(collector.summary(), RunSummary::default());
    }
}
