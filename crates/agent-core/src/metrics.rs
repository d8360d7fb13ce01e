//! A minimal metrics seam. The orchestrator's real metrics backend is out
//! of scope; components record through this trait so tests can assert on
//! what would have been emitted (e.g. `dry_run_would_deny`, §8.3 scenario 3).

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub trait MetricsSink: Send + Sync {
    fn increment(&self, name: &str, labels: &[(&str, &str)]);
    fn observe(&self, name: &str, value: f64, labels: &[(&str, &str)]);
}

/// Drops everything. The default when no metrics backend is wired in.
#[derive(Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _name: &str, _labels: &[(&str, &str)]) {}
    fn observe(&self, _name: &str, _value: f64, _labels: &[(&str, &str)]) {}
}

/// Records every call in memory; used by tests.
#[derive(Default)]
pub struct RecordingMetrics {
    counters: Mutex<HashMap<String, u64>>,
}

impl RecordingMetrics {
    pub fn count(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = Self::key(name, labels);
        *self.counters.lock().get(&key).unwrap_or(&0)
    }

    fn key(name: &str, labels: &[(&str, &str)]) -> String {
        let mut parts: Vec<String> = labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
        parts.sort();
        format!("{name}{{{}}}", parts.join(","))
    }
}

impl MetricsSink for RecordingMetrics {
    fn increment(&self, name: &str, labels: &[(&str, &str)]) {
        let key = Self::key(name, labels);
        *self.counters.lock().entry(key).or_insert(0) += 1;
    }

    fn observe(&self, _name: &str, _value: f64, _labels: &[(&str, &str)]) {}
}

pub fn noop() -> Arc<dyn MetricsSink> {
    Arc::new(NoopMetrics)
}
