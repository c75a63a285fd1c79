use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

/// Type of metric.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

/// One metric value captured by [`MetricsRecorder::snapshot`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub value: f64,
    pub labels: BTreeMap<String, String>,
    pub metric_type: MetricType,
}

/// Summary statistics from a histogram.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Monotonically increasing counter.
#[derive(Default)]
struct Counter {
    value: AtomicU64,
}

/// Gauge holding an `f64` as raw bits.
#[derive(Default)]
struct Gauge {
    bits: AtomicU64,
}

impl Gauge {
    fn set(&self, v: f64) {
        self.bits.store(v.to_bits(), Ordering::Relaxed);
    }

    fn add(&self, delta: f64) {
        let _ = self
            .bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + delta).to_bits())
            });
    }

    fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

/// Histogram keeping every observation for percentile computation.
#[derive(Default)]
struct Histogram {
    observations: Mutex<Vec<f64>>,
}

impl Histogram {
    fn summary(&self) -> HistogramSummary {
        let mut obs = self.observations.lock().clone();
        if obs.is_empty() {
            return HistogramSummary::default();
        }
        obs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let count = obs.len();
        let at = |q: f64| obs[((count as f64 * q) as usize).min(count - 1)];
        HistogramSummary {
            count: count as u64,
            sum: obs.iter().sum(),
            p50: at(0.50),
            p95: at(0.95),
            p99: at(0.99),
        }
    }
}

/// Metric key: name + labels sorted by label name.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct MetricKey {
    name: String,
    labels: Vec<(String, String)>,
}

impl MetricKey {
    fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        let mut sorted: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            name: name.to_string(),
            labels: sorted,
        }
    }

    fn label_map(&self) -> BTreeMap<String, String> {
        self.labels.iter().cloned().collect()
    }
}

/// Look up `key`, creating the entry under the write lock on first use.
fn with_entry<T: Default, R>(
    map: &RwLock<HashMap<MetricKey, T>>,
    key: MetricKey,
    f: impl FnOnce(&T) -> R,
) -> R {
    {
        let read = map.read();
        if let Some(entry) = read.get(&key) {
            return f(entry);
        }
    }
    let mut write = map.write();
    f(write.entry(key).or_default())
}

/// Thread-safe in-memory metrics recorder.
#[derive(Default)]
pub struct MetricsRecorder {
    counters: RwLock<HashMap<MetricKey, Counter>>,
    gauges: RwLock<HashMap<MetricKey, Gauge>>,
    histograms: RwLock<HashMap<MetricKey, Histogram>>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by n.
    pub fn counter_inc(&self, name: &str, labels: &[(&str, &str)], n: u64) {
        with_entry(&self.counters, MetricKey::new(name, labels), |c| {
            c.value.fetch_add(n, Ordering::Relaxed)
        });
    }

    /// Set a gauge to a specific value.
    pub fn gauge_set(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        with_entry(&self.gauges, MetricKey::new(name, labels), |g| g.set(value));
    }

    /// Increment/decrement a gauge by delta.
    pub fn gauge_inc(&self, name: &str, labels: &[(&str, &str)], delta: f64) {
        with_entry(&self.gauges, MetricKey::new(name, labels), |g| g.add(delta));
    }

    /// Record a histogram observation.
    pub fn histogram_observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        with_entry(&self.histograms, MetricKey::new(name, labels), |h| {
            h.observations.lock().push(value)
        });
    }

    pub fn histogram_summary(&self, name: &str, labels: &[(&str, &str)]) -> HistogramSummary {
        self.histograms
            .read()
            .get(&MetricKey::new(name, labels))
            .map(Histogram::summary)
            .unwrap_or_default()
    }

    pub fn counter_get(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.counters
            .read()
            .get(&MetricKey::new(name, labels))
            .map_or(0, |c| c.value.load(Ordering::Relaxed))
    }

    pub fn gauge_get(&self, name: &str, labels: &[(&str, &str)]) -> f64 {
        self.gauges
            .read()
            .get(&MetricKey::new(name, labels))
            .map_or(0.0, Gauge::get)
    }

    /// Capture every metric at the current instant. Histograms report p50.
    pub fn snapshot(&self) -> Vec<MetricSample> {
        let timestamp = Utc::now();
        let sample = |key: &MetricKey, value: f64, metric_type: MetricType| MetricSample {
            timestamp,
            name: key.name.clone(),
            value,
            labels: key.label_map(),
            metric_type,
        };

        let mut samples = Vec::new();
        for (key, counter) in self.counters.read().iter() {
            let value = counter.value.load(Ordering::Relaxed) as f64;
            samples.push(sample(key, value, MetricType::Counter));
        }
        for (key, gauge) in self.gauges.read().iter() {
            samples.push(sample(key, gauge.get(), MetricType::Gauge));
        }
        for (key, histogram) in self.histograms.read().iter() {
            samples.push(sample(key, histogram.summary().p50, MetricType::Histogram));
        }
        samples.sort_by(|a, b| a.name.cmp(&b.name));
        samples
    }
}

impl std::fmt::Debug for MetricsRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRecorder")
            .field("counters", &self.counters.read().len())
            .field("gauges", &self.gauges.read().len())
            .field("histograms", &self.histograms.read().len())
            .finish()
    }
}
