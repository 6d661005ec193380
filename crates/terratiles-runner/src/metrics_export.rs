//! In-memory metrics recorder and JSON export.
//!
//! The build emits its metrics through the `metrics` facade. Installing an
//! [`InMemoryRecorder`] keeps every series in process so a run can be
//! summarised afterwards:
//!
//! ```no_run
//! use std::sync::Arc;
//! use terratiles_runner::metrics_export::InMemoryRecorder;
//!
//! let recorder = Arc::new(InMemoryRecorder::new());
//! metrics::set_global_recorder(recorder.clone()).ok();
//! terratiles_metrics::describe_metrics();
//!
//! // ... run a build ...
//!
//! let snapshot = recorder.snapshot();
//! println!("{} tiles written", snapshot.counter("terratiles.tiles.written"));
//! ```
//!
//! The export format groups each metric by name, with one level of
//! breakdown per label:
//!
//! ```json
//! {
//!   "metrics": {
//!     "terratiles.tiles.skipped": {
//!       "total": 12,
//!       "labels": {
//!         "reason": { "empty": 9, "outside": 3 },
//!         "zoom": { "11": 2, "12": 10 }
//!       }
//!     }
//!   }
//! }
//! ```

use metrics::{
    Counter, CounterFn, Gauge, GaugeFn, Histogram, HistogramFn, Key, KeyName, Metadata, Recorder,
    SharedString, Unit,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Recorded values of one histogram series.
#[derive(Debug, Default)]
struct HistogramCell(Mutex<Vec<f64>>);

impl HistogramFn for HistogramCell {
    fn record(&self, value: f64) {
        lock(&self.0).push(value);
    }
}

/// Gauge stored as the bit pattern of an `f64`.
#[derive(Debug, Default)]
struct GaugeCell(AtomicU64);

impl GaugeCell {
    fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn update(&self, f: impl Fn(f64) -> f64) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some(f(f64::from_bits(bits)).to_bits())
            });
    }
}

impl GaugeFn for GaugeCell {
    fn increment(&self, value: f64) {
        self.update(|v| v + value);
    }

    fn decrement(&self, value: f64) {
        self.update(|v| v - value);
    }

    fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
struct CounterCell(AtomicU64);

impl CounterFn for CounterCell {
    fn increment(&self, value: u64) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    fn absolute(&self, value: u64) {
        self.0.fetch_max(value, Ordering::Relaxed);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A [`Recorder`] that keeps every series in memory.
#[derive(Debug, Default)]
pub struct InMemoryRecorder {
    counters: Mutex<HashMap<Key, Arc<CounterCell>>>,
    gauges: Mutex<HashMap<Key, Arc<GaugeCell>>>,
    histograms: Mutex<HashMap<Key, Arc<HistogramCell>>>,
    descriptions: Mutex<HashMap<String, String>>,
}

impl InMemoryRecorder {
    /// An empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy out the current value of every series.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = lock(&self.counters)
            .iter()
            .map(|(key, cell)| Series::new(key, cell.0.load(Ordering::Relaxed)))
            .collect();
        let gauges = lock(&self.gauges)
            .iter()
            .map(|(key, cell)| Series::new(key, cell.get()))
            .collect();
        let histograms = lock(&self.histograms)
            .iter()
            .map(|(key, cell)| Series::new(key, lock(&cell.0).clone()))
            .collect();

        MetricsSnapshot {
            counters,
            gauges,
            histograms,
            descriptions: lock(&self.descriptions)
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    fn describe(&self, key: KeyName, description: SharedString) {
        lock(&self.descriptions).insert(key.as_str().to_string(), description.to_string());
    }
}

impl Recorder for InMemoryRecorder {
    fn describe_counter(&self, key: KeyName, _unit: Option<Unit>, description: SharedString) {
        self.describe(key, description);
    }

    fn describe_gauge(&self, key: KeyName, _unit: Option<Unit>, description: SharedString) {
        self.describe(key, description);
    }

    fn describe_histogram(&self, key: KeyName, _unit: Option<Unit>, description: SharedString) {
        self.describe(key, description);
    }

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        let cell = lock(&self.counters).entry(key.clone()).or_default().clone();
        Counter::from_arc(cell)
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        let cell = lock(&self.gauges).entry(key.clone()).or_default().clone();
        Gauge::from_arc(cell)
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        let cell = lock(&self.histograms).entry(key.clone()).or_default().clone();
        Histogram::from_arc(cell)
    }
}

/// One labelled series.
#[derive(Debug, Clone)]
struct Series<T> {
    name: String,
    labels: Vec<(String, String)>,
    value: T,
}

impl<T> Series<T> {
    fn new(key: &Key, value: T) -> Self {
        Self {
            name: key.name().to_string(),
            labels: key
                .labels()
                .map(|l| (l.key().to_string(), l.value().to_string()))
                .collect(),
            value,
        }
    }

    fn matches(&self, name: &str, labels: &[(&str, &str)]) -> bool {
        self.name == name
            && labels
                .iter()
                .all(|(k, v)| self.labels.iter().any(|(lk, lv)| lk == k && lv == v))
    }
}

/// Point-in-time copy of a recorder's series.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    counters: Vec<Series<u64>>,
    gauges: Vec<Series<f64>>,
    histograms: Vec<Series<Vec<f64>>>,
    descriptions: BTreeMap<String, String>,
}

impl MetricsSnapshot {
    /// Sum of a counter over all its series.
    pub fn counter(&self, name: &str) -> u64 {
        self.counter_with(name, &[])
    }

    /// Sum of a counter over the series carrying all of `labels`.
    pub fn counter_with(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.counters
            .iter()
            .filter(|s| s.matches(name, labels))
            .map(|s| s.value)
            .sum()
    }

    /// Sum of a gauge over the series carrying all of `labels`, or `None`
    /// if no such series exists.
    pub fn gauge_with(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        let mut found = self.gauges.iter().filter(|s| s.matches(name, labels)).peekable();
        found.peek()?;
        Some(found.map(|s| s.value).sum())
    }

    /// Summary of a histogram over the series carrying all of `labels`.
    pub fn histogram_with(&self, name: &str, labels: &[(&str, &str)]) -> Option<HistogramSummary> {
        let values: Vec<f64> = self
            .histograms
            .iter()
            .filter(|s| s.matches(name, labels))
            .flat_map(|s| s.value.iter().copied())
            .collect();
        HistogramSummary::from_values(values)
    }

    /// Group every metric by name with per-label breakdowns.
    pub fn to_export(&self) -> MetricsExport {
        let mut metrics = BTreeMap::new();

        for name in names(&self.counters) {
            let mut value = CounterValue {
                description: self.descriptions.get(&name).cloned(),
                total: self.counter(&name),
                labels: BTreeMap::new(),
            };
            for series in self.counters.iter().filter(|s| s.name == name) {
                for (k, v) in &series.labels {
                    *value
                        .labels
                        .entry(k.clone())
                        .or_default()
                        .entry(v.clone())
                        .or_default() += series.value;
                }
            }
            metrics.insert(name, MetricValue::Counter(value));
        }

        for name in names(&self.gauges) {
            let mut value = GaugeValue {
                description: self.descriptions.get(&name).cloned(),
                total: self.gauge_with(&name, &[]).unwrap_or_default(),
                labels: BTreeMap::new(),
            };
            for series in self.gauges.iter().filter(|s| s.name == name) {
                for (k, v) in &series.labels {
                    *value
                        .labels
                        .entry(k.clone())
                        .or_default()
                        .entry(v.clone())
                        .or_default() += series.value;
                }
            }
            metrics.insert(name, MetricValue::Gauge(value));
        }

        for name in names(&self.histograms) {
            let Some(summary) = self.histogram_with(&name, &[]) else {
                continue;
            };
            let mut by_label: BTreeMap<String, BTreeMap<String, Vec<f64>>> = BTreeMap::new();
            for series in self.histograms.iter().filter(|s| s.name == name) {
                for (k, v) in &series.labels {
                    by_label
                        .entry(k.clone())
                        .or_default()
                        .entry(v.clone())
                        .or_default()
                        .extend_from_slice(&series.value);
                }
            }
            let labels = by_label
                .into_iter()
                .map(|(k, values)| {
                    let summaries = values
                        .into_iter()
                        .filter_map(|(v, samples)| Some((v, HistogramSummary::from_values(samples)?)))
                        .collect();
                    (k, summaries)
                })
                .collect();
            metrics.insert(
                name.clone(),
                MetricValue::Histogram(HistogramValue {
                    description: self.descriptions.get(&name).cloned(),
                    summary,
                    labels,
                }),
            );
        }

        MetricsExport { metrics }
    }

    /// Write [`Self::to_export`] as pretty-printed JSON.
    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut out, &self.to_export())?;
        out.write_all(b"\n")?;
        out.flush()
    }
}

fn names<T>(series: &[Series<T>]) -> Vec<String> {
    let mut names: Vec<String> = series.iter().map(|s| s.name.clone()).collect();
    names.sort();
    names.dedup();
    names
}

/// Exported metrics, keyed by metric name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsExport {
    /// One entry per metric name.
    pub metrics: BTreeMap<String, MetricValue>,
}

/// A counter, gauge or histogram entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    /// Histogram summary.
    Histogram(HistogramValue),
    /// Counter totals.
    Counter(CounterValue),
    /// Gauge values.
    Gauge(GaugeValue),
}

/// Counter total with per-label breakdowns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterValue {
    /// Metric description, if one was registered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Sum over all series.
    pub total: u64,
    /// label -> label value -> sum.
    #[serde(default)]
    pub labels: BTreeMap<String, BTreeMap<String, u64>>,
}

/// Gauge sum with per-label breakdowns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaugeValue {
    /// Metric description, if one was registered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Sum over all series.
    pub total: f64,
    /// label -> label value -> sum.
    #[serde(default)]
    pub labels: BTreeMap<String, BTreeMap<String, f64>>,
}

/// Histogram summary with per-label breakdowns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramValue {
    /// Metric description, if one was registered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Summary over all series.
    #[serde(flatten)]
    pub summary: HistogramSummary,
    /// label -> label value -> summary.
    #[serde(default)]
    pub labels: BTreeMap<String, BTreeMap<String, HistogramSummary>>,
}

/// Count, extremes and nearest-rank percentiles of recorded values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
}

impl HistogramSummary {
    /// Summarise `values`, or `None` when there are none.
    pub fn from_values(mut values: Vec<f64>) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        values.sort_by(f64::total_cmp);
        let count = values.len();
        let sum: f64 = values.iter().sum();
        let rank = |q: f64| values[((q * count as f64).ceil() as usize).clamp(1, count) - 1];

        Some(Self {
            count: count as u64,
            sum,
            min: values[0],
            max: values[count - 1],
            mean: sum / count as f64,
            p50: rank(0.50),
            p90: rank(0.90),
            p99: rank(0.99),
        })
    }
}
