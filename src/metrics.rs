//! Per-target metric records and the event type they are exported as.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::constants::PROBE_TYPE;
use crate::error::{Error, Result};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Monotonic counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Histogram with fixed lower bounds. The first bucket always starts at -inf.
#[derive(Clone, Debug, PartialEq)]
pub struct Distribution {
    lower_bounds: Vec<f64>,
    bucket_counts: Vec<u64>,
    sum: f64,
    count: u64,
}

impl Distribution {
    /// Creates an empty distribution with buckets `[-inf, b0), [b0, b1), ..., [bn, +inf)`.
    ///
    /// # Errors
    /// Returns an error if `bounds` is not strictly increasing or contains NaN.
    pub fn new(bounds: &[f64]) -> Result<Self> {
        if bounds.iter().any(|b| b.is_nan()) || bounds.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::Config(format!(
                "distribution bounds must be increasing, got {:?}",
                bounds
            )));
        }
        let mut lower_bounds = Vec::with_capacity(bounds.len() + 1);
        lower_bounds.push(f64::NEG_INFINITY);
        lower_bounds.extend(bounds.iter().filter(|b| **b != f64::NEG_INFINITY));
        Ok(Self {
            bucket_counts: vec![0; lower_bounds.len()],
            lower_bounds,
            sum: 0.0,
            count: 0,
        })
    }

    pub fn add_sample(&mut self, sample: f64) {
        let bucket = self
            .lower_bounds
            .partition_point(|lb| *lb <= sample)
            .saturating_sub(1);
        self.bucket_counts[bucket] += 1;
        self.sum += sample;
        self.count += 1;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn bucket_counts(&self) -> &[u64] {
        &self.bucket_counts
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lb: Vec<String> = self
            .lower_bounds
            .iter()
            .map(|b| {
                if *b == f64::NEG_INFINITY {
                    "-Inf".to_string()
                } else {
                    b.to_string()
                }
            })
            .collect();
        let bc: Vec<String> = self.bucket_counts.iter().map(u64::to_string).collect();
        write!(
            f,
            "dist:sum:{}|count:{}|lb:{}|bc:{}",
            self.sum,
            self.count,
            lb.join(","),
            bc.join(",")
        )
    }
}

/// Accumulated latency: either a running sum or a distribution.
#[derive(Clone, Debug, PartialEq)]
pub enum LatencyValue {
    Float(f64),
    Distribution(Distribution),
}

impl Default for LatencyValue {
    fn default() -> Self {
        LatencyValue::Float(0.0)
    }
}

impl LatencyValue {
    pub fn add_sample(&mut self, sample: f64) {
        match self {
            LatencyValue::Float(sum) => *sum += sample,
            LatencyValue::Distribution(dist) => dist.add_sample(sample),
        }
    }
}

impl fmt::Display for LatencyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LatencyValue::Float(sum) => write!(f, "{:.3}", sum),
            LatencyValue::Distribution(dist) => fmt::Display::fmt(dist, f),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum MetricValue {
    Int(u64),
    Latency(LatencyValue),
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Int(v) => write!(f, "{}", v),
            MetricValue::Latency(v) => fmt::Display::fmt(v, f),
        }
    }
}

/// A timestamped set of labelled metrics, as handed to surfacers.
///
/// Labels and metrics keep their insertion order; adding an existing key
/// replaces its value in place.
#[derive(Clone, Debug, PartialEq)]
pub struct EventMetrics {
    pub timestamp: DateTime<Utc>,
    labels: Vec<(String, String)>,
    metrics: Vec<(String, MetricValue)>,
}

impl EventMetrics {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            labels: Vec::new(),
            metrics: Vec::new(),
        }
    }

    pub fn add_metric(mut self, name: &str, value: MetricValue) -> Self {
        match self.metrics.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value,
            None => self.metrics.push((name.into(), value)),
        }
        self
    }

    pub fn add_label(mut self, key: &str, value: &str) -> Self {
        self.set_label(key, value);
        self
    }

    pub fn set_label(&mut self, key: &str, value: &str) {
        match self.labels.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.into(),
            None => self.labels.push((key.into(), value.into())),
        }
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn metric(&self, name: &str) -> Option<&MetricValue> {
        self.metrics.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn labels(&self) -> impl Iterator<Item = (&str, &str)> {
        self.labels.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn metrics(&self) -> impl Iterator<Item = (&str, &MetricValue)> {
        self.metrics.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Running counters for one target, kept across cycles while the target is listed.
#[derive(Debug)]
pub struct TargetRecord {
    total: Counter,
    success: Counter,
    latency: Mutex<LatencyValue>,
    timestamp: Mutex<DateTime<Utc>>,
    labels: Vec<(String, String)>,
}

impl TargetRecord {
    pub fn new(probe: &str, dst: &str, latency: LatencyValue) -> Self {
        Self {
            total: Counter::new(),
            success: Counter::new(),
            latency: Mutex::new(latency),
            timestamp: Mutex::new(Utc::now()),
            labels: vec![
                ("ptype".into(), PROBE_TYPE.into()),
                ("probe".into(), probe.into()),
                ("dst".into(), dst.into()),
            ],
        }
    }

    /// Counts an attempt started at `started`.
    pub fn record_attempt(&self, started: DateTime<Utc>) {
        *lock(&self.timestamp) = started;
        self.total.inc();
    }

    /// Counts a successful attempt that took `latency`, already in latency units.
    pub fn record_success(&self, latency: f64) {
        self.success.inc();
        lock(&self.latency).add_sample(latency);
    }

    pub fn total(&self) -> u64 {
        self.total.get()
    }

    pub fn success(&self) -> u64 {
        self.success.get()
    }

    pub fn latency(&self) -> LatencyValue {
        lock(&self.latency).clone()
    }

    pub fn to_event_metrics(&self) -> EventMetrics {
        let em = EventMetrics::new(*lock(&self.timestamp))
            .add_metric("total", MetricValue::Int(self.total()))
            .add_metric("success", MetricValue::Int(self.success()))
            .add_metric("latency", MetricValue::Latency(self.latency()));
        self.labels
            .iter()
            .fold(em, |em, (k, v)| em.add_label(k, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distribution_buckets() {
        let mut dist = Distribution::new(&[0.5, 1.0, 2.0]).unwrap();
        for sample in [0.1, 0.5, 0.7, 1.5, 3.0, 10.0] {
            dist.add_sample(sample);
        }
        assert_eq!(dist.bucket_counts(), &[1, 2, 1, 2]);
        assert_eq!(dist.count(), 6);
        assert!((dist.sum() - 15.8).abs() < 1e-9);
        assert_eq!(
            dist.to_string(),
            format!("dist:sum:{}|count:6|lb:-Inf,0.5,1,2|bc:1,2,1,2", dist.sum())
        );
    }

    #[test]
    fn test_distribution_rejects_unordered_bounds() {
        assert!(Distribution::new(&[1.0, 0.5]).is_err());
        assert!(Distribution::new(&[1.0, 1.0]).is_err());
        assert!(Distribution::new(&[f64::NAN]).is_err());
        assert!(Distribution::new(&[]).is_ok());
    }

    #[test]
    fn test_latency_value() {
        let mut latency = LatencyValue::default();
        latency.add_sample(1.25);
        latency.add_sample(0.5);
        assert_eq!(latency, LatencyValue::Float(1.75));
        assert_eq!(latency.to_string(), "1.750");
    }

    #[test]
    fn test_event_metrics_labels_replace() {
        let mut em = EventMetrics::new(Utc::now())
            .add_label("dst", "a")
            .add_metric("total", MetricValue::Int(1));
        em.set_label("dst", "b");
        em.set_label("zone", "z1");
        assert_eq!(em.label("dst"), Some("b"));
        assert_eq!(
            em.labels().collect::<Vec<_>>(),
            vec![("dst", "b"), ("zone", "z1")]
        );
        assert_eq!(em.metric("total"), Some(&MetricValue::Int(1)));
        assert_eq!(em.metric("success"), None);
    }

    #[test]
    fn test_target_record() {
        let record = TargetRecord::new("arp", "gw", LatencyValue::default());
        let started = Utc::now();
        record.record_attempt(started);
        record.record_attempt(started);
        record.record_success(250.0);

        let em = record.to_event_metrics();
        assert_eq!(em.timestamp, started);
        assert_eq!(em.label("ptype"), Some("arping"));
        assert_eq!(em.label("probe"), Some("arp"));
        assert_eq!(em.label("dst"), Some("gw"));
        assert_eq!(em.metric("total"), Some(&MetricValue::Int(2)));
        assert_eq!(em.metric("success"), Some(&MetricValue::Int(1)));
        assert_eq!(em.metric("latency").unwrap().to_string(), "250.000");
    }
}
