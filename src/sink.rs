//! Keeps the latest exported record per target and periodically writes the
//! live set to a JSON file, dropping targets that stopped reporting.

use chrono::{DateTime, Utc};
use log::{debug, error};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::SnapshotConfig;
use crate::error::Result;
use crate::metrics::{lock, EventMetrics};

/// Latest state of one target as written to the snapshot file.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SnapshotRecord {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub labels: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, String>,
}

impl SnapshotRecord {
    fn from_event(name: &str, em: &EventMetrics) -> Self {
        Self {
            name: name.into(),
            timestamp: em.timestamp,
            labels: em
                .labels()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            metrics: em
                .metrics()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

#[derive(Debug)]
pub struct SnapshotSink {
    path: PathBuf,
    period: Duration,
    expiration: Duration,
    received: Mutex<HashMap<String, SnapshotRecord>>,
}

impl SnapshotSink {
    /// Creates a sink writing to `path` every `period`; records older than
    /// `expiration` at flush time are dropped.
    pub fn new(path: impl Into<PathBuf>, period: Duration, expiration: Duration) -> Self {
        Self {
            path: path.into(),
            period,
            expiration,
            received: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &SnapshotConfig, path: impl Into<PathBuf>) -> Self {
        Self::new(path, config.period, config.expiration())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the record of the event's `dst` target. Events without one are ignored.
    pub fn write(&self, em: &EventMetrics) {
        let Some(dst) = em.label("dst").filter(|dst| !dst.is_empty()) else {
            return;
        };
        let record = SnapshotRecord::from_event(dst, em);
        lock(&self.received).insert(dst.to_string(), record);
    }

    pub fn get(&self, name: &str) -> Option<SnapshotRecord> {
        lock(&self.received).get(name).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.received).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.received).is_empty()
    }

    /// Drops expired records and serializes what remains, under one lock.
    fn evict_and_serialize(&self, now: DateTime<Utc>) -> Result<(Vec<String>, Vec<u8>)> {
        let stale_before = chrono::Duration::from_std(self.expiration)
            .ok()
            .and_then(|ttl| now.checked_sub_signed(ttl));
        let mut received = lock(&self.received);
        let mut expired = Vec::new();
        if let Some(stale_before) = stale_before {
            received.retain(|name, record| {
                let keep = record.timestamp >= stale_before;
                if !keep {
                    expired.push(name.clone());
                }
                keep
            });
        }
        let sorted: BTreeMap<&String, &SnapshotRecord> = received.iter().collect();
        let json = serde_json::to_vec(&sorted)?;
        Ok((expired, json))
    }

    /// Evicts stale records as of `now` and replaces the snapshot file.
    ///
    /// Returns the names of the evicted targets. Eviction happens even if the
    /// file cannot be written.
    pub async fn flush(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let (expired, json) = self.evict_and_serialize(now)?;
        if !expired.is_empty() {
            debug!("Drop metrics {:?}", expired);
        }
        tokio::fs::write(&self.path, json).await?;
        debug!("Dump metrics to {}", self.path.display());
        Ok(expired)
    }

    /// Flushes every period until `token` is cancelled.
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(self.period) => {
                    if let Err(err) = self.flush(Utc::now()).await {
                        error!("Failed to write metrics to {}: {}", self.path.display(), err);
                    }
                }
            }
        }
    }
}

/// Feeds every exported event into `sink` until all senders are gone.
pub async fn surface(sink: Arc<SnapshotSink>, mut data_rx: mpsc::Receiver<EventMetrics>) {
    while let Some(em) = data_rx.recv().await {
        sink.write(&em);
    }
    debug!("Export channel closed, surfacer for {} done", sink.path.display());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProbeConfig;
    use crate::error::Error;
    use crate::metrics::MetricValue;
    use crate::prober::TargetProber;
    use crate::scheduler::Probe;
    use crate::target::{Target, TargetProvider};
    use std::future::Future;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::time::Instant;

    const PERIOD: Duration = Duration::from_secs(10);

    fn sink(path: &Path) -> SnapshotSink {
        SnapshotSink::new(path, PERIOD, PERIOD * 6)
    }

    fn event(dst: &str, timestamp: DateTime<Utc>, total: u64) -> EventMetrics {
        EventMetrics::new(timestamp)
            .add_metric("total", MetricValue::Int(total))
            .add_label("probe", "arp")
            .add_label("dst", dst)
    }

    fn read_snapshot(path: &Path) -> serde_json::Value {
        serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
    }

    #[test]
    fn test_write_overwrites_and_ignores_unnamed() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink(&dir.path().join("metrics.json"));
        let now = Utc::now();

        sink.write(&event("gw", now, 1));
        sink.write(&event("gw", now, 2).add_label("zone", "a"));
        sink.write(&event("", now, 1));
        sink.write(&EventMetrics::new(now).add_metric("total", MetricValue::Int(1)));

        assert_eq!(sink.len(), 1);
        let record = sink.get("gw").unwrap();
        assert_eq!(record.metrics["total"], "2");
        assert_eq!(record.labels["zone"], "a");
        assert_eq!(record.labels["dst"], "gw");
    }

    #[tokio::test]
    async fn test_flush_writes_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let sink = sink(&path);
        let now = Utc::now();
        sink.write(&event("b", now, 3));
        sink.write(&event("a", now, 1));

        assert!(sink.flush(now).await.unwrap().is_empty());
        let snapshot = read_snapshot(&path);
        let names: Vec<_> = snapshot.as_object().unwrap().keys().cloned().collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(snapshot["b"]["Name"], "b");
        assert_eq!(snapshot["b"]["Metrics"]["total"], "3");
        assert_eq!(snapshot["b"]["Labels"]["probe"], "arp");
        assert_eq!(
            snapshot["b"]["Timestamp"].as_str().unwrap().parse::<DateTime<Utc>>().unwrap(),
            now
        );
    }

    #[tokio::test]
    async fn test_eviction_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let sink = sink(&path);
        let written = Utc::now();
        sink.write(&event("gw", written, 1));

        let at = |periods: u32| written + chrono::Duration::from_std(PERIOD * periods).unwrap();
        assert!(sink.flush(at(5)).await.unwrap().is_empty());
        assert!(read_snapshot(&path).get("gw").is_some());

        assert_eq!(sink.flush(at(7)).await.unwrap(), vec!["gw".to_string()]);
        assert!(read_snapshot(&path).get("gw").is_none());
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_unwritable_destination_keeps_records() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink(dir.path());
        let now = Utc::now();
        sink.write(&event("gw", now, 1));

        assert!(matches!(sink.flush(now).await, Err(Error::Io(_))));
        assert!(sink.get("gw").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_flushes_until_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let sink = Arc::new(sink(&path));
        sink.write(&event("gw", Utc::now(), 1));
        let token = CancellationToken::new();

        let handle = tokio::spawn(Arc::clone(&sink).run(token.clone()));
        tokio::time::sleep(PERIOD + Duration::from_secs(1)).await;
        token.cancel();
        handle.await.unwrap();

        assert!(read_snapshot(&path).get("gw").is_some());
    }

    struct AlwaysUp;

    impl TargetProber for AlwaysUp {
        fn probe(
            &self,
            _target: &Target,
            _deadline: Instant,
        ) -> impl Future<Output = crate::error::Result<()>> + Send {
            async { Ok(()) }
        }
    }

    struct Shrinking(Mutex<Vec<Vec<Target>>>);

    impl TargetProvider for Shrinking {
        fn list_endpoints(&self) -> Vec<Target> {
            lock(&self.0).pop().unwrap_or_default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_target_leaves_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let sink = Arc::new(sink(&path));
        let a = Target::new("a", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        let provider = Arc::new(Shrinking(Mutex::new(vec![vec![], vec![a]])));
        let mut probe = Probe::new(ProbeConfig::default(), AlwaysUp, provider).unwrap();

        let (tx, rx) = mpsc::channel(16);
        let surfacer = tokio::spawn(surface(Arc::clone(&sink), rx));
        probe.run_cycle(&tx).await;
        probe.run_cycle(&tx).await;
        drop(tx);
        surfacer.await.unwrap();

        assert!(!probe.records().contains("a"));
        assert_eq!(sink.get("a").unwrap().metrics["success"], "1");

        let after_window = Utc::now() + chrono::Duration::from_std(PERIOD * 7).unwrap();
        assert_eq!(sink.flush(after_window).await.unwrap(), vec!["a".to_string()]);
        assert!(read_snapshot(&path).get("a").is_none());
    }
}
