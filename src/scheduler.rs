//! The probe cycle: refresh targets, keep one metric record per live target,
//! probe everything under a deadline with bounded concurrency, export.

use chrono::Utc;
use log::{debug, error, info};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::ProbeConfig;
use crate::error::{Error, Result};
use crate::labels::AdditionalLabel;
use crate::metrics::{EventMetrics, LatencyValue, TargetRecord};
use crate::prober::TargetProber;
use crate::target::{Target, TargetProvider};

/// Metric records keyed by target name.
///
/// Only the scheduler adds or removes keys; probe tasks get a shared handle to
/// their own record and only bump its counters.
#[derive(Debug, Default)]
pub struct RecordStore {
    records: HashMap<String, Arc<TargetRecord>>,
}

impl RecordStore {
    pub fn get(&self, name: &str) -> Option<&Arc<TargetRecord>> {
        self.records.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }
}

/// One ARP probe instance running forever on its own interval.
pub struct Probe<P> {
    config: ProbeConfig,
    prober: Arc<P>,
    provider: Arc<dyn TargetProvider>,
    additional_labels: Vec<AdditionalLabel>,
    latency: LatencyValue,
    targets: Vec<Target>,
    store: RecordStore,
}

impl<P: TargetProber> Probe<P> {
    /// Creates a probe from a validated configuration.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn new(
        config: ProbeConfig,
        prober: P,
        provider: Arc<dyn TargetProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let latency = config.latency_value()?;
        let additional_labels = config
            .additional_labels
            .iter()
            .map(AdditionalLabel::from)
            .collect();
        Ok(Self {
            config,
            prober: Arc::new(prober),
            provider,
            additional_labels,
            latency,
            targets: Vec::new(),
            store: RecordStore::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn records(&self) -> &RecordStore {
        &self.store
    }

    /// Ticks every `interval` and runs a cycle, until `token` is cancelled.
    pub async fn start(&mut self, token: CancellationToken, data_tx: mpsc::Sender<EventMetrics>) {
        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.config.interval,
            self.config.interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let name = self.config.name.clone();
        info!("Starting probe {} every {:?}", name, self.config.interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = self.run_cycle(&data_tx) => {}
                    }
                }
            }
        }
        info!("Stopping probe {}", name);
    }

    /// Runs a single cycle.
    pub async fn run_cycle(&mut self, data_tx: &mpsc::Sender<EventMetrics>) {
        let targets = self.list_targets().await;
        let old_targets = std::mem::replace(&mut self.targets, targets);
        self.init_probe_metrics();
        self.cleanup_targets(&old_targets);

        let deadline = Instant::now() + self.config.timeout;
        self.run_probe(deadline).await;
        self.export_metrics(data_tx).await;
    }

    /// Asks the provider off the runtime, it may read files.
    async fn list_targets(&self) -> Vec<Target> {
        let provider = Arc::clone(&self.provider);
        match tokio::task::spawn_blocking(move || provider.list_endpoints()).await {
            Ok(targets) => targets,
            Err(err) => {
                error!(
                    "Listing targets for probe {} failed, keeping {} targets: {}",
                    self.config.name,
                    self.targets.len(),
                    err
                );
                self.targets.clone()
            }
        }
    }

    fn init_probe_metrics(&mut self) {
        for target in &self.targets {
            if self.store.contains(&target.name) {
                continue;
            }
            self.store.records.insert(
                target.name.clone(),
                Arc::new(TargetRecord::new(
                    &self.config.name,
                    &target.name,
                    self.latency.clone(),
                )),
            );
        }
    }

    fn cleanup_targets(&mut self, old_targets: &[Target]) {
        let live: HashSet<&str> = self.targets.iter().map(|t| t.name.as_str()).collect();
        for target in old_targets {
            if live.contains(target.name.as_str()) {
                continue;
            }
            if self.store.records.remove(&target.name).is_some() {
                debug!("Dropped metrics for removed target {}", target.name);
            }
            for label in &self.additional_labels {
                label.forget(&target.name);
            }
        }
    }

    async fn run_probe(&self, deadline: Instant) {
        debug!(
            "Running cycle for probe {} on {} targets with maxWorkers {}",
            self.config.name,
            self.targets.len(),
            self.config.max_workers
        );
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers));
        let latency_unit = self.config.latency_unit.as_secs_f64();
        let start = Instant::now();
        let mut tasks = JoinSet::new();

        for target in &self.targets {
            let Some(record) = self.store.get(&target.name).cloned() else {
                continue;
            };
            let semaphore = Arc::clone(&semaphore);
            let prober = Arc::clone(&self.prober);
            let target = target.clone();
            tasks.spawn(async move {
                record.record_attempt(Utc::now());
                let permit = tokio::time::timeout_at(deadline, semaphore.acquire_owned()).await;
                let _permit = match permit {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => return,
                    Err(_) => {
                        debug!("No worker free for {} before the deadline", target.name);
                        return;
                    }
                };
                let probe_start = Instant::now();
                let result = tokio::time::timeout_at(deadline, prober.probe(&target, deadline))
                    .await
                    .unwrap_or(Err(Error::DeadlineExceeded));
                match result {
                    Ok(()) => {
                        let latency = probe_start.elapsed().as_secs_f64() / latency_unit;
                        record.record_success(latency);
                    }
                    Err(err) => debug!("Probe for {} failed: {}", target.name, err),
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                error!("Probe task for {} panicked: {}", self.config.name, err);
            }
        }
        debug!(
            "Finished cycle for probe {} in {:?}",
            self.config.name,
            start.elapsed()
        );
    }

    async fn export_metrics(&self, data_tx: &mpsc::Sender<EventMetrics>) {
        for target in &self.targets {
            let Some(record) = self.store.get(&target.name) else {
                continue;
            };
            let resolved = target.ip.to_string();
            for label in &self.additional_labels {
                label.update_for_target(target, &resolved, 0);
            }
            let mut em = record.to_event_metrics();
            for label in &self.additional_labels {
                label.apply(&target.name, &mut em);
            }
            if data_tx.send(em).await.is_err() {
                debug!("Export channel closed, dropping metrics for {}", target.name);
            }
        }
    }
}
