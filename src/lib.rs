//! ARP liveness prober.
//!
//! A [`scheduler::Probe`] asks a [`target::TargetProvider`] for the current
//! targets on every tick, sends each one a single ARP request from the local
//! interface facing it and counts attempts, successes and latency per target.
//! Records are exported over a channel; [`sink::SnapshotSink`] keeps the latest
//! one per target and periodically writes the live set to a JSON file.
//!
//! ```no_run
//! use arp_prober::{ArpProber, Probe, ProbeConfig, StaticTargets, Target};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! tokio_test::block_on(async {
//!     let config = ProbeConfig::default();
//!     let targets = StaticTargets::new(vec![Target::new("gw", "192.168.1.1".parse().unwrap())]);
//!     let prober = ArpProber::new(config.receive_timeout);
//!     let mut probe = Probe::new(config, prober, Arc::new(targets)).unwrap();
//!     let (tx, _rx) = tokio::sync::mpsc::channel(16);
//!     probe.start(CancellationToken::new(), tx).await;
//! })
//! ```

pub mod arp;
pub mod config;
pub mod error;
pub mod interface;
pub mod labels;
pub mod metrics;
pub mod prober;
pub mod scheduler;
pub mod sink;
pub mod target;
pub mod transport;

pub(crate) mod constants;

pub use config::{Config, ProbeConfig, SnapshotConfig};
pub use constants::MAC_LABEL;
pub use error::{Error, Result};
pub use prober::{ArpProber, TargetProber};
pub use scheduler::Probe;
pub use sink::SnapshotSink;
pub use target::{FileTargets, StaticTargets, Target, TargetProvider};
