//! Scanner main loop
//!
//! Sole consumer of the sighting queue and sole owner of the tag registry.
//! The loop polls the queue without blocking; when it is empty it sleeps for
//! the poll interval, which leaves room for the periodic registry sweep.
//! Completed keys are uploaded on spawned tasks so a slow directory never
//! stalls ingestion.

use crate::crypto::decode_public_key;
use crate::report::Reporter;
use crate::shutdown::{is_shutdown, wait_for_shutdown, ShutdownSignal};
use crate::tracking::{CollectEvent, CollectorConfig, FragmentCollector, TagRegistry};
use crate::transport::ble::scanner::Sighting;
use futures::FutureExt;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Capacity of the bounded sighting queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Scanner loop tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub queue_capacity: usize,
    pub poll_interval: Duration,
    pub sweep_interval: Duration,
    pub collector: CollectorConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            poll_interval: Duration::from_millis(500),
            sweep_interval: Duration::from_secs(60),
            collector: CollectorConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_collector(mut self, collector: CollectorConfig) -> Self {
        self.collector = collector;
        self
    }
}

/// A tag seen in config mode, offered to the provisioning task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigCandidate {
    pub address: String,
    pub seen_at: Instant,
}

/// Counters reported when the loop ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStats {
    pub sightings: u64,
    pub keys_completed: u64,
    pub invalid_keys: u64,
    pub uploads_ok: u64,
    pub uploads_failed: u64,
    pub evicted: u64,
}

/// Reassembles keys from sightings and uploads reports
pub struct ScannerNode {
    config: NodeConfig,
    collector: FragmentCollector,
    registry: TagRegistry,
    reporter: Reporter,
    candidates: Option<mpsc::Sender<ConfigCandidate>>,
}

impl ScannerNode {
    pub fn new(config: NodeConfig, reporter: Reporter) -> Self {
        let collector = FragmentCollector::new(config.collector.clone());
        Self {
            config,
            collector,
            registry: TagRegistry::new(),
            reporter,
            candidates: None,
        }
    }

    /// Forward config-mode sightings to an owner provisioning task
    pub fn with_config_candidates(mut self, tx: mpsc::Sender<ConfigCandidate>) -> Self {
        self.candidates = Some(tx);
        self
    }

    /// Bounded queue between the scan task and this loop
    pub fn sighting_channel(&self) -> (mpsc::Sender<Sighting>, mpsc::Receiver<Sighting>) {
        mpsc::channel(self.config.queue_capacity)
    }

    pub fn registry(&self) -> &TagRegistry {
        &self.registry
    }

    /// Drain sightings until shutdown or until every producer is gone
    pub async fn run(
        &mut self,
        mut sightings: mpsc::Receiver<Sighting>,
        mut shutdown: ShutdownSignal,
    ) -> NodeStats {
        let mut stats = NodeStats::default();
        let mut uploads: JoinSet<bool> = JoinSet::new();
        let mut last_sweep = Instant::now();
        info!("Scanner loop started");

        loop {
            if is_shutdown(&shutdown) {
                break;
            }
            match sightings.try_recv() {
                Ok(sighting) => {
                    stats.sightings += 1;
                    self.handle(sighting, &mut uploads, &mut stats);
                }
                Err(TryRecvError::Empty) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = wait_for_shutdown(&mut shutdown) => break,
                    }
                }
                Err(TryRecvError::Disconnected) => {
                    debug!("Sighting queue closed");
                    break;
                }
            }

            if last_sweep.elapsed() >= self.config.sweep_interval {
                let evicted = self
                    .registry
                    .sweep(Instant::now(), self.config.collector.eviction_horizon);
                if evicted > 0 {
                    debug!("Evicted {} idle tag(s)", evicted);
                }
                stats.evicted += evicted as u64;
                last_sweep = Instant::now();
            }

            while let Some(Some(finished)) = uploads.join_next().now_or_never() {
                record_upload(finished, &mut stats);
            }
        }

        while let Some(finished) = uploads.join_next().await {
            record_upload(finished, &mut stats);
        }
        info!(
            "Scanner loop stopped: {} sightings, {} keys, {} uploads",
            stats.sightings, stats.keys_completed, stats.uploads_ok
        );
        stats
    }

    fn handle(&mut self, sighting: Sighting, uploads: &mut JoinSet<bool>, stats: &mut NodeStats) {
        let seen_at = sighting.seen_at;
        match self.collector.ingest(&mut self.registry, sighting) {
            CollectEvent::ConfigSeen { address } => self.offer_candidate(address, seen_at),
            CollectEvent::KeyReady { address, key } => match decode_public_key(&key) {
                Ok(public_key) => {
                    stats.keys_completed += 1;
                    let reporter = self.reporter.clone();
                    uploads.spawn(async move {
                        match reporter.report(&key, &public_key).await {
                            Ok(()) => true,
                            Err(e) => {
                                warn!("Report for {} not uploaded: {}", address, e);
                                false
                            }
                        }
                    });
                }
                Err(e) => {
                    warn!("Discarding fragments from {}: {}", address, e);
                    stats.invalid_keys += 1;
                    self.registry.discard_fragments(&address);
                }
            },
            _ => {}
        }
    }

    fn offer_candidate(&self, address: String, seen_at: Instant) {
        let Some(tx) = &self.candidates else {
            return;
        };
        match tx.try_send(ConfigCandidate { address, seen_at }) {
            Ok(()) => {}
            Err(TrySendError::Full(c)) => debug!("Candidate queue full, dropping {}", c.address),
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

fn record_upload(finished: Result<bool, tokio::task::JoinError>, stats: &mut NodeStats) {
    match finished {
        Ok(true) => stats.uploads_ok += 1,
        Ok(false) => stats.uploads_failed += 1,
        Err(e) => {
            warn!("Upload task failed: {}", e);
            stats.uploads_failed += 1;
        }
    }
}
