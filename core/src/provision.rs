//! Owner-side provisioning task
//!
//! Waits for the scanner loop to report a tag in config mode, connects to
//! it and pushes the owner's key with [`ChunkedKeyTransmitter`].

use crate::crypto::KeyMaterial;
use crate::node::ConfigCandidate;
use crate::shutdown::{wait_for_shutdown, ShutdownSignal};
use crate::transport::abstraction::{GattLink, ProvisioningConnector};
use crate::transport::ble::transmitter::{
    ChunkedKeyTransmitter, ProvisionError, TransmitReport, MAX_RETRY_ROUNDS,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Provisioning task tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionConfig {
    /// How long to wait for a config-mode tag, and how fresh its sighting must be
    pub candidate_window: Duration,
    pub connect_attempts: u32,
    pub connect_retry_delay: Duration,
    pub max_retry_rounds: u32,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            candidate_window: Duration::from_secs(60),
            connect_attempts: 5,
            connect_retry_delay: Duration::from_secs(1),
            max_retry_rounds: MAX_RETRY_ROUNDS,
        }
    }
}

impl ProvisionConfig {
    pub fn with_candidate_window(mut self, window: Duration) -> Self {
        self.candidate_window = window;
        self
    }

    pub fn with_connect_retries(mut self, attempts: u32, delay: Duration) -> Self {
        self.connect_attempts = attempts.max(1);
        self.connect_retry_delay = delay;
        self
    }
}

/// Which tag got the key, and how the transfer went
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionOutcome {
    pub address: String,
    pub report: TransmitReport,
}

/// Provision the first fresh config-mode tag with `key`
pub async fn run_provisioning_task(
    connector: Arc<dyn ProvisioningConnector>,
    key: KeyMaterial,
    mut candidates: mpsc::Receiver<ConfigCandidate>,
    mut shutdown: ShutdownSignal,
    config: ProvisionConfig,
) -> Result<ProvisionOutcome, ProvisionError> {
    let address = tokio::select! {
        picked = pick_candidate(&mut candidates, config.candidate_window) => picked?,
        _ = wait_for_shutdown(&mut shutdown) => return Err(ProvisionError::Cancelled),
    };
    info!("Provisioning tag {}", address);

    let mut link = tokio::select! {
        link = connect_with_retry(connector.as_ref(), &address, &config) => link?,
        _ = wait_for_shutdown(&mut shutdown) => return Err(ProvisionError::Cancelled),
    };

    let transmitter = ChunkedKeyTransmitter::new().with_max_retry_rounds(config.max_retry_rounds);
    let result = tokio::select! {
        result = transmitter.transmit(link.as_mut(), &key) => result,
        _ = wait_for_shutdown(&mut shutdown) => Err(ProvisionError::Cancelled),
    };

    if let Err(e) = link.disconnect().await {
        warn!("Disconnect from {} failed: {}", address, e);
    }

    let report = result?;
    info!(
        "Key written to {} in {} round(s)",
        address, report.rounds
    );
    Ok(ProvisionOutcome { address, report })
}

async fn pick_candidate(
    candidates: &mut mpsc::Receiver<ConfigCandidate>,
    window: Duration,
) -> Result<String, ProvisionError> {
    let deadline = Instant::now() + window;
    loop {
        let candidate = match tokio::time::timeout_at(deadline, candidates.recv()).await {
            Ok(Some(candidate)) => candidate,
            Ok(None) | Err(_) => return Err(ProvisionError::NoCandidate),
        };
        if candidate.seen_at.elapsed() <= window {
            return Ok(candidate.address);
        }
        debug!("Skipping stale candidate {}", candidate.address);
    }
}

async fn connect_with_retry(
    connector: &dyn ProvisioningConnector,
    address: &str,
    config: &ProvisionConfig,
) -> Result<Box<dyn GattLink>, ProvisionError> {
    let mut attempt = 1;
    loop {
        match connector.connect(address).await {
            Ok(link) => return Ok(link),
            Err(e) if attempt < config.connect_attempts => {
                debug!("Connect attempt {} to {} failed: {}", attempt, address, e);
                attempt += 1;
                tokio::time::sleep(config.connect_retry_delay).await;
            }
            Err(e) => {
                warn!("Giving up on {} after {} attempts", address, attempt);
                return Err(e.into());
            }
        }
    }
}
