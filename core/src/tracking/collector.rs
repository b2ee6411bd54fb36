//! Fragment reassembly for the scanner
//!
//! Each sighting updates the tag it came from. A sighting arriving more
//! than the stale window after the previous one starts a new session and
//! clears the tag's fragments first. Completion is reported once, on the
//! transition to a full slot set.

use super::registry::TagRegistry;
use crate::crypto::KeyMaterial;
use crate::transport::ble::beacon::{Fragment, FragmentError};
use crate::transport::ble::scanner::{Sighting, SightingKind};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default gap after which a tag's fragments are considered stale
pub const DEFAULT_STALE_WINDOW: Duration = Duration::from_secs(120);

/// Default time an unseen tag stays in the registry
pub const DEFAULT_EVICTION_HORIZON: Duration = Duration::from_secs(3600);

/// Collector tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorConfig {
    pub stale_window: Duration,
    pub eviction_horizon: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            stale_window: DEFAULT_STALE_WINDOW,
            eviction_horizon: DEFAULT_EVICTION_HORIZON,
        }
    }
}

impl CollectorConfig {
    pub fn with_stale_window(mut self, window: Duration) -> Self {
        self.stale_window = window;
        self
    }

    pub fn with_eviction_horizon(mut self, horizon: Duration) -> Self {
        self.eviction_horizon = horizon;
        self
    }
}

/// What one sighting did to the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectEvent {
    ConfigSeen { address: String },
    Recorded { address: String, index: u8 },
    Duplicate { address: String, index: u8 },
    Rejected { address: String, error: FragmentError },
    KeyReady { address: String, key: KeyMaterial },
}

/// Applies sightings to a [`TagRegistry`]
#[derive(Debug, Clone, Default)]
pub struct FragmentCollector {
    config: CollectorConfig,
}

impl FragmentCollector {
    pub fn new(config: CollectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    pub fn ingest(&self, registry: &mut TagRegistry, sighting: Sighting) -> CollectEvent {
        let Sighting {
            address,
            seen_at,
            kind,
        } = sighting;
        let tag = registry.get_or_insert(&address);

        let (index, wire) = match kind {
            SightingKind::Config => {
                tag.touch(seen_at);
                return CollectEvent::ConfigSeen { address };
            }
            SightingKind::Fragment { index, payload } => (index, payload),
        };

        // Staleness is judged against the previous sighting, before touching
        if tag.is_stale(seen_at, self.config.stale_window) {
            if tag.last_seen().is_some() {
                debug!("Tag {} went stale, clearing fragments", address);
            }
            tag.reset_fragments();
        }
        tag.touch(seen_at);

        let fragment = match Fragment::from_wire(index, &wire) {
            Ok(fragment) => fragment,
            Err(error) => {
                warn!("Bad fragment from {}: {}", address, error);
                return CollectEvent::Rejected { address, error };
            }
        };

        let was_ready = tag.key_ready();
        if !tag.record(index, fragment.payload()) {
            return CollectEvent::Duplicate { address, index };
        }
        debug!("Recorded fragment {} for {}", index, address);

        if !was_ready {
            if let Some(key) = tag.key_material() {
                info!("Key ready for {}", address);
                return CollectEvent::KeyReady { address, key };
            }
        }
        CollectEvent::Recorded { address, index }
    }
}
