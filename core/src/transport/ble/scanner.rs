/// Scanner-side ingestion of tag advertisements
///
/// Raw manufacturer data from the radio is turned into [`Sighting`]s and
/// pushed into the bounded sighting queue. The queue applies backpressure:
/// when it is full the scan task waits rather than dropping sightings.
use super::constants::{CONFIG_INDEX, VENDOR_ID};
use crate::shutdown::{wait_for_shutdown, ShutdownSignal};
use crate::transport::abstraction::RawAdvertisement;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace};

/// Largest fragment payload taken from one advertisement
pub const MAX_FRAGMENT_CONTENT: usize = 22;

/// What a single advertisement said
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SightingKind {
    /// Tag is in provisioning mode
    Config,
    /// Key fragment exactly as seen on air
    Fragment { index: u8, payload: Vec<u8> },
}

/// One tag advertisement observed at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sighting {
    pub address: String,
    pub seen_at: Instant,
    pub kind: SightingKind,
}

impl Sighting {
    pub fn config(address: impl Into<String>, seen_at: Instant) -> Self {
        Self {
            address: address.into(),
            seen_at,
            kind: SightingKind::Config,
        }
    }

    pub fn fragment(address: impl Into<String>, seen_at: Instant, index: u8, payload: Vec<u8>) -> Self {
        Self {
            address: address.into(),
            seen_at,
            kind: SightingKind::Fragment { index, payload },
        }
    }
}

/// Turn one advertisement report into zero or more sightings
pub fn parse_advertisement(raw: &RawAdvertisement, seen_at: Instant) -> Vec<Sighting> {
    let mut sightings = Vec::new();
    for (vendor_id, content) in &raw.manufacturer_data {
        if *vendor_id != VENDOR_ID {
            trace!(
                "Ignoring manufacturer data with vendor id {:#06x} from {}",
                vendor_id, raw.address
            );
            continue;
        }
        let Some(&index) = content.first() else {
            debug!("Empty manufacturer data from {}", raw.address);
            continue;
        };
        match index {
            CONFIG_INDEX => sightings.push(Sighting::config(raw.address.clone(), seen_at)),
            1..=3 => {
                let end = content.len().min(MAX_FRAGMENT_CONTENT + 1);
                sightings.push(Sighting::fragment(
                    raw.address.clone(),
                    seen_at,
                    index,
                    content[1..end].to_vec(),
                ));
            }
            other => debug!("Ignoring unknown index {} from {}", other, raw.address),
        }
    }
    sightings
}

/// Counters reported when the scan task ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub reports: u64,
    pub sightings: u64,
}

/// Sole producer of the sighting queue.
///
/// Runs until shutdown, until the radio stream ends, or until the consumer
/// goes away.
pub async fn run_scan_task<S>(
    mut reports: S,
    tx: mpsc::Sender<Sighting>,
    mut shutdown: ShutdownSignal,
) -> ScanStats
where
    S: Stream<Item = RawAdvertisement> + Unpin,
{
    let mut stats = ScanStats::default();
    info!("Scan task started");

    loop {
        let raw = tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => break,
            next = reports.next() => match next {
                Some(raw) => raw,
                None => {
                    info!("Radio stream ended");
                    break;
                }
            },
        };
        stats.reports += 1;

        for sighting in parse_advertisement(&raw, Instant::now()) {
            tokio::select! {
                sent = tx.send(sighting) => {
                    if sent.is_err() {
                        debug!("Sighting queue closed");
                        return stats;
                    }
                    stats.sightings += 1;
                }
                _ = wait_for_shutdown(&mut shutdown) => return stats,
            }
        }
    }

    info!(
        "Scan task stopped after {} reports, {} sightings",
        stats.reports, stats.sightings
    );
    stats
}
