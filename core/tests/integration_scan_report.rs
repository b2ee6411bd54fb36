//! Scanner path end to end
//!
//! Broadcaster advertisements -> scan task -> bounded queue -> scanner loop
//! -> directory -> owner query and decryption. Also covers the owner-set
//! layout, where the scanner keeps reporting after provisioning gives up.
//!
//! Run with: cargo test --test integration_scan_report

use futures::StreamExt;
use keybeacon_core::directory::MemoryDirectory;
use keybeacon_core::identity::OwnerKeys;
use keybeacon_core::node::{NodeConfig, ScannerNode};
use keybeacon_core::provision::{run_provisioning_task, ProvisionConfig};
use keybeacon_core::report::{query_reports, Reporter, StaticLocation, DEFAULT_LOCATION};
use keybeacon_core::shutdown::shutdown_channel;
use keybeacon_core::transport::ble::{run_scan_task, FragmentBroadcaster, ProvisionError};
use keybeacon_core::transport::{LoopbackRadio, RawAdvertisement};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const TAG: &str = "B8:27:EB:00:AA:01";

fn as_raw(radio: &LoopbackRadio, address: &str) -> Vec<RawAdvertisement> {
    radio
        .active_advertisements()
        .into_iter()
        .map(|adv| RawAdvertisement {
            address: address.to_string(),
            manufacturer_data: adv.manufacturer_data.into_iter().collect(),
        })
        .collect()
}

#[tokio::test]
async fn test_broadcast_reassembled_and_reported_to_owner() {
    let owner = OwnerKeys::generate().unwrap();
    let key = owner.key_material().unwrap();

    let radio = LoopbackRadio::new();
    let mut broadcaster = FragmentBroadcaster::for_key(&key);
    broadcaster.start(&radio).await.unwrap();

    // The scanner hears every fragment several times
    let mut reports = Vec::new();
    for _ in 0..4 {
        reports.extend(as_raw(&radio, TAG));
    }
    broadcaster.stop();

    let directory = MemoryDirectory::new();
    let reporter = Reporter::new(
        Arc::new(directory.clone()),
        Arc::new(StaticLocation::default()),
    );
    let mut node = ScannerNode::new(
        NodeConfig::default().with_poll_interval(Duration::from_millis(5)),
        reporter,
    );
    let (tx, rx) = node.sighting_channel();
    let (_stop, shutdown) = shutdown_channel();

    let scan = tokio::spawn(run_scan_task(
        futures::stream::iter(reports).boxed(),
        tx,
        shutdown.clone(),
    ));
    let stats = node.run(rx, shutdown).await;
    let scan_stats = scan.await.unwrap();

    assert_eq!(scan_stats.sightings, 12);
    assert_eq!(stats.sightings, 12);
    assert_eq!(stats.keys_completed, 1);
    assert_eq!(stats.uploads_ok, 1);

    let decrypted = query_reports(&directory, &owner).await.unwrap();
    assert_eq!(decrypted.len(), 1);
    tokio_test::assert_ok!(&decrypted[0].content);
    assert_eq!(decrypted[0].content.as_deref().unwrap(), DEFAULT_LOCATION);
}

#[tokio::test]
async fn test_two_tags_are_tracked_independently() {
    let first = OwnerKeys::generate().unwrap();
    let second = OwnerKeys::generate().unwrap();

    let mut reports = Vec::new();
    for (address, owner) in [("AA:00:00:00:00:01", &first), ("AA:00:00:00:00:02", &second)] {
        let radio = LoopbackRadio::new();
        let mut broadcaster = FragmentBroadcaster::for_key(&owner.key_material().unwrap());
        broadcaster.start(&radio).await.unwrap();
        reports.push(as_raw(&radio, address));
    }
    // Interleave the two tags' fragments
    let mut interleaved = Vec::new();
    for i in 0..3 {
        interleaved.push(reports[0][i].clone());
        interleaved.push(reports[1][i].clone());
    }

    let directory = MemoryDirectory::new();
    let mut node = ScannerNode::new(
        NodeConfig::default().with_poll_interval(Duration::from_millis(5)),
        Reporter::new(Arc::new(directory.clone()), Arc::new(StaticLocation::default())),
    );
    let (tx, rx) = node.sighting_channel();
    let (_stop, shutdown) = shutdown_channel();
    let scan = tokio::spawn(run_scan_task(
        futures::stream::iter(interleaved).boxed(),
        tx,
        shutdown.clone(),
    ));
    let stats = node.run(rx, shutdown).await;
    scan.await.unwrap();

    assert_eq!(stats.keys_completed, 2);
    assert_eq!(node.registry().len(), 2);
    assert_eq!(query_reports(&directory, &first).await.unwrap().len(), 1);
    assert_eq!(query_reports(&directory, &second).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_wrong_owner_cannot_read_reports() {
    let owner = OwnerKeys::generate().unwrap();
    let stranger = OwnerKeys::generate().unwrap();
    let key = owner.key_material().unwrap();

    let directory = MemoryDirectory::new();
    let reporter = Reporter::new(
        Arc::new(directory.clone()),
        Arc::new(StaticLocation::new(b"51.5007,-0.1246".to_vec())),
    );
    reporter.report(&key, owner.public_key()).await.unwrap();

    // The stranger queries under their own key and sees nothing
    assert!(query_reports(&directory, &stranger).await.unwrap().is_empty());

    let mine = query_reports(&directory, &owner).await.unwrap();
    assert_eq!(mine[0].content.as_deref().unwrap(), b"51.5007,-0.1246");
}

#[tokio::test]
async fn test_reports_keep_flowing_after_provisioning_finds_no_tag() {
    let owner = OwnerKeys::generate().unwrap();
    let key = owner.key_material().unwrap();

    let directory = MemoryDirectory::new();
    let (candidate_tx, candidate_rx) = mpsc::channel(8);
    let mut node = ScannerNode::new(
        NodeConfig::default().with_poll_interval(Duration::from_millis(5)),
        Reporter::new(Arc::new(directory.clone()), Arc::new(StaticLocation::default())),
    )
    .with_config_candidates(candidate_tx);
    let (tx, rx) = node.sighting_channel();
    let (stop, shutdown) = shutdown_channel();

    // A live radio feed that stays open for the whole run
    let (radio_tx, radio_rx) = futures::channel::mpsc::unbounded::<RawAdvertisement>();
    let scan = tokio::spawn(run_scan_task(radio_rx, tx, shutdown.clone()));
    let node_shutdown = shutdown.clone();
    let node_task = tokio::spawn(async move { node.run(rx, node_shutdown).await });

    // No tag is in config mode, so provisioning gives up
    let outcome = run_provisioning_task(
        Arc::new(LoopbackRadio::new()),
        key.clone(),
        candidate_rx,
        shutdown.clone(),
        ProvisionConfig::default().with_candidate_window(Duration::from_millis(50)),
    )
    .await;
    assert_eq!(outcome.unwrap_err(), ProvisionError::NoCandidate);

    // A provisioned tag starts beaconing afterwards
    let radio = LoopbackRadio::new();
    let mut broadcaster = FragmentBroadcaster::for_key(&key);
    broadcaster.start(&radio).await.unwrap();
    for raw in as_raw(&radio, TAG) {
        radio_tx.unbounded_send(raw).unwrap();
    }
    broadcaster.stop();

    tokio::time::timeout(Duration::from_secs(5), async {
        while directory.report_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    stop.send(true).unwrap();
    let stats = node_task.await.unwrap();
    let scan_stats = scan.await.unwrap();
    assert_eq!(scan_stats.sightings, 3);
    assert_eq!(stats.keys_completed, 1);
    assert_eq!(stats.uploads_ok, 1);

    let decrypted = query_reports(&directory, &owner).await.unwrap();
    assert_eq!(decrypted.len(), 1);
    assert_eq!(decrypted[0].content.as_deref().unwrap(), DEFAULT_LOCATION);
}
