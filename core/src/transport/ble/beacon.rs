/// Key fragments and the accessory's advertising lifecycle
///
/// A 64-byte key travels as three manufacturer-data fragments: indices 1 and
/// 2 carry 22 bytes each, index 3 carries the last 20 bytes followed by a
/// `0xFFFF` sentinel that scanners strip. The broadcaster keeps all three
/// registered at once and leaves time-multiplexing to the radio.
use super::advertisement::Advertisement;
use crate::crypto::{KeyMaterial, KEY_MATERIAL_LEN};
use crate::transport::abstraction::{PeripheralRadio, RadioError, Registration};
use thiserror::Error;
use tracing::{debug, info};

/// On-air payload length of every fragment
pub const FRAGMENT_WIRE_LEN: usize = 22;

/// Key bytes carried by the last fragment
pub const LAST_FRAGMENT_LEN: usize = 20;

/// Padding appended to the last fragment on air
pub const FRAGMENT_SENTINEL: [u8; 2] = [0xFF, 0xFF];

/// Number of fragments per key
pub const FRAGMENT_COUNT: u8 = 3;

/// Errors for fragment handling
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FragmentError {
    #[error("Fragment index {0} out of range")]
    InvalidIndex(u8),
    #[error("Fragment {index} holds {actual} key bytes, expected {expected}")]
    InvalidLength {
        index: u8,
        expected: usize,
        actual: usize,
    },
}

/// Key bytes a fragment carries once the sentinel is gone
pub fn key_bytes_for_index(index: u8) -> Result<usize, FragmentError> {
    match index {
        1 | 2 => Ok(FRAGMENT_WIRE_LEN),
        3 => Ok(LAST_FRAGMENT_LEN),
        other => Err(FragmentError::InvalidIndex(other)),
    }
}

/// One key fragment, holding key bytes only (no sentinel)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    index: u8,
    payload: Vec<u8>,
}

impl Fragment {
    pub fn new(index: u8, payload: Vec<u8>) -> Result<Self, FragmentError> {
        let expected = key_bytes_for_index(index)?;
        if payload.len() != expected {
            return Err(FragmentError::InvalidLength {
                index,
                expected,
                actual: payload.len(),
            });
        }
        Ok(Self { index, payload })
    }

    /// Build from bytes seen on air; index 3 loses its trailing two bytes
    pub fn from_wire(index: u8, wire: &[u8]) -> Result<Self, FragmentError> {
        let body = if index == FRAGMENT_COUNT {
            &wire[..wire.len().saturating_sub(FRAGMENT_SENTINEL.len())]
        } else {
            wire
        };
        Self::new(index, body.to_vec())
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Bytes placed on air after the index byte
    pub fn wire_payload(&self) -> Vec<u8> {
        let mut out = self.payload.clone();
        if self.index == FRAGMENT_COUNT {
            out.extend_from_slice(&FRAGMENT_SENTINEL);
        }
        out
    }

    pub fn advertisement(&self) -> Advertisement {
        Advertisement::beacon(self.index, &self.wire_payload())
    }
}

/// Split a key into its three fragments
pub fn split_key(key: &KeyMaterial) -> [Fragment; 3] {
    let bytes = key.as_bytes();
    let (first, rest) = bytes.split_at(FRAGMENT_WIRE_LEN);
    let (second, third) = rest.split_at(FRAGMENT_WIRE_LEN);
    [
        Fragment {
            index: 1,
            payload: first.to_vec(),
        },
        Fragment {
            index: 2,
            payload: second.to_vec(),
        },
        Fragment {
            index: 3,
            payload: third.to_vec(),
        },
    ]
}

/// Join three key-byte payloads (sentinel already stripped) back into a key
pub fn decode_fragments(
    first: &[u8],
    second: &[u8],
    third: &[u8],
) -> Result<KeyMaterial, FragmentError> {
    for (index, part) in [(1u8, first), (2, second), (3, third)] {
        let expected = key_bytes_for_index(index)?;
        if part.len() != expected {
            return Err(FragmentError::InvalidLength {
                index,
                expected,
                actual: part.len(),
            });
        }
    }
    let mut raw = [0u8; KEY_MATERIAL_LEN];
    raw[..FRAGMENT_WIRE_LEN].copy_from_slice(first);
    raw[FRAGMENT_WIRE_LEN..2 * FRAGMENT_WIRE_LEN].copy_from_slice(second);
    raw[2 * FRAGMENT_WIRE_LEN..].copy_from_slice(third);
    Ok(KeyMaterial::from(raw))
}

/// Broadcaster lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastState {
    Idle,
    Advertising,
    Stopped,
}

/// Keeps a tag's advertisements registered for one lifecycle phase
#[derive(Debug)]
pub struct FragmentBroadcaster {
    advertisements: Vec<Advertisement>,
    registrations: Vec<Registration>,
    state: BroadcastState,
}

impl FragmentBroadcaster {
    /// Beacon phase: the three fragments of a provisioned key
    pub fn for_key(key: &KeyMaterial) -> Self {
        let advertisements = split_key(key).iter().map(Fragment::advertisement).collect();
        Self::with_advertisements(advertisements)
    }

    /// Config phase: the single provisioning-available advertisement
    pub fn config_mode() -> Self {
        Self::with_advertisements(vec![Advertisement::config()])
    }

    fn with_advertisements(advertisements: Vec<Advertisement>) -> Self {
        Self {
            advertisements,
            registrations: Vec::new(),
            state: BroadcastState::Idle,
        }
    }

    pub fn state(&self) -> BroadcastState {
        self.state
    }

    pub fn advertisements(&self) -> &[Advertisement] {
        &self.advertisements
    }

    /// Register every advertisement. A no-op while already advertising.
    ///
    /// If any registration fails, the ones already made are released and the
    /// broadcaster stays out of the advertising state.
    pub async fn start(&mut self, radio: &dyn PeripheralRadio) -> Result<(), RadioError> {
        if self.state == BroadcastState::Advertising {
            debug!("Broadcaster already advertising");
            return Ok(());
        }

        let mut registrations = Vec::with_capacity(self.advertisements.len());
        for advertisement in &self.advertisements {
            // Partial registrations drop with `registrations` on error
            registrations.push(radio.register_advertisement(advertisement.clone()).await?);
        }

        self.registrations = registrations;
        self.state = BroadcastState::Advertising;
        info!("Advertising {} payload(s)", self.advertisements.len());
        Ok(())
    }

    /// Unregister everything. Idempotent.
    pub fn stop(&mut self) {
        if self.state != BroadcastState::Advertising {
            self.state = BroadcastState::Stopped;
            return;
        }
        for registration in self.registrations.drain(..) {
            registration.release();
        }
        self.state = BroadcastState::Stopped;
        info!("Advertising stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ble::constants::VENDOR_ID;
    use crate::transport::loopback::LoopbackRadio;
    use proptest::prelude::*;

    fn key() -> KeyMaterial {
        let mut raw = [0u8; KEY_MATERIAL_LEN];
        for (i, b) in raw.iter_mut().enumerate() {
            *b = i as u8 + 1;
        }
        KeyMaterial::from(raw)
    }

    #[test]
    fn test_split_lengths() {
        let fragments = split_key(&key());
        let lens: Vec<usize> = fragments.iter().map(|f| f.payload().len()).collect();
        assert_eq!(lens, vec![22, 22, 20]);
        assert_eq!(fragments[2].wire_payload().len(), 22);
        assert_eq!(&fragments[2].wire_payload()[20..], &FRAGMENT_SENTINEL);
        assert_eq!(fragments[0].wire_payload(), fragments[0].payload());
    }

    #[test]
    fn test_fragment_advertisement_content() {
        let fragments = split_key(&key());
        let adv = fragments[2].advertisement();
        let content = adv.manufacturer_data.get(&VENDOR_ID).expect("Vendor data");
        assert_eq!(content[0], 3);
        assert_eq!(content.len(), 23);
        assert_eq!(&content[21..], &[0xFF, 0xFF]);
    }

    #[test]
    fn test_from_wire_strips_sentinel_for_last_only() {
        let mut wire = vec![9u8; 20];
        wire.extend_from_slice(&[0xFF, 0xFF]);
        let last = Fragment::from_wire(3, &wire).expect("Fragment");
        assert_eq!(last.payload(), &[9u8; 20]);

        let first = Fragment::from_wire(1, &[5u8; 22]).expect("Fragment");
        assert_eq!(first.payload().len(), 22);
    }

    #[test]
    fn test_fragment_validation() {
        assert_eq!(
            Fragment::new(4, vec![0; 22]),
            Err(FragmentError::InvalidIndex(4))
        );
        assert_eq!(
            Fragment::new(2, vec![0; 21]),
            Err(FragmentError::InvalidLength {
                index: 2,
                expected: 22,
                actual: 21
            })
        );
    }

    #[test]
    fn test_decode_rejects_short_part() {
        assert!(decode_fragments(&[0; 22], &[0; 22], &[0; 19]).is_err());
    }

    #[tokio::test]
    async fn test_broadcaster_lifecycle() {
        let radio = LoopbackRadio::new();
        let mut broadcaster = FragmentBroadcaster::for_key(&key());
        assert_eq!(broadcaster.state(), BroadcastState::Idle);

        broadcaster.start(&radio).await.expect("Start");
        assert_eq!(broadcaster.state(), BroadcastState::Advertising);
        assert_eq!(radio.active_advertisements().len(), 3);

        // Idempotent start
        broadcaster.start(&radio).await.expect("Start again");
        assert_eq!(radio.active_advertisements().len(), 3);

        broadcaster.stop();
        assert_eq!(broadcaster.state(), BroadcastState::Stopped);
        assert!(radio.active_advertisements().is_empty());

        // Idempotent stop
        broadcaster.stop();
        assert_eq!(broadcaster.state(), BroadcastState::Stopped);
    }

    #[tokio::test]
    async fn test_config_mode_registers_single_advertisement() {
        let radio = LoopbackRadio::new();
        let mut broadcaster = FragmentBroadcaster::config_mode();
        broadcaster.start(&radio).await.expect("Start");

        let active = radio.active_advertisements();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].vendor_content(), Some(&[0xFF][..]));
    }

    #[tokio::test]
    async fn test_partial_start_failure_releases_registrations() {
        let radio = LoopbackRadio::new();
        radio.fail_advertisements_after(2);

        let mut broadcaster = FragmentBroadcaster::for_key(&key());
        assert!(broadcaster.start(&radio).await.is_err());
        assert_eq!(broadcaster.state(), BroadcastState::Idle);
        assert!(radio.active_advertisements().is_empty());
    }

    #[tokio::test]
    async fn test_drop_releases_registrations() {
        let radio = LoopbackRadio::new();
        {
            let mut broadcaster = FragmentBroadcaster::for_key(&key());
            broadcaster.start(&radio).await.expect("Start");
            assert_eq!(radio.active_advertisements().len(), 3);
        }
        assert!(radio.active_advertisements().is_empty());
    }

    proptest! {
        #[test]
        fn prop_split_then_decode_is_identity(raw in proptest::collection::vec(any::<u8>(), KEY_MATERIAL_LEN)) {
            let key = KeyMaterial::from_bytes(&raw).expect("Key");
            let [a, b, c] = split_key(&key);
            let wire_c = Fragment::from_wire(3, &c.wire_payload()).expect("Fragment");
            let decoded = decode_fragments(a.payload(), b.payload(), wire_c.payload()).expect("Decode");
            prop_assert_eq!(decoded, key);
        }
    }
}
