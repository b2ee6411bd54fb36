//! Per-address fragment state for tags seen by the scanner
//!
//! The registry is owned by the main loop and handed to the collector by
//! reference. Nothing else mutates it, so it carries no locks.

use crate::crypto::KeyMaterial;
use crate::transport::ble::beacon::{decode_fragments, FRAGMENT_WIRE_LEN, LAST_FRAGMENT_LEN};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

const SLOT_LENGTHS: [usize; 3] = [FRAGMENT_WIRE_LEN, FRAGMENT_WIRE_LEN, LAST_FRAGMENT_LEN];

/// Fragment state for one radio address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedTag {
    address: String,
    last_seen: Option<Instant>,
    fragments: [Vec<u8>; 3],
}

impl TrackedTag {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            last_seen: None,
            fragments: Default::default(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn last_seen(&self) -> Option<Instant> {
        self.last_seen
    }

    pub fn touch(&mut self, seen_at: Instant) {
        self.last_seen = Some(seen_at);
    }

    /// Whether a sighting at `seen_at` starts a new session
    pub fn is_stale(&self, seen_at: Instant, window: Duration) -> bool {
        match self.last_seen {
            None => true,
            Some(last) => seen_at.saturating_duration_since(last) > window,
        }
    }

    /// Slot contents for fragment `index` (1-based)
    pub fn fragment(&self, index: u8) -> Option<&[u8]> {
        let slot = usize::from(index).checked_sub(1)?;
        self.fragments.get(slot).map(Vec::as_slice)
    }

    /// Store `payload` in slot `index` if that slot is empty.
    ///
    /// Returns false when the slot was already filled or the index is unknown.
    pub fn record(&mut self, index: u8, payload: &[u8]) -> bool {
        let Some(slot) = usize::from(index)
            .checked_sub(1)
            .and_then(|i| self.fragments.get_mut(i))
        else {
            return false;
        };
        if !slot.is_empty() {
            return false;
        }
        slot.extend_from_slice(payload);
        true
    }

    pub fn reset_fragments(&mut self) {
        for slot in &mut self.fragments {
            slot.clear();
        }
    }

    /// True exactly when every slot holds its required length
    pub fn key_ready(&self) -> bool {
        self.fragments
            .iter()
            .zip(SLOT_LENGTHS)
            .all(|(slot, len)| slot.len() == len)
    }

    pub fn key_material(&self) -> Option<KeyMaterial> {
        if !self.key_ready() {
            return None;
        }
        decode_fragments(&self.fragments[0], &self.fragments[1], &self.fragments[2]).ok()
    }
}

/// All tags seen by this scanner, keyed by radio address
#[derive(Debug, Default)]
pub struct TagRegistry {
    tags: HashMap<String, TrackedTag>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_insert(&mut self, address: &str) -> &mut TrackedTag {
        self.tags
            .entry(address.to_string())
            .or_insert_with(|| TrackedTag::new(address))
    }

    pub fn get(&self, address: &str) -> Option<&TrackedTag> {
        self.tags.get(address)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Clear a tag's slots so a fresh fragment set can be collected
    pub fn discard_fragments(&mut self, address: &str) {
        if let Some(tag) = self.tags.get_mut(address) {
            tag.reset_fragments();
        }
    }

    /// Evict tags unseen for longer than `horizon`; returns how many went
    pub fn sweep(&mut self, now: Instant, horizon: Duration) -> usize {
        let before = self.tags.len();
        self.tags.retain(|_, tag| match tag.last_seen {
            Some(last) => now.saturating_duration_since(last) <= horizon,
            None => false,
        });
        before - self.tags.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_first_write_wins() {
        let mut tag = TrackedTag::new("AA");
        assert!(tag.record(1, &[1u8; 22]));
        assert!(!tag.record(1, &[2u8; 22]));
        assert_eq!(tag.fragment(1), Some(&[1u8; 22][..]));
    }

    #[test]
    fn test_record_rejects_unknown_index() {
        let mut tag = TrackedTag::new("AA");
        assert!(!tag.record(0, &[1]));
        assert!(!tag.record(4, &[1]));
        assert_eq!(tag.fragment(0), None);
    }

    #[test]
    fn test_key_ready_requires_exact_lengths() {
        let mut tag = TrackedTag::new("AA");
        tag.record(1, &[1u8; 22]);
        tag.record(2, &[2u8; 22]);
        assert!(!tag.key_ready());
        tag.record(3, &[3u8; 20]);
        assert!(tag.key_ready());

        let mut wrong = TrackedTag::new("BB");
        wrong.record(1, &[1u8; 22]);
        wrong.record(2, &[2u8; 21]);
        wrong.record(3, &[3u8; 20]);
        assert!(!wrong.key_ready());
        assert!(wrong.key_material().is_none());
    }

    #[test]
    fn test_key_material_concatenates_slots() {
        let mut tag = TrackedTag::new("AA");
        tag.record(1, &[1u8; 22]);
        tag.record(2, &[2u8; 22]);
        tag.record(3, &[3u8; 20]);
        let key = tag.key_material().expect("Key");
        assert_eq!(&key.as_bytes()[..22], &[1u8; 22]);
        assert_eq!(&key.as_bytes()[22..44], &[2u8; 22]);
        assert_eq!(&key.as_bytes()[44..], &[3u8; 20]);
    }

    #[test]
    fn test_staleness_window() {
        let start = Instant::now();
        let mut tag = TrackedTag::new("AA");
        let window = Duration::from_secs(120);
        assert!(tag.is_stale(start, window));

        tag.touch(start);
        assert!(!tag.is_stale(start + Duration::from_secs(120), window));
        assert!(tag.is_stale(start + Duration::from_secs(121), window));
    }

    #[test]
    fn test_sweep_evicts_old_tags() {
        let start = Instant::now();
        let mut registry = TagRegistry::new();
        registry.get_or_insert("old").touch(start);
        registry
            .get_or_insert("fresh")
            .touch(start + Duration::from_secs(3000));
        registry.get_or_insert("never");

        let evicted = registry.sweep(start + Duration::from_secs(3700), Duration::from_secs(3600));
        assert_eq!(evicted, 2);
        assert!(registry.get("fresh").is_some());
        assert!(registry.get("old").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_discard_fragments_keeps_tag() {
        let mut registry = TagRegistry::new();
        let tag = registry.get_or_insert("AA");
        tag.record(1, &[1u8; 22]);
        registry.discard_fragments("AA");
        assert_eq!(registry.get("AA").and_then(|t| t.fragment(1)), Some(&[][..]));
    }
}
