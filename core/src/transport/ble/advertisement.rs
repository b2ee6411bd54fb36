/// Advertisement data objects handed to the peripheral radio
///
/// These are plain values. The radio adapter decides how to put them on air
/// and owns their registration lifetime.
use super::constants::{
    BEACON_ADVERTISEMENT_DURATION_SECS, BEACON_SERVICE_UUID, CONFIG_ADVERTISEMENT_DURATION_SECS,
    CONFIG_INDEX, CONFIG_SERVICE_UUID, VENDOR_ID,
};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Advertising type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertisementType {
    Peripheral,
    Broadcast,
}

impl AdvertisementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdvertisementType::Peripheral => "peripheral",
            AdvertisementType::Broadcast => "broadcast",
        }
    }
}

/// One advertisement as registered with the radio stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub advertisement_type: AdvertisementType,
    pub service_uuids: Vec<Uuid>,
    pub manufacturer_data: BTreeMap<u16, Vec<u8>>,
    /// Seconds this advertisement holds the air per rotation
    pub duration_secs: Option<u16>,
    /// Seconds until the stack drops the advertisement on its own
    pub timeout_secs: Option<u16>,
}

impl Advertisement {
    pub fn new(advertisement_type: AdvertisementType) -> Self {
        Self {
            advertisement_type,
            service_uuids: Vec::new(),
            manufacturer_data: BTreeMap::new(),
            duration_secs: None,
            timeout_secs: None,
        }
    }

    pub fn with_service_uuid(mut self, uuid: Uuid) -> Self {
        self.service_uuids.push(uuid);
        self
    }

    pub fn with_manufacturer_data(mut self, vendor_id: u16, content: Vec<u8>) -> Self {
        self.manufacturer_data.insert(vendor_id, content);
        self
    }

    pub fn with_duration(mut self, secs: u16) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    pub fn with_timeout(mut self, secs: u16) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Beacon advertisement carrying one key fragment
    pub fn beacon(index: u8, payload: &[u8]) -> Self {
        let mut content = Vec::with_capacity(payload.len() + 1);
        content.push(index);
        content.extend_from_slice(payload);
        Self::new(AdvertisementType::Peripheral)
            .with_service_uuid(BEACON_SERVICE_UUID)
            .with_manufacturer_data(VENDOR_ID, content)
            .with_duration(BEACON_ADVERTISEMENT_DURATION_SECS)
    }

    /// Config-mode advertisement announcing the tag can be provisioned
    pub fn config() -> Self {
        Self::new(AdvertisementType::Peripheral)
            .with_service_uuid(CONFIG_SERVICE_UUID)
            .with_manufacturer_data(VENDOR_ID, vec![CONFIG_INDEX])
            .with_duration(CONFIG_ADVERTISEMENT_DURATION_SECS)
    }

    /// Content bytes under our vendor id
    pub fn vendor_content(&self) -> Option<&[u8]> {
        self.manufacturer_data.get(&VENDOR_ID).map(Vec::as_slice)
    }

    /// Key/value view of the advertisement as exposed to the radio stack
    pub fn properties(&self) -> Vec<(&'static str, String)> {
        let mut props = vec![("Type", self.advertisement_type.as_str().to_string())];
        if !self.service_uuids.is_empty() {
            let uuids: Vec<String> = self.service_uuids.iter().map(Uuid::to_string).collect();
            props.push(("ServiceUUIDs", uuids.join(",")));
        }
        for (vendor, data) in &self.manufacturer_data {
            props.push(("ManufacturerData", format!("{vendor:#06x}:{}", hex::encode(data))));
        }
        if let Some(d) = self.duration_secs {
            props.push(("Duration", d.to_string()));
        }
        if let Some(t) = self.timeout_secs {
            props.push(("Timeout", t.to_string()));
        }
        props
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_advertisement_content() {
        let adv = Advertisement::config();
        assert_eq!(adv.vendor_content(), Some(&[0xFF][..]));
        assert_eq!(adv.service_uuids, vec![CONFIG_SERVICE_UUID]);
        assert_eq!(adv.duration_secs, Some(30));
    }

    #[test]
    fn test_beacon_advertisement_prefixes_index() {
        let adv = Advertisement::beacon(2, &[7u8; 22]);
        let content = adv.vendor_content().expect("Vendor content");
        assert_eq!(content.len(), 23);
        assert_eq!(content[0], 2);
        assert!(content[1..].iter().all(|b| *b == 7));
        assert_eq!(adv.duration_secs, Some(3));
    }

    #[test]
    fn test_properties_view() {
        let props = Advertisement::config().with_timeout(60).properties();
        assert_eq!(props[0], ("Type", "peripheral".to_string()));
        assert!(props.contains(&("ManufacturerData", "0x6b5a:ff".to_string())));
        assert!(props.contains(&("Timeout", "60".to_string())));
    }
}
