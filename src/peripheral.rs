//! # Peripheral Data Model
//!
//! Types describing what the radio sees and what the session controller keeps:
//! - `Advertisement` / `ScanEvent`: raw observations delivered by a transport
//! - `PeripheralRecord` / `DiscoveryRegistry`: the deduplicated discovery list
//! - `ListeningSnapshot`: latest payload of the peripheral being listened to

use chrono::{DateTime, Local};
use std::collections::HashSet;
use std::fmt;

/// Transport-assigned identity, stable for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeripheralId(String);

impl PeripheralId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeripheralId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// One observation of a peripheral's broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub id: PeripheralId,
    pub name: Option<String>,
    pub manufacturer_data: Option<Vec<u8>>,
    pub service_data: Option<Vec<u8>>,
    pub rssi: Option<i16>,
}

impl Advertisement {
    /// Advertised name, if present and not blank
    pub fn display_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
    }
}

#[cfg(test)]
impl Advertisement {
    pub fn new(id: impl Into<PeripheralId>) -> Self {
        Self {
            id: id.into(),
            name: None,
            manufacturer_data: None,
            service_data: None,
            rssi: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_manufacturer_data(mut self, data: Vec<u8>) -> Self {
        self.manufacturer_data = Some(data);
        self
    }

    pub fn with_service_data(mut self, data: Vec<u8>) -> Self {
        self.service_data = Some(data);
        self
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }
}

/// Item of a transport's scan event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    Advertisement(Advertisement),
    /// Terminal failure; the transport sends nothing after this
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralRecord {
    pub id: PeripheralId,
    pub name: String,
}

impl PeripheralRecord {
    pub fn new(id: PeripheralId, name: String) -> Self {
        Self { id, name }
    }
}

/// Insertion-ordered set of named peripherals keyed by identity.
///
/// The first record seen for an identity is kept as-is; later observations of
/// the same identity are rejected even when they carry a different name.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryRegistry {
    records: Vec<PeripheralRecord>,
    seen: HashSet<PeripheralId>,
}

impl DiscoveryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record for `advertisement` if it is named and new.
    /// Returns the appended record.
    pub fn insert(&mut self, advertisement: &Advertisement) -> Option<&PeripheralRecord> {
        let name = advertisement.display_name()?;
        if !self.seen.insert(advertisement.id.clone()) {
            return None;
        }
        self.records.push(PeripheralRecord::new(
            advertisement.id.clone(),
            name.to_string(),
        ));
        self.records.last()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.seen.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[PeripheralRecord] {
        &self.records
    }
}

/// Latest known payload of the peripheral being listened to.
#[derive(Debug, Clone, PartialEq)]
pub struct ListeningSnapshot {
    pub id: PeripheralId,
    pub name: Option<String>,
    pub manufacturer_data: Option<Vec<u8>>,
    pub service_data: Option<Vec<u8>>,
    pub rssi: Option<i16>,
    pub updated_at: DateTime<Local>,
}

impl ListeningSnapshot {
    pub fn from_advertisement(advertisement: Advertisement) -> Self {
        Self {
            id: advertisement.id,
            name: advertisement.name,
            manufacturer_data: advertisement.manufacturer_data,
            service_data: advertisement.service_data,
            rssi: advertisement.rssi,
            updated_at: Local::now(),
        }
    }
}

/// Formats a payload as space separated hex bytes, or `-` when absent.
pub fn format_payload(payload: Option<&[u8]>) -> String {
    match payload {
        Some(bytes) if !bytes.is_empty() => bytes
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" "),
        _ => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_keeps_first_seen_order_and_name() {
        let mut registry = DiscoveryRegistry::new();
        let events = [
            Advertisement::new("A").with_name("Sensor1"),
            Advertisement::new("B"),
            Advertisement::new("A").with_name("Sensor1-dup-name"),
            Advertisement::new("C").with_name("Sensor2"),
        ];
        for event in &events {
            registry.insert(event);
        }

        let expected = vec![
            PeripheralRecord::new("A".into(), "Sensor1".into()),
            PeripheralRecord::new("C".into(), "Sensor2".into()),
        ];
        assert_eq!(registry.records(), expected.as_slice());
    }

    #[test]
    fn test_registry_rejects_unnamed_and_blank() {
        let mut registry = DiscoveryRegistry::new();
        assert!(registry.insert(&Advertisement::new("A")).is_none());
        assert!(registry.insert(&Advertisement::new("B").with_name("")).is_none());
        assert!(registry.insert(&Advertisement::new("C").with_name("   ")).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unnamed_sighting_does_not_block_later_named_one() {
        let mut registry = DiscoveryRegistry::new();
        registry.insert(&Advertisement::new("A"));
        let added = registry.insert(&Advertisement::new("A").with_name("Thermo"));
        assert_eq!(added.map(|r| r.name.as_str()), Some("Thermo"));
        assert_eq!(registry.records()[0].id, PeripheralId::from("A"));
    }

    #[test]
    fn test_registry_clear() {
        let mut registry = DiscoveryRegistry::new();
        registry.insert(&Advertisement::new("A").with_name("Sensor1"));
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.records().is_empty());
        assert!(registry.insert(&Advertisement::new("A").with_name("Sensor1")).is_some());
    }

    #[test]
    fn test_snapshot_from_advertisement() {
        let snapshot = ListeningSnapshot::from_advertisement(
            Advertisement::new("A")
                .with_name("Sensor1")
                .with_manufacturer_data(vec![0x59, 0x00, 0x01])
                .with_rssi(-60),
        );
        assert_eq!(snapshot.id, PeripheralId::from("A"));
        assert_eq!(snapshot.manufacturer_data.as_deref(), Some(&[0x59, 0x00, 0x01][..]));
        assert_eq!(snapshot.service_data, None);
        assert_eq!(snapshot.rssi, Some(-60));
    }

    #[test]
    fn test_format_payload() {
        assert_eq!(format_payload(Some(&[0x0A, 0xFF])), "0A FF");
        assert_eq!(format_payload(Some(&[])), "-");
        assert_eq!(format_payload(None), "-");
    }
}
