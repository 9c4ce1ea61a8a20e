//! # Radio Transport Module
//!
//! The session controller only sees the `ScanTransport` trait: start a scan and
//! receive `ScanEvent`s on a channel, or stop it. `BtleplugTransport` is the
//! production implementation on top of `btleplug`.
//!
//! Identity filtering is intentionally left to the caller; platform scan
//! filters only understand service UUIDs.

use crate::error::TransportError;
use crate::peripheral::{Advertisement, PeripheralId, ScanEvent};
use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, PeripheralId as RadioId};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Receiving end of a running scan. The stream ends when the scan is stopped.
pub type ScanEvents = mpsc::UnboundedReceiver<ScanEvent>;

#[async_trait]
pub trait ScanTransport: Send + Sync {
    /// Starts scanning and returns the stream of scan events.
    async fn start_scan(&self, filter: ScanFilter) -> Result<ScanEvents, TransportError>;

    /// Stops the running scan. Safe to call when nothing is scanning.
    async fn stop_scan(&self);
}

/// Scans with a local Bluetooth adapter through `btleplug`.
pub struct BtleplugTransport {
    adapter_index: usize,
    central: tokio::sync::Mutex<Option<Adapter>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl BtleplugTransport {
    pub fn new(adapter_index: usize) -> Self {
        Self {
            adapter_index,
            central: tokio::sync::Mutex::new(None),
            pump: Mutex::new(None),
        }
    }

    /// Returns the configured adapter, acquiring it on first use
    async fn central(&self) -> Result<Adapter, TransportError> {
        let mut slot = self.central.lock().await;
        if let Some(central) = slot.as_ref() {
            return Ok(central.clone());
        }

        let manager = Manager::new()
            .await
            .map_err(|e| TransportError::ManagerInit(e.to_string()))?;

        let adapters = manager
            .adapters()
            .await
            .map_err(|e| TransportError::ManagerInit(e.to_string()))?;

        let central = adapters
            .into_iter()
            .nth(self.adapter_index)
            .ok_or(TransportError::NoAdapter {
                index: self.adapter_index,
            })?;

        log::info!("Using Bluetooth adapter #{}", self.adapter_index);
        *slot = Some(central.clone());
        Ok(central)
    }

    fn replace_pump(&self, pump: Option<JoinHandle<()>>) -> Option<JoinHandle<()>> {
        match self.pump.lock() {
            Ok(mut slot) => std::mem::replace(&mut *slot, pump),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), pump),
        }
    }
}

#[async_trait]
impl ScanTransport for BtleplugTransport {
    async fn start_scan(&self, filter: ScanFilter) -> Result<ScanEvents, TransportError> {
        let central = self.central().await?;

        let mut events = central
            .events()
            .await
            .map_err(|e| TransportError::ScanFailed(e.to_string()))?;

        central
            .start_scan(filter)
            .await
            .map_err(|e| TransportError::ScanFailed(e.to_string()))?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let pump_central = central.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    CentralEvent::ManufacturerDataAdvertisement { id, .. } => id,
                    CentralEvent::ServiceDataAdvertisement { id, .. } => id,
                    _ => continue,
                };

                match read_advertisement(&pump_central, &id).await {
                    Ok(Some(advertisement)) => {
                        if sender.send(ScanEvent::Advertisement(advertisement)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        // The peripheral may have vanished between the event and the read.
                        log::debug!("Could not read properties of {:?}: {}", id, e);
                    }
                }
            }
            // Only reached when the adapter closed the stream; stop_scan aborts this task.
            if sender.send(ScanEvent::Error("central event stream closed".to_string())).is_err() {
                log::debug!("Scan receiver already dropped");
            }
        });

        if let Some(previous) = self.replace_pump(Some(pump)) {
            previous.abort();
        }

        log::info!("Bluetooth scan started");
        Ok(receiver)
    }

    async fn stop_scan(&self) {
        let Some(pump) = self.replace_pump(None) else {
            return;
        };
        pump.abort();

        let central = self.central.lock().await.clone();
        if let Some(central) = central {
            if let Err(e) = central.stop_scan().await {
                log::warn!("Failed to stop scan: {}", e);
            }
        }
        log::info!("Bluetooth scan stopped");
    }
}

async fn read_advertisement(
    central: &Adapter,
    id: &RadioId,
) -> Result<Option<Advertisement>, btleplug::Error> {
    let peripheral = central.peripheral(id).await?;
    let Some(props) = peripheral.properties().await? else {
        return Ok(None);
    };

    Ok(Some(Advertisement {
        id: PeripheralId::new(format!("{:?}", id)),
        name: props.local_name,
        manufacturer_data: flatten_manufacturer_data(&props.manufacturer_data),
        service_data: flatten_service_data(&props.service_data),
        rssi: props.rssi,
    }))
}

/// Lays manufacturer data out as it appears on air: little-endian company id
/// followed by its payload, ordered by company id.
fn flatten_manufacturer_data(data: &HashMap<u16, Vec<u8>>) -> Option<Vec<u8>> {
    if data.is_empty() {
        return None;
    }
    let mut companies: Vec<_> = data.iter().collect();
    companies.sort_by_key(|(company, _)| **company);

    let mut bytes = Vec::new();
    for (company, payload) in companies {
        bytes.extend_from_slice(&company.to_le_bytes());
        bytes.extend_from_slice(payload);
    }
    Some(bytes)
}

/// Concatenates service data payloads ordered by service key.
fn flatten_service_data<K: Ord>(data: &HashMap<K, Vec<u8>>) -> Option<Vec<u8>> {
    if data.is_empty() {
        return None;
    }
    let mut services: Vec<_> = data.iter().collect();
    services.sort_by(|a, b| a.0.cmp(b.0));
    Some(services.into_iter().flat_map(|(_, payload)| payload.iter().copied()).collect())
}

#[cfg(test)]
pub mod mock {
    //! In-memory transport that lets tests inject scan events.

    use super::*;

    #[derive(Default)]
    struct MockState {
        sender: Option<mpsc::UnboundedSender<ScanEvent>>,
        starts: usize,
        stops: usize,
        fail_next_start: Option<TransportError>,
    }

    #[derive(Default)]
    pub struct MockTransport {
        state: Mutex<MockState>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Delivers an event to the running scan. Returns false when no scan is running.
        pub fn emit(&self, event: ScanEvent) -> bool {
            let state = self.state.lock().unwrap();
            match &state.sender {
                Some(sender) => sender.send(event).is_ok(),
                None => false,
            }
        }

        pub fn advertise(&self, advertisement: Advertisement) -> bool {
            self.emit(ScanEvent::Advertisement(advertisement))
        }

        /// Ends the running scan's event stream as if the radio went away,
        /// without going through `stop_scan`.
        pub fn close_stream(&self) {
            self.state.lock().unwrap().sender = None;
        }

        pub fn fail_next_start(&self, error: TransportError) {
            self.state.lock().unwrap().fail_next_start = Some(error);
        }

        pub fn is_scanning(&self) -> bool {
            self.state.lock().unwrap().sender.is_some()
        }

        pub fn start_count(&self) -> usize {
            self.state.lock().unwrap().starts
        }

        pub fn stop_count(&self) -> usize {
            self.state.lock().unwrap().stops
        }
    }

    #[async_trait]
    impl ScanTransport for MockTransport {
        async fn start_scan(&self, _filter: ScanFilter) -> Result<ScanEvents, TransportError> {
            let mut state = self.state.lock().unwrap();
            if let Some(error) = state.fail_next_start.take() {
                return Err(error);
            }
            let (sender, receiver) = mpsc::unbounded_channel();
            state.sender = Some(sender);
            state.starts += 1;
            Ok(receiver)
        }

        async fn stop_scan(&self) {
            let mut state = self.state.lock().unwrap();
            state.sender = None;
            state.stops += 1;
        }
    }
}
