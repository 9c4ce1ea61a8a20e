use crate::config::Config;
use crate::manager::SessionHandle;
use crate::peripheral::{format_payload, ListeningSnapshot, PeripheralId, PeripheralRecord};
use crate::permission::{PermissionSet, PermissionState};
use crate::session::{DiscoveryOutcome, SessionState, SessionUpdate};
use crate::ui::styles::{device_button_style, listen_button_style, stop_button_style};
use iced::widget::{button, column, container, row, scrollable, text};
use iced::{Element, Length, Subscription, Task};
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

const PERMISSION_REQUIRED: &str = "Bluetooth permissions are required to scan for devices.";

// Iced Application State
pub struct WolkeMonitor {
    receiver: Receiver<SessionUpdate>,
    session: SessionHandle,
    permission: Arc<PermissionState>,
    config: Config,
    config_path: PathBuf,
    pub state: SessionState,
    pub devices: Vec<PeripheralRecord>,
    pub snapshot: Option<ListeningSnapshot>,
    pub status: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Message {
    Tick,
    GrantAccess,
    ScanDevices,
    Listen(PeripheralId),
    StopListening,
}

impl WolkeMonitor {
    pub fn new(
        receiver: Receiver<SessionUpdate>,
        session: SessionHandle,
        permission: Arc<PermissionState>,
        config: Config,
        config_path: PathBuf,
    ) -> (Self, Task<Message>) {
        let status = if session.is_permitted() {
            None
        } else {
            Some(PERMISSION_REQUIRED.to_string())
        };

        (
            WolkeMonitor {
                receiver,
                session,
                permission,
                config,
                config_path,
                state: SessionState::Idle,
                devices: Vec::new(),
                snapshot: None,
                status,
            },
            Task::none(),
        )
    }

    pub fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::Tick => {
                // Process all pending updates without blocking
                while let Ok(update) = self.receiver.try_recv() {
                    self.apply_update(update);
                }
                Task::none()
            }
            Message::GrantAccess => {
                self.permission.update(PermissionSet::all_granted());
                self.status = None;

                // Remember the grant for the next launch
                self.config.bluetooth_access = true;
                if let Err(e) = self.config.save_to(&self.config_path) {
                    log::warn!("Could not save configuration: {}", e);
                    self.status = Some(e.to_string());
                }
                Task::none()
            }
            Message::ScanDevices => {
                self.status = None;
                if let Err(e) = self.session.begin_discovery() {
                    log::warn!("Could not start scan: {}", e);
                    self.status = Some(e.to_string());
                }
                Task::none()
            }
            Message::Listen(id) => {
                self.status = None;
                if let Err(e) = self.session.begin_listening(id) {
                    log::warn!("Could not start listening: {}", e);
                    self.status = Some(e.to_string());
                }
                Task::none()
            }
            Message::StopListening => {
                if let Err(e) = self.session.stop() {
                    log::warn!("Could not stop session: {}", e);
                    self.status = Some(e.to_string());
                }
                // State will be updated when we receive StateChanged(Idle)
                Task::none()
            }
        }
    }

    /// Mirrors one controller update into the view state
    pub fn apply_update(&mut self, update: SessionUpdate) {
        match update {
            SessionUpdate::StateChanged(state) => {
                match &state {
                    SessionState::Discovering => {
                        self.devices.clear();
                        self.snapshot = None;
                    }
                    SessionState::Listening(_) => {
                        self.snapshot = None;
                    }
                    SessionState::Idle => {
                        if let SessionState::Listening(_) = self.state {
                            self.status = Some("Monitoring stopped.".to_string());
                        }
                        self.snapshot = None;
                    }
                }
                self.state = state;
            }
            SessionUpdate::PeripheralDiscovered(record) => {
                self.devices.push(record);
            }
            SessionUpdate::SnapshotUpdated(snapshot) => {
                self.snapshot = Some(snapshot);
            }
            SessionUpdate::DiscoveryFinished(DiscoveryOutcome::NoResultsAfterTimeout) => {
                self.status = Some("No devices found.".to_string());
            }
            SessionUpdate::DiscoveryFinished(DiscoveryOutcome::Found(records)) => {
                self.status = Some(format!("Scan finished: {} device(s) found.", records.len()));
                self.devices = records;
            }
            SessionUpdate::Error(e) => {
                log::error!("Session error: {}", e);
                self.status = Some(e.to_string());
            }
        }
    }

    pub fn subscription(&self) -> Subscription<Message> {
        iced::time::every(std::time::Duration::from_millis(16)).map(|_| Message::Tick)
    }

    pub fn view(&'_ self) -> Element<'_, Message> {
        let sidebar = self.create_sidebar();

        let main_content = match &self.state {
            SessionState::Listening(target) => self.create_listening_view(target),
            _ => self.create_idle_view(),
        };

        let content = row![sidebar, main_content].spacing(0);

        container(content)
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }

    fn create_sidebar(&self) -> Element<'_, Message> {
        let title = text("Wolke BLE Monitor").size(20);

        let is_scanning = self.state == SessionState::Discovering;
        let scan_button = button(text(if is_scanning {
            "Scanning..."
        } else {
            "Scan for Devices"
        }))
        .on_press_maybe(if is_scanning {
            None
        } else {
            Some(Message::ScanDevices)
        })
        .padding(10);

        let device_list: Element<'_, Message> = if self.devices.is_empty() {
            text("No devices yet. Click 'Scan for Devices' to start.").into()
        } else {
            let devices = self.devices.iter().map(|device| {
                let is_target = self.state == SessionState::Listening(device.id.clone());
                let label = button(text(format!("{}\n{}", device.name, device.id)).size(14))
                    .width(Length::Fill)
                    .padding(10)
                    .style(device_button_style(is_target));
                let listen = button(text("Listen"))
                    .on_press_maybe(if is_target {
                        None
                    } else {
                        Some(Message::Listen(device.id.clone()))
                    })
                    .padding(10)
                    .style(listen_button_style());

                row![label, listen]
                    .spacing(5)
                    .align_y(iced::alignment::Vertical::Center)
                    .into()
            });

            scrollable(column(devices).spacing(5)).into()
        };

        let status = text(self.status.clone().unwrap_or_default()).size(14);

        let mut sidebar_content = column![title, scan_button, device_list, status]
            .spacing(10)
            .padding(20)
            .width(340);

        if !self.session.is_permitted() {
            sidebar_content = sidebar_content.push(
                button(text("Grant Bluetooth Access"))
                    .on_press(Message::GrantAccess)
                    .padding(10)
                    .style(listen_button_style()),
            );
        }

        container(sidebar_content)
            .style(container::bordered_box)
            .width(Length::Fixed(340.0))
            .height(Length::Fill)
            .into()
    }

    fn create_idle_view(&self) -> Element<'_, Message> {
        let message = match self.state {
            SessionState::Discovering => "Scanning for devices...",
            _ => "Select a device from the sidebar to listen to its advertisements",
        };

        container(
            column![text(message).size(24)]
                .width(Length::Fill)
                .align_x(iced::alignment::Horizontal::Center)
        )
        .width(Length::Fill)
        .height(Length::Fill)
        .center(Length::Fill)
        .into()
    }

    fn create_listening_view(&self, target: &PeripheralId) -> Element<'_, Message> {
        let header = text(format!("Listening to {}", target)).size(24);

        let details: Element<'_, Message> = match &self.snapshot {
            Some(snapshot) => column![
                text(format!("Name: {}", snapshot.name.as_deref().unwrap_or("-"))),
                text(format!("Identity: {}", snapshot.id)),
                text(format!(
                    "Manufacturer: {}",
                    format_payload(snapshot.manufacturer_data.as_deref())
                )),
                text(format!(
                    "Service: {}",
                    format_payload(snapshot.service_data.as_deref())
                )),
                text(format!(
                    "RSSI: {}",
                    snapshot
                        .rssi
                        .map(|rssi| format!("{} dBm", rssi))
                        .unwrap_or_else(|| "-".to_string())
                )),
                text(format!("Updated: {}", snapshot.updated_at.format("%H:%M:%S%.3f"))),
            ]
            .spacing(8)
            .into(),
            None => text("Waiting for advertisements...").into(),
        };

        let stop_button = button(text("Stop"))
            .on_press(Message::StopListening)
            .padding(10)
            .style(stop_button_style());

        container(column![header, details, stop_button].spacing(20).padding(20))
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }
}
