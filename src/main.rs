// Hide console window on Windows in release builds
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod app;
mod config;
mod error;
mod manager;
mod peripheral;
mod permission;
mod session;
mod transport;
mod ui;

use app::WolkeMonitor;
use config::Config;
use iced::Theme;
use manager::SessionManager;
use permission::PermissionState;
use session::SessionUpdate;
use std::sync::mpsc;
use std::sync::Arc;
use transport::BtleplugTransport;

fn main() -> iced::Result {
    let config_path = Config::default_path();
    let (config, config_error) = match Config::load_from(&config_path) {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    // Initialize logging
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_filter.as_str()),
    )
    .init();

    if let Some(e) = config_error {
        log::warn!("Using default configuration: {}", e);
    }

    // Create a channel for session updates flowing to the UI thread
    let (sender, receiver) = mpsc::channel::<SessionUpdate>();

    let permission = Arc::new(PermissionState::from_access_flag(config.bluetooth_access));
    let transport = Arc::new(BtleplugTransport::new(config.adapter_index));
    let (manager, session) = SessionManager::new(
        transport,
        permission.clone(),
        config.discovery_timeout(),
        sender,
    );

    // Spawn a thread to own the session controller
    std::thread::spawn(move || {
        manager.run();
    });

    iced::application(
        "Wolke BLE Monitor",
        WolkeMonitor::update,
        WolkeMonitor::view,
    )
    .subscription(WolkeMonitor::subscription)
    .theme(|_| Theme::Dark)
    .window_size((900.0, 600.0))
    .run_with(move || WolkeMonitor::new(receiver, session, permission, config, config_path))
}
