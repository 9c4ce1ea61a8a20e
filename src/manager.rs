//! # Session Manager Module
//!
//! Runs the session controller behind a single command channel so that caller
//! requests, scan events and timer expiries are applied one at a time.
//!
//! ## Key Components
//! - `SessionManager`: Owns the controller and processes requests and scan signals
//! - `SessionHandle`: Cloneable caller surface used by the display layer
//!
//! Permission is checked on the caller's side before anything is queued, so
//! `PermissionDenied` comes back from the begin call itself. Everything else
//! (transport errors, discovery results) arrives on the update channel.

use crate::error::SessionError;
use crate::peripheral::PeripheralId;
use crate::permission::PermissionProvider;
use crate::session::{
    Generation, Request, ScanSignal, SessionController, SessionUpdate,
};
use crate::transport::ScanTransport;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

/// Manages the lifecycle of discovery and listening sessions.
///
/// Runs in a dedicated thread with its own Tokio runtime to avoid blocking
/// the UI thread.
pub struct SessionManager {
    controller: SessionController,
    requests: mpsc::UnboundedReceiver<Request>,
    signals: mpsc::UnboundedReceiver<ScanSignal>,
}

impl SessionManager {
    /// Creates a new SessionManager.
    ///
    /// Returns the manager and a handle for issuing requests from the UI thread.
    pub fn new(
        transport: Arc<dyn ScanTransport>,
        permission: Arc<dyn PermissionProvider>,
        discovery_timeout: Duration,
        updates: Sender<SessionUpdate>,
    ) -> (Self, SessionHandle) {
        let (request_sender, requests) = mpsc::unbounded_channel();
        let (controller, signals) = SessionController::new(
            transport,
            permission.clone(),
            discovery_timeout,
            updates,
        );

        let handle = SessionHandle {
            requests: request_sender,
            generation: controller.generation().clone(),
            permission,
        };

        let manager = SessionManager {
            controller,
            requests,
            signals,
        };

        (manager, handle)
    }

    /// Runs the session loop on a fresh Tokio runtime.
    ///
    /// This should be called in a spawned thread. It will block until every
    /// `SessionHandle` has been dropped.
    pub fn run(self) {
        let rt = match Runtime::new() {
            Ok(runtime) => runtime,
            Err(e) => {
                log::error!("Failed to create async runtime: {}", e);
                self.controller
                    .notify(SessionUpdate::Error(SessionError::ControllerStopped));
                return;
            }
        };

        rt.block_on(self.event_loop());
    }

    /// Processes requests and scan signals until the request channel closes.
    pub async fn event_loop(mut self) {
        loop {
            tokio::select! {
                request = self.requests.recv() => {
                    let Some(request) = request else {
                        break;
                    };
                    log::debug!("Session manager: {:?}", request);
                    if let Err(e) = self.controller.handle_request(request).await {
                        self.controller.notify(SessionUpdate::Error(e));
                    }
                }
                Some(signal) = self.signals.recv() => {
                    self.controller.handle_signal(signal).await;
                }
            }
        }

        log::info!("Session manager: Request channel closed, shutting down");
        self.controller.shutdown().await;
    }
}

/// Caller side of the session manager.
#[derive(Clone)]
pub struct SessionHandle {
    requests: mpsc::UnboundedSender<Request>,
    generation: Generation,
    permission: Arc<dyn PermissionProvider>,
}

impl SessionHandle {
    /// Starts a time-boxed discovery session, replacing whatever is running.
    pub fn begin_discovery(&self) -> Result<(), SessionError> {
        self.ensure_permission()?;
        let generation = self.generation.advance();
        self.send(Request::BeginDiscovery { generation })
    }

    /// Starts listening to `target`, replacing whatever is running.
    pub fn begin_listening(&self, target: PeripheralId) -> Result<(), SessionError> {
        self.ensure_permission()?;
        let generation = self.generation.advance();
        self.send(Request::BeginListening { generation, target })
    }

    /// Stops the active session, if any.
    pub fn stop(&self) -> Result<(), SessionError> {
        let generation = self.generation.advance();
        self.send(Request::Stop { generation })
    }

    pub fn is_permitted(&self) -> bool {
        self.permission.is_granted()
    }

    fn ensure_permission(&self) -> Result<(), SessionError> {
        if self.permission.is_granted() {
            Ok(())
        } else {
            log::warn!("Scan refused: Bluetooth permissions not granted");
            Err(SessionError::PermissionDenied)
        }
    }

    fn send(&self, request: Request) -> Result<(), SessionError> {
        self.requests
            .send(request)
            .map_err(|_| SessionError::ControllerStopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peripheral::Advertisement;
    use crate::permission::{PermissionSet, PermissionState};
    use crate::session::{DiscoveryOutcome, SessionState};
    use crate::transport::mock::MockTransport;
    use std::sync::mpsc::{self as std_mpsc, Receiver};
    use tokio::task::JoinHandle;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn setup(
        granted: bool,
    ) -> (
        Arc<MockTransport>,
        Arc<PermissionState>,
        SessionHandle,
        Receiver<SessionUpdate>,
        JoinHandle<()>,
    ) {
        let transport = Arc::new(MockTransport::new());
        let permission = Arc::new(PermissionState::from_access_flag(granted));
        let (sender, receiver) = std_mpsc::channel();
        let (manager, handle) =
            SessionManager::new(transport.clone(), permission.clone(), TIMEOUT, sender);
        let task = tokio::spawn(manager.event_loop());
        (transport, permission, handle, receiver, task)
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_permission_denied_is_synchronous() {
        let (transport, permission, handle, updates, _task) = setup(false);

        assert_eq!(handle.begin_discovery(), Err(SessionError::PermissionDenied));
        assert_eq!(
            handle.begin_listening("A".into()),
            Err(SessionError::PermissionDenied)
        );
        settle().await;
        assert_eq!(transport.start_count(), 0);
        assert!(updates.try_recv().is_err());

        permission.update(PermissionSet::all_granted());
        assert!(handle.begin_discovery().is_ok());
        settle().await;
        assert_eq!(transport.start_count(), 1);
    }

    #[tokio::test]
    async fn test_discovery_then_listening_through_handle() {
        let (transport, _permission, handle, updates, _task) = setup(true);

        handle.begin_discovery().unwrap();
        settle().await;
        transport.advertise(Advertisement::new("A").with_name("Sensor1"));
        transport.advertise(Advertisement::new("A").with_name("Sensor1"));
        settle().await;

        // Queued on the discovery scan, never processed before the switch.
        transport.advertise(Advertisement::new("C").with_name("Sensor2"));
        handle.begin_listening("A".into()).unwrap();
        settle().await;
        transport.advertise(
            Advertisement::new("A")
                .with_name("Sensor1")
                .with_manufacturer_data(vec![0xCA, 0xFE]),
        );
        settle().await;

        let updates: Vec<_> = updates.try_iter().collect();
        let discovered: Vec<_> = updates
            .iter()
            .filter_map(|u| match u {
                SessionUpdate::PeripheralDiscovered(r) => Some(r.id.to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(discovered, vec!["A"]);
        assert!(updates.contains(&SessionUpdate::StateChanged(SessionState::Listening(
            "A".into()
        ))));
        assert!(updates.iter().any(|u| matches!(
            u,
            SessionUpdate::SnapshotUpdated(s) if s.manufacturer_data == Some(vec![0xCA, 0xFE])
        )));
    }

    #[tokio::test]
    async fn test_restarted_discovery_rebuilds_list_without_duplicates() {
        let (transport, _permission, handle, updates, _task) = setup(true);

        handle.begin_discovery().unwrap();
        settle().await;
        transport.advertise(Advertisement::new("A").with_name("Sensor1"));
        settle().await;

        handle.begin_discovery().unwrap();
        settle().await;
        transport.advertise(Advertisement::new("A").with_name("Sensor1"));
        transport.advertise(Advertisement::new("C").with_name("Sensor2"));
        settle().await;

        // Mirror the list the way a display would: reset on every new discovery.
        let mut seen: Vec<String> = Vec::new();
        for update in updates.try_iter() {
            match update {
                SessionUpdate::StateChanged(SessionState::Discovering) => seen.clear(),
                SessionUpdate::PeripheralDiscovered(record) => seen.push(record.id.to_string()),
                _ => {}
            }
        }
        assert_eq!(seen, vec!["A", "C"]);
    }

    #[tokio::test]
    async fn test_stop_twice_is_harmless() {
        let (transport, _permission, handle, updates, _task) = setup(true);

        handle.begin_listening("A".into()).unwrap();
        settle().await;
        handle.stop().unwrap();
        handle.stop().unwrap();
        settle().await;

        assert!(!transport.is_scanning());
        let states: Vec<_> = updates
            .try_iter()
            .filter_map(|u| match u {
                SessionUpdate::StateChanged(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![SessionState::Listening("A".into()), SessionState::Idle]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_auto_stops() {
        let (transport, _permission, handle, updates, _task) = setup(true);

        handle.begin_discovery().unwrap();
        settle().await;
        assert!(transport.is_scanning());

        tokio::time::advance(TIMEOUT).await;
        settle().await;

        assert!(!transport.is_scanning());
        let updates: Vec<_> = updates.try_iter().collect();
        assert_eq!(
            updates.last(),
            Some(&SessionUpdate::DiscoveryFinished(
                DiscoveryOutcome::NoResultsAfterTimeout
            ))
        );
    }

    #[tokio::test]
    async fn test_transport_error_returns_to_idle() {
        let (transport, _permission, handle, updates, _task) = setup(true);

        handle.begin_discovery().unwrap();
        settle().await;
        transport.emit(crate::peripheral::ScanEvent::Error("hci0 down".to_string()));
        settle().await;

        let updates: Vec<_> = updates.try_iter().collect();
        let errors = updates
            .iter()
            .filter(|u| matches!(u, SessionUpdate::Error(SessionError::Transport(_))))
            .count();
        assert_eq!(errors, 1);
        assert_eq!(
            updates.last(),
            Some(&SessionUpdate::Error(SessionError::Transport(
                crate::error::TransportError::ScanAborted("hci0 down".to_string())
            )))
        );

        handle.begin_discovery().unwrap();
        settle().await;
        assert_eq!(transport.start_count(), 2);
    }

    #[tokio::test]
    async fn test_loop_stops_scan_when_handles_dropped() {
        let (transport, _permission, handle, _updates, task) = setup(true);

        handle.begin_listening("A".into()).unwrap();
        settle().await;
        assert!(transport.is_scanning());

        drop(handle);
        task.await.unwrap();
        assert!(!transport.is_scanning());
    }

    #[tokio::test]
    async fn test_handle_reports_stopped_controller() {
        let (_transport, _permission, handle, _updates, task) = setup(true);
        task.abort();
        let _ = task.await;

        assert_eq!(handle.stop(), Err(SessionError::ControllerStopped));
    }
}
