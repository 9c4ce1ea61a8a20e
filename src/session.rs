//! # Session Controller Module
//!
//! State machine behind discovery and listening sessions.
//!
//! ```text
//! Idle --begin_discovery--> Discovering --timeout/stop/superseded--> Idle
//! Idle --begin_listening--> Listening   --stop/superseded/error----> Idle
//! Discovering --begin_listening--> Listening    (implicit stop + restart)
//! Listening --begin_discovery--> Discovering    (implicit stop + restart)
//! ```
//!
//! ## Generations
//! Every session is tagged with a number from a shared `Generation` counter.
//! Scan events and timer expiries carry the generation of the session that
//! produced them, and are dropped unless that session is still the active one.
//! `SessionHandle` advances the counter before it enqueues a request, so a
//! superseded session stops mutating state as soon as the call returns.
//!
//! The controller itself is not thread-safe; `SessionManager` owns it and feeds
//! it one message at a time.

use crate::error::{SessionError, TransportError};
use crate::peripheral::{
    DiscoveryRegistry, ListeningSnapshot, PeripheralId, PeripheralRecord, ScanEvent,
};
use crate::permission::PermissionProvider;
use crate::transport::{ScanEvents, ScanTransport};
use btleplug::api::ScanFilter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Discovering,
    Listening(PeripheralId),
}

/// How a discovery window ended when it ran to its timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    /// Final registry contents, in first-seen order
    Found(Vec<PeripheralRecord>),
    NoResultsAfterTimeout,
}

/// Pushed to the display layer as the session progresses.
///
/// `StateChanged` is also sent when a new session starts in the same state
/// it replaces, so receivers can reset what they mirrored from the old one.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    StateChanged(SessionState),
    PeripheralDiscovered(PeripheralRecord),
    SnapshotUpdated(ListeningSnapshot),
    DiscoveryFinished(DiscoveryOutcome),
    Error(SessionError),
}

/// Caller requests, tagged with the generation they were issued under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    BeginDiscovery { generation: u64 },
    BeginListening { generation: u64, target: PeripheralId },
    Stop { generation: u64 },
}

/// Messages produced by the controller's own background tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanSignal {
    Event { generation: u64, event: ScanEvent },
    /// The transport's event stream closed
    Ended { generation: u64 },
    DiscoveryTimeout { generation: u64 },
}

/// Shared session generation counter.
#[derive(Debug, Clone, Default)]
pub struct Generation(Arc<AtomicU64>);

impl Generation {
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Issues a new generation, invalidating every earlier one.
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

struct ActiveScan {
    generation: u64,
    pump: JoinHandle<()>,
    timer: Option<JoinHandle<()>>,
}

impl ActiveScan {
    fn cancel(self) {
        self.pump.abort();
        if let Some(timer) = self.timer {
            timer.abort();
        }
    }
}

pub struct SessionController {
    transport: Arc<dyn ScanTransport>,
    permission: Arc<dyn PermissionProvider>,
    discovery_timeout: Duration,
    state: SessionState,
    registry: DiscoveryRegistry,
    snapshot: Option<ListeningSnapshot>,
    generation: Generation,
    active: Option<ActiveScan>,
    signals: mpsc::UnboundedSender<ScanSignal>,
    updates: Sender<SessionUpdate>,
}

impl SessionController {
    /// Creates an idle controller.
    ///
    /// Returns the controller and the receiver its background tasks report to;
    /// every `ScanSignal` received there must be passed back to `handle_signal`.
    pub fn new(
        transport: Arc<dyn ScanTransport>,
        permission: Arc<dyn PermissionProvider>,
        discovery_timeout: Duration,
        updates: Sender<SessionUpdate>,
    ) -> (Self, mpsc::UnboundedReceiver<ScanSignal>) {
        let (signals, signal_receiver) = mpsc::unbounded_channel();

        let controller = SessionController {
            transport,
            permission,
            discovery_timeout,
            state: SessionState::Idle,
            registry: DiscoveryRegistry::new(),
            snapshot: None,
            generation: Generation::default(),
            active: None,
            signals,
            updates,
        };

        (controller, signal_receiver)
    }

    pub fn generation(&self) -> &Generation {
        &self.generation
    }

    pub async fn handle_request(&mut self, request: Request) -> Result<(), SessionError> {
        match request {
            Request::BeginDiscovery { generation } => self.start_discovery(generation).await,
            Request::BeginListening { generation, target } => {
                self.start_listening(generation, target).await
            }
            Request::Stop { generation } => {
                self.apply_stop(generation).await;
                Ok(())
            }
        }
    }

    pub async fn handle_signal(&mut self, signal: ScanSignal) {
        match signal {
            ScanSignal::Event { generation, event } => {
                if self.is_active(generation) {
                    self.handle_scan_event(event).await;
                } else {
                    log::trace!("Dropping event from stale session {}", generation);
                }
            }
            ScanSignal::Ended { generation } => {
                if self.is_active(generation) {
                    self.abort(TransportError::ScanAborted(
                        "scan event stream ended unexpectedly".to_string(),
                    ))
                    .await;
                }
            }
            ScanSignal::DiscoveryTimeout { generation } => {
                if self.is_active(generation) && self.state == SessionState::Discovering {
                    self.finish_discovery().await;
                } else {
                    log::trace!("Ignoring timeout of stale session {}", generation);
                }
            }
        }
    }

    /// Stops whatever is running. Used when the owning loop shuts down.
    pub async fn shutdown(&mut self) {
        self.teardown().await;
        self.set_state(SessionState::Idle);
    }

    /// Sends an update to the display layer. A missing receiver is not an error.
    pub fn notify(&self, update: SessionUpdate) {
        if self.updates.send(update).is_err() {
            log::debug!("Session update dropped: no receiver");
        }
    }

    fn ensure_permission(&self) -> Result<(), SessionError> {
        if self.permission.is_granted() {
            Ok(())
        } else {
            log::warn!("Scan refused: Bluetooth permissions not granted");
            Err(SessionError::PermissionDenied)
        }
    }

    fn is_superseded(&self, generation: u64) -> bool {
        generation != self.generation.current()
    }

    fn is_active(&self, generation: u64) -> bool {
        !self.is_superseded(generation)
            && self
                .active
                .as_ref()
                .is_some_and(|active| active.generation == generation)
    }

    async fn start_discovery(&mut self, generation: u64) -> Result<(), SessionError> {
        if self.is_superseded(generation) {
            log::debug!("Discovery request {} superseded before it started", generation);
            return Ok(());
        }
        if let Err(e) = self.ensure_permission() {
            // A previous session is already invalidated by this generation.
            self.shutdown().await;
            return Err(e);
        }

        self.teardown().await;
        self.registry.clear();
        self.enter_state(SessionState::Discovering);
        log::info!("Starting discovery for {:?}", self.discovery_timeout);

        if let Some(events) = self.start_transport().await {
            let pump = self.spawn_pump(generation, events);
            let timer = self.spawn_timer(generation);
            self.active = Some(ActiveScan {
                generation,
                pump,
                timer: Some(timer),
            });
        }
        Ok(())
    }

    async fn start_listening(
        &mut self,
        generation: u64,
        target: PeripheralId,
    ) -> Result<(), SessionError> {
        if self.is_superseded(generation) {
            log::debug!("Listening request {} superseded before it started", generation);
            return Ok(());
        }
        if let Err(e) = self.ensure_permission() {
            self.shutdown().await;
            return Err(e);
        }

        self.teardown().await;
        log::info!("Listening to {}", target);
        self.enter_state(SessionState::Listening(target));

        if let Some(events) = self.start_transport().await {
            let pump = self.spawn_pump(generation, events);
            self.active = Some(ActiveScan {
                generation,
                pump,
                timer: None,
            });
        }
        Ok(())
    }

    async fn apply_stop(&mut self, generation: u64) {
        if self.is_superseded(generation) {
            log::debug!("Stop request {} superseded", generation);
            return;
        }
        if self.state == SessionState::Idle {
            return;
        }
        log::info!("Stopping session");
        self.shutdown().await;
    }

    /// Starts an unfiltered scan. On failure the session is aborted and `None` returned.
    async fn start_transport(&mut self) -> Option<ScanEvents> {
        match self.transport.start_scan(ScanFilter::default()).await {
            Ok(events) => Some(events),
            Err(e) => {
                self.abort(e).await;
                None
            }
        }
    }

    async fn handle_scan_event(&mut self, event: ScanEvent) {
        let advertisement = match event {
            ScanEvent::Advertisement(advertisement) => advertisement,
            ScanEvent::Error(message) => {
                self.abort(TransportError::ScanAborted(message)).await;
                return;
            }
        };

        match &self.state {
            SessionState::Discovering => {
                if let Some(record) = self.registry.insert(&advertisement) {
                    let record = record.clone();
                    log::info!("Discovered {} ({})", record.name, record.id);
                    self.notify(SessionUpdate::PeripheralDiscovered(record));
                }
            }
            SessionState::Listening(target) => {
                if advertisement.id == *target {
                    let snapshot = ListeningSnapshot::from_advertisement(advertisement);
                    log::debug!("Payload update from {}", snapshot.id);
                    self.snapshot = Some(snapshot.clone());
                    self.notify(SessionUpdate::SnapshotUpdated(snapshot));
                }
            }
            SessionState::Idle => {}
        }
    }

    async fn finish_discovery(&mut self) {
        self.teardown().await;
        self.set_state(SessionState::Idle);

        let outcome = if self.registry.is_empty() {
            log::info!("Discovery finished: no devices found");
            DiscoveryOutcome::NoResultsAfterTimeout
        } else {
            log::info!("Discovery finished: {} device(s)", self.registry.len());
            DiscoveryOutcome::Found(self.registry.records().to_vec())
        };
        self.notify(SessionUpdate::DiscoveryFinished(outcome));
    }

    async fn abort(&mut self, error: TransportError) {
        log::error!("Session aborted: {}", error);
        self.teardown().await;
        self.set_state(SessionState::Idle);
        self.notify(SessionUpdate::Error(error.into()));
    }

    /// Cancels background tasks, stops the radio and drops the snapshot.
    /// The registry is kept as the last known list.
    async fn teardown(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel();
            self.transport.stop_scan().await;
        }
        self.snapshot = None;
    }

    /// Starts a new session in `state`, announcing it even if the state is unchanged.
    fn enter_state(&mut self, state: SessionState) {
        log::debug!("Session state {:?} -> {:?} (new session)", self.state, state);
        self.state = state.clone();
        self.notify(SessionUpdate::StateChanged(state));
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            log::debug!("Session state {:?} -> {:?}", self.state, state);
            self.state = state.clone();
            self.notify(SessionUpdate::StateChanged(state));
        }
    }

    fn spawn_pump(&self, generation: u64, mut events: ScanEvents) -> JoinHandle<()> {
        let signals = self.signals.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if signals.send(ScanSignal::Event { generation, event }).is_err() {
                    log::debug!("Scan events of session {} dropped: controller gone", generation);
                    return;
                }
            }
            if signals.send(ScanSignal::Ended { generation }).is_err() {
                log::debug!("Scan end of session {} dropped: controller gone", generation);
            }
        })
    }

    fn spawn_timer(&self, generation: u64) -> JoinHandle<()> {
        let signals = self.signals.clone();
        let deadline = tokio::time::Instant::now() + self.discovery_timeout;
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if signals.send(ScanSignal::DiscoveryTimeout { generation }).is_err() {
                log::debug!("Timeout of session {} dropped: controller gone", generation);
            }
        })
    }
}
