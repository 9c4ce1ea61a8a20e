//! # Error Types Module
//!
//! Centralized error handling for Wolke Monitor.
//! Provides custom error types for each layer with proper context and error chaining.
//!
//! ## Error Types
//! - `ConfigError`: Configuration file I/O and parsing errors
//! - `TransportError`: Bluetooth adapter and scan failures reported by the radio layer
//! - `SessionError`: What a caller of the session controller gets to see
//!
//! ## Usage Examples
//! ```rust
//! // Config module uses ConfigError
//! pub fn load() -> Result<Config, ConfigError> { ... }
//!
//! // Transport adapters use TransportError
//! async fn start_scan(&self, filter: ScanFilter) -> Result<ScanEvents, TransportError> { ... }
//!
//! // The session handle surfaces SessionError
//! pub fn begin_discovery(&self) -> Result<(), SessionError> { ... }
//! ```
//!
//! "No results after timeout" is deliberately not an error here: it is a normal
//! outcome of a discovery session and travels as `DiscoveryOutcome`.

use std::fmt;

/// Errors that can occur during configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read config file
    ReadFailed(std::io::Error),
    /// Failed to write config file
    WriteFailed(std::io::Error),
    /// Failed to parse config file
    ParseFailed(toml::de::Error),
    /// Failed to serialize config
    SerializeFailed(toml::ser::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ReadFailed(e) => {
                write!(f, "Failed to read config file: {}", e)
            }
            ConfigError::WriteFailed(e) => {
                write!(f, "Failed to write config file: {}", e)
            }
            ConfigError::ParseFailed(e) => {
                write!(f, "Failed to parse config file: {}", e)
            }
            ConfigError::SerializeFailed(e) => {
                write!(f, "Failed to serialize config: {}", e)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadFailed(e) => Some(e),
            ConfigError::WriteFailed(e) => Some(e),
            ConfigError::ParseFailed(e) => Some(e),
            ConfigError::SerializeFailed(e) => Some(e),
        }
    }
}

/// Errors reported by the radio transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Bluetooth manager initialization failed
    ManagerInit(String),
    /// No Bluetooth adapter at the configured index
    NoAdapter { index: usize },
    /// Scan could not be started
    ScanFailed(String),
    /// Scan was running and the radio reported a failure
    ScanAborted(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::ManagerInit(msg) => {
                write!(f, "Failed to initialize Bluetooth manager: {}", msg)
            }
            TransportError::NoAdapter { index } => {
                write!(
                    f,
                    "No Bluetooth adapter found at index {}. Please ensure Bluetooth is enabled.",
                    index
                )
            }
            TransportError::ScanFailed(msg) => {
                write!(f, "Failed to start scan: {}", msg)
            }
            TransportError::ScanAborted(msg) => {
                write!(f, "Scan aborted: {}", msg)
            }
        }
    }
}

impl std::error::Error for TransportError {}

/// Errors surfaced to callers of the session controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Radio access has not been fully granted; no scan was attempted
    PermissionDenied,
    /// The active session was aborted by the transport
    Transport(TransportError),
    /// The controller loop is no longer running
    ControllerStopped,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::PermissionDenied => {
                write!(f, "Bluetooth permissions are required to scan for devices")
            }
            SessionError::Transport(e) => {
                write!(f, "Transport error: {}", e)
            }
            SessionError::ControllerStopped => {
                write!(f, "Session controller is not running")
            }
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        SessionError::Transport(e)
    }
}
