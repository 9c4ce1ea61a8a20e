//! # Radio Permission Module
//!
//! The session controller never touches the radio unless every capability it
//! depends on has been granted. Platforms report permissions per capability;
//! anything short of a full grant counts as denied.

use std::collections::BTreeMap;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    BluetoothScan,
    BluetoothConnect,
    Location,
}

impl Capability {
    /// Capabilities required before a scan may start
    pub fn required() -> [Capability; 3] {
        [
            Capability::BluetoothScan,
            Capability::BluetoothConnect,
            Capability::Location,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

/// Per-capability permission results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet {
    statuses: BTreeMap<Capability, PermissionStatus>,
}

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every required capability granted
    pub fn all_granted() -> Self {
        Self::uniform(PermissionStatus::Granted)
    }

    /// Every required capability denied
    pub fn all_denied() -> Self {
        Self::uniform(PermissionStatus::Denied)
    }

    fn uniform(status: PermissionStatus) -> Self {
        let mut set = Self::new();
        for capability in Capability::required() {
            set.set(capability, status);
        }
        set
    }

    pub fn set(&mut self, capability: Capability, status: PermissionStatus) {
        self.statuses.insert(capability, status);
    }

    /// True only when at least one capability was reported and all are granted.
    pub fn is_fully_granted(&self) -> bool {
        !self.statuses.is_empty()
            && self
                .statuses
                .values()
                .all(|status| *status == PermissionStatus::Granted)
    }
}

/// Source of permission state consulted before any scan starts.
pub trait PermissionProvider: Send + Sync {
    fn permissions(&self) -> PermissionSet;

    fn is_granted(&self) -> bool {
        self.permissions().is_fully_granted()
    }
}

/// Permission state that can be updated while the controller is running.
#[derive(Debug, Default)]
pub struct PermissionState {
    current: RwLock<PermissionSet>,
}

impl PermissionState {
    pub fn new(initial: PermissionSet) -> Self {
        Self {
            current: RwLock::new(initial),
        }
    }

    /// Seeds the state from the `bluetooth_access` config switch
    pub fn from_access_flag(granted: bool) -> Self {
        if granted {
            Self::new(PermissionSet::all_granted())
        } else {
            Self::new(PermissionSet::all_denied())
        }
    }

    pub fn update(&self, permissions: PermissionSet) {
        match self.current.write() {
            Ok(mut current) => *current = permissions,
            Err(poisoned) => *poisoned.into_inner() = permissions,
        }
        log::info!("Permission state updated");
    }
}

impl PermissionProvider for PermissionState {
    fn permissions(&self) -> PermissionSet {
        match self.current.read() {
            Ok(current) => current.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_set_is_denied() {
        assert!(!PermissionSet::new().is_fully_granted());
    }

    #[test]
    fn test_partial_grant_is_denied() {
        let mut set = PermissionSet::all_granted();
        set.set(Capability::Location, PermissionStatus::Denied);
        assert!(!set.is_fully_granted());

        set.set(Capability::Location, PermissionStatus::Granted);
        assert!(set.is_fully_granted());
    }

    #[test]
    fn test_full_grant() {
        assert!(PermissionSet::all_granted().is_fully_granted());
        assert!(!PermissionSet::all_denied().is_fully_granted());
    }

    #[test]
    fn test_permission_state_update() {
        let state = PermissionState::from_access_flag(false);
        assert!(!state.is_granted());

        state.update(PermissionSet::all_granted());
        assert!(state.is_granted());
    }
}
