// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The member-side cache of the cluster's membership: the last applied
//! snapshot and the locators computed from it.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use silo::concurrency::{broadcast, BroadcastReceiver, BroadcastSender};
use silo::Identity;

use super::types::{MembershipSnapshot, ServiceLocator};

const EVENT_BUFFER: usize = 32;

/// Changes of the cached membership view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    /// A newer snapshot was applied
    Updated {
        /// The new version
        version: u64,
        /// Members in the snapshot
        members: usize,
    },
    /// The cache was dropped, e.g. after re-registration
    Reset,
}

#[derive(Default)]
struct ManagerState {
    version: Option<u64>,
    snapshot: MembershipSnapshot,
    locators: HashMap<Identity, ServiceLocator>,
}

/// Version-gated membership cache
pub struct MembershipManager {
    state: RwLock<ManagerState>,
    events: BroadcastSender<MembershipEvent>,
}

impl Default for MembershipManager {
    fn default() -> Self {
        let (events, _) = broadcast(EVENT_BUFFER);
        Self {
            state: RwLock::new(ManagerState::default()),
            events,
        }
    }
}

impl std::fmt::Debug for MembershipManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("MembershipManager")
            .field("version", &state.version)
            .field("locators", &state.locators.len())
            .finish()
    }
}

impl MembershipManager {
    /// An empty cache
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, ManagerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ManagerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a snapshot if it is strictly newer than the cached one.
    /// Returns [true] if it was applied.
    pub fn apply_snapshot(&self, snapshot: MembershipSnapshot) -> bool {
        let event = {
            let mut state = self.write();
            if state.version.map(|v| snapshot.version <= v).unwrap_or(false) {
                log::trace!(
                    "Ignoring membership snapshot {} (cached {:?})",
                    snapshot.version,
                    state.version
                );
                return false;
            }
            state.locators = snapshot.locators();
            state.version = Some(snapshot.version);
            let members = snapshot.tables.len();
            state.snapshot = snapshot;
            MembershipEvent::Updated {
                version: state.snapshot.version,
                members,
            }
        };
        log::debug!("Applied membership {event:?}");
        let _ = self.events.send(event);
        true
    }

    /// Returns [true] if a snapshot of `version` would be applied
    pub fn is_newer(&self, version: u64) -> bool {
        self.read().version.map(|v| version > v).unwrap_or(true)
    }

    /// Forget the cached view. The next snapshot applies whatever its
    /// version, which is needed when the coordinator restarted and its
    /// versions began again from zero.
    pub fn reset(&self) {
        *self.write() = ManagerState::default();
        let _ = self.events.send(MembershipEvent::Reset);
    }

    /// The cached version, [None] before the first snapshot
    pub fn version(&self) -> Option<u64> {
        self.read().version
    }

    /// The cached snapshot
    pub fn snapshot(&self) -> MembershipSnapshot {
        self.read().snapshot.clone()
    }

    /// Where `identity` lives according to the cache
    pub fn resolve(&self, identity: &Identity) -> Option<ServiceLocator> {
        self.read().locators.get(identity).cloned()
    }

    /// Drop the cached locator of a killed service
    pub fn forget(&self, identity: &Identity) -> bool {
        self.write().locators.remove(identity).is_some()
    }

    /// Number of known services
    pub fn len(&self) -> usize {
        self.read().locators.len()
    }

    /// Returns [true] if no service is known
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Listen for cache changes
    pub fn subscribe(&self) -> BroadcastReceiver<MembershipEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use silo::Address;

    use super::*;
    use crate::membership::types::{MembershipEntry, MembershipRow, MembershipTable};

    fn snapshot(version: u64, services: &[Identity]) -> MembershipSnapshot {
        let address: Address = "127.0.0.1:64001".parse().expect("Invalid address");
        MembershipSnapshot {
            version,
            tables: vec![MembershipTable {
                entry: MembershipEntry::gateway(address),
                version: 1,
                rows: services
                    .iter()
                    .map(|identity| MembershipRow {
                        identity: *identity,
                        service_type: "test.Probe".to_string(),
                        metadata: vec![],
                    })
                    .collect(),
            }],
        }
    }

    #[test]
    fn only_strictly_newer_snapshots_apply() {
        let manager = MembershipManager::new();
        let first = Identity::service();
        let second = Identity::service();

        assert!(manager.is_newer(0));
        assert!(manager.apply_snapshot(snapshot(0, &[first])));
        assert!(manager.resolve(&first).is_some());

        assert!(!manager.apply_snapshot(snapshot(0, &[second])));
        assert!(manager.resolve(&second).is_none());

        assert!(manager.apply_snapshot(snapshot(5, &[second])));
        assert!(!manager.apply_snapshot(snapshot(3, &[first])));
        assert_eq!(Some(5), manager.version());
        assert!(manager.resolve(&first).is_none());
        assert!(manager.resolve(&second).is_some());
    }

    #[test]
    fn reset_accepts_any_version_again() {
        let manager = MembershipManager::new();
        let identity = Identity::service();
        assert!(manager.apply_snapshot(snapshot(9, &[])));
        manager.reset();
        assert_eq!(None, manager.version());
        assert!(manager.apply_snapshot(snapshot(1, &[identity])));
        assert_eq!(1, manager.len());
    }

    #[test]
    fn forgetting_drops_one_locator() {
        let manager = MembershipManager::new();
        let identity = Identity::service();
        manager.apply_snapshot(snapshot(1, &[identity]));
        assert!(manager.forget(&identity));
        assert!(!manager.forget(&identity));
        assert!(manager.is_empty());
    }

    #[silo::concurrency::test]
    async fn subscribers_hear_applied_snapshots() {
        let manager = MembershipManager::new();
        let mut events = manager.subscribe();
        manager.apply_snapshot(snapshot(2, &[Identity::service()]));
        assert_eq!(
            MembershipEvent::Updated {
                version: 2,
                members: 1
            },
            events.recv().await.expect("No event")
        );
    }
}
