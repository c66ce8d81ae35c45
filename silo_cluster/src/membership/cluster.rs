// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The coordinator: keeps one table per live gateway member, stamps every
//! change with a new version and tells the members about it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use dashmap::DashMap;
use futures::future::join_all;

use silo::concurrency::JoinHandle;
use silo::{Address, Addressable, CallErr, Identity, ServiceContract, ShutdownSignal};

use super::contracts::{
    ClusterMembership, GatewayMembership, GatewayMembershipContract, GatewayMembershipReference,
};
use super::types::{MembershipEntry, MembershipSnapshot, MembershipTable, GATEWAY_MEMBERSHIP};
use crate::message_center::MessageCenter;
use crate::net::ConnectionEvent;
use crate::reference::SystemTarget;

/// The cluster membership system target
pub struct ClusterMembershipService {
    myself: Weak<ClusterMembershipService>,
    center: MessageCenter,
    tables: RwLock<HashMap<Address, MembershipTable>>,
    gateways: DashMap<Address, GatewayMembershipReference>,
    version: AtomicU64,
}

impl std::fmt::Debug for ClusterMembershipService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterMembershipService")
            .field("version", &self.version())
            .field("members", &self.members())
            .finish()
    }
}

impl ClusterMembershipService {
    /// A coordinator with no members, at version 0
    pub fn new(center: MessageCenter) -> Arc<Self> {
        Arc::new_cyclic(|myself| Self {
            myself: myself.clone(),
            center,
            tables: RwLock::new(HashMap::new()),
            gateways: DashMap::new(),
            version: AtomicU64::new(0),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Address, MembershipTable>> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Address, MembershipTable>> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// The current membership version
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Addresses of the registered members
    pub fn members(&self) -> Vec<Address> {
        let mut members = self.read().keys().copied().collect::<Vec<_>>();
        members.sort();
        members
    }

    /// Point-in-time copy of every table and the version
    pub fn snapshot(&self) -> MembershipSnapshot {
        let tables = self.read();
        Self::snapshot_of(&tables, self.version())
    }

    fn snapshot_of(tables: &HashMap<Address, MembershipTable>, version: u64) -> MembershipSnapshot {
        let mut tables = tables.values().cloned().collect::<Vec<_>>();
        tables.sort_by_key(|table| table.entry.address);
        MembershipSnapshot { version, tables }
    }

    /// Must be called with the tables write lock held so versions follow the
    /// order of table changes
    fn bump(&self) -> u64 {
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn gateway(&self, address: Address) -> GatewayMembershipReference {
        self.gateways
            .entry(address)
            .or_insert_with(|| {
                GatewayMembershipContract::reference(Arc::new(SystemTarget::new(
                    self.center.clone(),
                    address,
                    GATEWAY_MEMBERSHIP,
                )))
            })
            .value()
            .clone()
    }

    /// Tell every member except `except` about `version`. Failures are
    /// logged and never stop the fan-out.
    async fn notify(&self, version: u64, except: Option<Address>) {
        let targets = self
            .members()
            .into_iter()
            .filter(|address| Some(*address) != except)
            .map(|address| (address, self.gateway(address)))
            .collect::<Vec<_>>();
        join_all(targets.iter().map(|(address, gateway)| async move {
            if let Err(err) = gateway.membership_table_changed(version).await {
                log::warn!("Failed to notify {address} of membership version {version}: {err}");
            }
        }))
        .await;
    }

    fn notify_in_background(&self, version: u64, except: Option<Address>) {
        if let Some(this) = self.myself.upgrade() {
            silo::concurrency::spawn(async move { this.notify(version, except).await });
        }
    }

    /// Drop a member's table. Returns [false] if it was not registered.
    pub fn remove_member(&self, address: &Address) -> bool {
        let version = {
            let mut tables = self.write();
            if tables.remove(address).is_none() {
                return false;
            }
            self.bump()
        };
        self.gateways.remove(address);
        log::info!("Member {address} left, membership version {version}");
        self.notify_in_background(version, None);
        true
    }

    /// Remove members whose connection to this silo drops, until `shutdown`
    pub fn watch_disconnects(self: &Arc<Self>, shutdown: ShutdownSignal) -> JoinHandle<()> {
        let this = self.clone();
        let mut events = self.center.connections().subscribe();
        silo::concurrency::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(ConnectionEvent::Disconnected(address)) => {
                        if this.remove_member(&address) {
                            log::info!("Connection to member {address} dropped, removed its table");
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        log::warn!("Missed {missed} connection events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Addressable for ClusterMembershipService {}

#[async_trait::async_trait]
impl ClusterMembership for ClusterMembershipService {
    async fn alive(&self, entry: MembershipEntry) -> Result<bool, CallErr> {
        let registered = self.read().contains_key(&entry.address);
        Ok(registered
            && (self.center.is_local(&entry.address)
                || self.center.connections().is_connected(&entry.address)))
    }

    async fn register(&self, table: MembershipTable) -> Result<MembershipSnapshot, CallErr> {
        let address = table.entry.address;
        let rows = table.rows.len();
        let (version, snapshot) = {
            let mut tables = self.write();
            tables.insert(address, table);
            let version = self.bump();
            (version, Self::snapshot_of(&tables, version))
        };
        // reconnecting members get a fresh reference
        self.gateways.remove(&address);
        self.gateway(address);
        log::info!(
            "Member {address} registered with {rows} service(s), membership version {version}"
        );
        self.notify_in_background(version, Some(address));
        Ok(snapshot)
    }

    async fn unregister(&self, entry: MembershipEntry) -> Result<(), CallErr> {
        if !self.remove_member(&entry.address) {
            log::debug!("Unregister of unknown member {}", entry.address);
        }
        Ok(())
    }

    async fn table_changed(&self, table: MembershipTable) -> Result<(), CallErr> {
        let address = table.entry.address;
        let version = {
            let mut tables = self.write();
            match tables.get_mut(&address) {
                Some(current) => {
                    *current = table;
                    self.bump()
                }
                None => {
                    log::warn!("Table change from unregistered member {address} ignored");
                    return Ok(());
                }
            }
        };
        log::debug!("Member {address} changed its table, membership version {version}");
        self.notify_in_background(version, None);
        Ok(())
    }

    async fn create_snapshot(&self) -> Result<MembershipSnapshot, CallErr> {
        Ok(self.snapshot())
    }

    async fn kill_service(&self, identity: Identity) -> Result<(), CallErr> {
        let targets = self
            .members()
            .into_iter()
            .map(|address| (address, self.gateway(address)))
            .collect::<Vec<_>>();
        log::info!("Killing {identity} across {} member(s)", targets.len());
        join_all(targets.iter().map(|(address, gateway)| async move {
            if let Err(err) = gateway.kill_service(identity).await {
                log::warn!("Failed to forward kill of {identity} to {address}: {err}");
            }
        }))
        .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use silo::concurrency::Duration;

    use super::*;
    use crate::common_test::{networked_center, periodic_check};
    use crate::membership::types::MembershipRow;

    fn table(address: Address, services: usize) -> MembershipTable {
        MembershipTable {
            entry: MembershipEntry::gateway(address),
            version: 1,
            rows: (0..services)
                .map(|_| MembershipRow {
                    identity: Identity::service(),
                    service_type: "test.Probe".to_string(),
                    metadata: vec![],
                })
                .collect(),
        }
    }

    fn address(port: u16) -> Address {
        format!("127.0.0.1:{port}").parse().expect("Invalid address")
    }

    #[silo::concurrency::test]
    async fn register_bumps_the_version_once_and_returns_the_table() {
        let coordinator = ClusterMembershipService::new(networked_center(|o| o));
        assert_eq!(0, coordinator.version());

        let registered = table(address(48001), 2);
        let snapshot = coordinator
            .register(registered.clone())
            .await
            .expect("register failed");
        assert_eq!(1, snapshot.version);
        assert_eq!(1, coordinator.version());
        assert_eq!(Some(&registered), snapshot.table(&address(48001)));

        // re-registration replaces the table in place
        let snapshot = coordinator
            .register(table(address(48001), 0))
            .await
            .expect("register failed");
        assert_eq!(2, snapshot.version);
        assert_eq!(1, snapshot.tables.len());
        assert!(snapshot.tables[0].rows.is_empty());
    }

    #[silo::concurrency::test]
    async fn changes_and_removals_bump_the_version() {
        let coordinator = ClusterMembershipService::new(networked_center(|o| o));
        coordinator.register(table(address(48002), 0)).await.expect("register failed");

        coordinator
            .table_changed(table(address(48002), 3))
            .await
            .expect("table_changed failed");
        assert_eq!(2, coordinator.version());
        assert_eq!(3, coordinator.snapshot().tables[0].rows.len());

        // unknown members cannot change tables
        coordinator
            .table_changed(table(address(48003), 1))
            .await
            .expect("table_changed failed");
        assert_eq!(2, coordinator.version());

        coordinator
            .unregister(MembershipEntry::gateway(address(48002)))
            .await
            .expect("unregister failed");
        assert_eq!(3, coordinator.version());
        assert!(coordinator.members().is_empty());

        coordinator
            .unregister(MembershipEntry::gateway(address(48002)))
            .await
            .expect("unregister failed");
        assert_eq!(3, coordinator.version());
    }

    #[silo::concurrency::test]
    async fn members_need_a_live_connection_to_be_alive() {
        let center = networked_center(|o| o);
        let own = center.silo_address();
        let coordinator = ClusterMembershipService::new(center);

        coordinator.register(table(address(48004), 0)).await.expect("register failed");
        coordinator.register(table(own, 0)).await.expect("register failed");

        assert!(!coordinator
            .alive(MembershipEntry::gateway(address(48004)))
            .await
            .expect("alive failed"));
        assert!(coordinator
            .alive(MembershipEntry::gateway(own))
            .await
            .expect("alive failed"));
        assert!(!coordinator
            .alive(MembershipEntry::gateway(address(48005)))
            .await
            .expect("alive failed"));
    }

    #[silo::concurrency::test]
    async fn dropped_connections_remove_the_member() {
        let coordinator_center = networked_center(|o| o);
        let member_center = networked_center(|o| o);
        let coordinator = ClusterMembershipService::new(coordinator_center.clone());
        let _watcher = coordinator.watch_disconnects(coordinator_center.shutdown_signal().clone());

        // the member's first message over the connection registers it with
        // the coordinator's connection pool
        let (identity, _probe) =
            crate::common_test::host_probe(&coordinator_center, silo::InvocationPolicy::Multi);
        let request = crate::common_test::probe_request(
            &coordinator_center,
            identity,
            "echo",
            vec![silo::BytesConvertable::into_bytes("hi".to_string())],
        );
        let result = member_center.send_request(request, None).await.expect("send failed");
        assert!(result.is_success());

        let member = member_center.silo_address();
        coordinator.register(table(member, 1)).await.expect("register failed");
        assert!(coordinator
            .alive(MembershipEntry::gateway(member))
            .await
            .expect("alive failed"));

        member_center.connections().close_all();
        let view = coordinator.clone();
        periodic_check(move || view.members().is_empty(), Duration::from_secs(5)).await;
        assert_eq!(2, coordinator.version());
    }
}
