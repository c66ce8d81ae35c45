// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The member side of the membership protocol. Registers the silo with the
//! coordinator, keeps checking that the coordinator still considers it
//! alive, and keeps the local membership cache current.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use silo::concurrency::{sleep, watch, Duration, JoinHandle, WatchSender};
use silo::{Address, Addressable, CallErr, Identity, ServiceContract, ShutdownSignal};

use super::contracts::{
    ClusterMembership, ClusterMembershipContract, ClusterMembershipReference, GatewayMembership,
};
use super::manager::MembershipManager;
use super::types::{MembershipEntry, MembershipTable, CLUSTER_MEMBERSHIP};
use crate::message_center::MessageCenter;
use crate::reference::SystemTarget;

/// The gateway membership system target
pub struct GatewayMembershipService {
    center: MessageCenter,
    entry: MembershipEntry,
    coordinator: ClusterMembershipReference,
    manager: Arc<MembershipManager>,
    registered: AtomicBool,
    table_version: AtomicU64,
    joined: WatchSender<bool>,
    period: Duration,
}

impl std::fmt::Debug for GatewayMembershipService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayMembershipService")
            .field("entry", &self.entry)
            .field("registered", &self.is_registered())
            .finish()
    }
}

/// A reference to the coordinator at `cluster`
pub fn coordinator_reference(
    center: &MessageCenter,
    cluster: Address,
) -> ClusterMembershipReference {
    ClusterMembershipContract::reference(Arc::new(SystemTarget::new(
        center.clone(),
        cluster,
        CLUSTER_MEMBERSHIP,
    )))
}

impl GatewayMembershipService {
    /// A member of the cluster coordinated at `cluster`
    pub fn new(
        center: MessageCenter,
        cluster: Address,
        manager: Arc<MembershipManager>,
        period: Duration,
    ) -> Arc<Self> {
        let (joined, _) = watch(false);
        Arc::new(Self {
            entry: MembershipEntry::gateway(center.silo_address()),
            coordinator: coordinator_reference(&center, cluster),
            center,
            manager,
            registered: AtomicBool::new(false),
            table_version: AtomicU64::new(0),
            joined,
            period,
        })
    }

    /// This member's entry
    pub fn entry(&self) -> MembershipEntry {
        self.entry
    }

    /// The local membership cache
    pub fn manager(&self) -> &Arc<MembershipManager> {
        &self.manager
    }

    /// The coordinator
    pub fn coordinator(&self) -> &ClusterMembershipReference {
        &self.coordinator
    }

    /// Returns [true] while the member believes it is registered
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    /// Returns [true] once the first registration succeeded
    pub fn has_joined(&self) -> bool {
        *self.joined.borrow()
    }

    /// The table of the services hosted here
    pub fn table(&self) -> MembershipTable {
        MembershipTable {
            entry: self.entry,
            version: self.table_version.load(Ordering::Acquire),
            rows: self
                .center
                .directory()
                .hosted_services()
                .into_iter()
                .map(Into::into)
                .collect(),
        }
    }

    /// One liveness check: ask the coordinator whether we are alive and
    /// register again if not
    pub async fn check(&self) -> Result<(), CallErr> {
        let alive = self.is_registered() && self.coordinator.alive(self.entry).await?;
        if alive {
            return Ok(());
        }

        self.registered.store(false, Ordering::Release);
        let snapshot = self.coordinator.register(self.table()).await?;
        // the coordinator may have restarted with fresh versions
        self.manager.reset();
        self.manager.apply_snapshot(snapshot);
        self.registered.store(true, Ordering::Release);
        log::info!(
            "Registered {} with the coordinator at membership version {:?}",
            self.entry.address,
            self.manager.version()
        );
        self.joined.send_if_modified(|joined| !std::mem::replace(joined, true));
        Ok(())
    }

    /// Run the check loop until `shutdown`. A check never overlaps the next
    /// one, the loop sleeps only once a check has finished.
    pub fn start(self: &Arc<Self>, shutdown: ShutdownSignal) -> JoinHandle<()> {
        let this = self.clone();
        silo::concurrency::spawn(async move {
            loop {
                if shutdown.is_cancelled() {
                    break;
                }
                if let Err(err) = this.check().await {
                    this.registered.store(false, Ordering::Release);
                    log::warn!("Membership check of {} failed: {err}", this.entry.address);
                }
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = sleep(this.period) => {}
                }
            }
            log::debug!("Membership loop of {} stopped", this.entry.address);
        })
    }

    /// Wait for the first successful registration
    pub async fn wait_joined(&self) {
        let mut joined = self.joined.subscribe();
        while !*joined.borrow_and_update() {
            if joined.changed().await.is_err() {
                break;
            }
        }
    }

    /// Best-effort unregistration
    pub async fn unregister(&self) {
        if self.registered.swap(false, Ordering::AcqRel) {
            match self.coordinator.unregister(self.entry).await {
                Ok(()) => log::info!("Unregistered {} from the coordinator", self.entry.address),
                Err(err) => log::warn!("Failed to unregister {}: {err}", self.entry.address),
            }
        }
    }

    /// Send the current table after local services changed
    pub async fn publish_table(&self) {
        if !self.is_registered() {
            return;
        }
        self.table_version.fetch_add(1, Ordering::AcqRel);
        if let Err(err) = self.coordinator.table_changed(self.table()).await {
            log::warn!("Failed to publish the table of {}: {err}", self.entry.address);
        }
    }

    /// Pull the coordinator's snapshot. Returns [true] if it was newer.
    pub async fn refresh(&self) -> Result<bool, CallErr> {
        let snapshot = self.coordinator.create_snapshot().await?;
        Ok(self.manager.apply_snapshot(snapshot))
    }
}

impl Addressable for GatewayMembershipService {}

#[async_trait::async_trait]
impl GatewayMembership for GatewayMembershipService {
    async fn membership_table_changed(&self, version: u64) -> Result<(), CallErr> {
        if self.manager.is_newer(version) {
            if let Err(err) = self.refresh().await {
                log::warn!("Failed to pull membership version {version}: {err}");
            }
        }
        Ok(())
    }

    async fn kill_service(&self, identity: Identity) -> Result<(), CallErr> {
        self.manager.forget(&identity);
        if self.center.directory().kill(&identity).await {
            log::info!("Killed {identity} on {}", self.entry.address);
            self.publish_table().await;
        }
        Ok(())
    }
}
