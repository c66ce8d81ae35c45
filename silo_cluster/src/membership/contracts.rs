// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The two membership system-target interfaces

use silo::{CallErr, Identity};
use silo_cluster_derive::service_contract;

use super::types::{MembershipEntry, MembershipSnapshot, MembershipTable};

/// Served by the coordinator
#[service_contract(name = "silo.membership.ClusterMembership")]
pub trait ClusterMembership {
    /// Whether the member has a table backed by a live connection
    async fn alive(&self, entry: MembershipEntry) -> Result<bool, CallErr>;

    /// Upsert a member's table and return the full view
    async fn register(&self, table: MembershipTable) -> Result<MembershipSnapshot, CallErr>;

    /// Drop a member
    async fn unregister(&self, entry: MembershipEntry) -> Result<(), CallErr>;

    /// Replace one member's rows
    #[one_way]
    async fn table_changed(&self, table: MembershipTable) -> Result<(), CallErr>;

    /// The current view
    async fn create_snapshot(&self) -> Result<MembershipSnapshot, CallErr>;

    /// Ask every member to kill a service
    #[one_way]
    async fn kill_service(&self, identity: Identity) -> Result<(), CallErr>;
}

/// Served by every gateway member
#[service_contract(name = "silo.membership.GatewayMembership")]
pub trait GatewayMembership {
    /// The coordinator's view moved to `version`
    #[one_way]
    async fn membership_table_changed(&self, version: u64) -> Result<(), CallErr>;

    /// Kill the service if it is hosted here
    #[one_way]
    async fn kill_service(&self, identity: Identity) -> Result<(), CallErr>;
}
