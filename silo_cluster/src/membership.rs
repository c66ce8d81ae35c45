// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Cluster membership.
//!
//! Exactly one silo runs the [ClusterMembershipService] (the coordinator).
//! Every silo hosting services runs a [GatewayMembershipService] which
//! registers the silo's table of hosted services with the coordinator,
//! periodically checks that it is still considered alive, and keeps a
//! [MembershipManager] cache of where every service lives.
//!
//! Every change on the coordinator bumps the membership version and notifies
//! the members, which pull a snapshot only if it is newer than what they have.

pub mod cluster;
pub mod contracts;
pub mod gateway;
pub mod manager;
pub mod types;

pub use cluster::ClusterMembershipService;
pub use contracts::{
    ClusterMembership, ClusterMembershipContract, ClusterMembershipReference, GatewayMembership,
    GatewayMembershipContract, GatewayMembershipReference,
};
pub use gateway::GatewayMembershipService;
pub use manager::{MembershipEvent, MembershipManager};
pub use types::{
    MembershipEntry, MembershipRow, MembershipSnapshot, MembershipTable, ServiceLocator,
    CLUSTER_MEMBERSHIP, GATEWAY_MEMBERSHIP,
};

#[cfg(test)]
mod tests;
