// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Membership tables, snapshots and the locators derived from them

use std::collections::HashMap;

use silo::directory::HostedService;
use silo::{Address, Identity};

use crate::derive_bytes_convertable_via_prost;
use crate::protocol::{membership as proto, required};
use crate::serializer::SerializationErr;

/// Well-known key of the coordinator's membership system target
pub const CLUSTER_MEMBERSHIP_KEY: u128 = 0x5111_0000_0000_0000_0000_0000_0000_0001;
/// Well-known key of every gateway's membership system target
pub const GATEWAY_MEMBERSHIP_KEY: u128 = 0x5111_0000_0000_0000_0000_0000_0000_0002;

/// The coordinator's membership system target
pub const CLUSTER_MEMBERSHIP: Identity = Identity::system_target(CLUSTER_MEMBERSHIP_KEY);
/// A gateway's membership system target
pub const GATEWAY_MEMBERSHIP: Identity = Identity::system_target(GATEWAY_MEMBERSHIP_KEY);

/// Identifies one gateway member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MembershipEntry {
    /// The member's gateway address
    pub address: Address,
    /// The member's membership system target
    pub identity: Identity,
}

impl MembershipEntry {
    /// The entry of the gateway listening on `address`
    pub fn gateway(address: Address) -> Self {
        Self {
            address,
            identity: GATEWAY_MEMBERSHIP,
        }
    }
}

/// One hosted service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipRow {
    /// The service identity
    pub identity: Identity,
    /// Its interface name
    pub service_type: String,
    /// Instance metadata
    pub metadata: Vec<u8>,
}

impl From<HostedService> for MembershipRow {
    fn from(value: HostedService) -> Self {
        Self {
            identity: value.identity,
            service_type: value.service_type,
            metadata: value.metadata,
        }
    }
}

/// Everything one member hosts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipTable {
    /// The member
    pub entry: MembershipEntry,
    /// The member's own table version, bumped on every local change
    pub version: u64,
    /// Hosted services
    pub rows: Vec<MembershipRow>,
}

/// Point-in-time copy of the coordinator's view
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipSnapshot {
    /// The coordinator's membership version
    pub version: u64,
    /// One table per live member
    pub tables: Vec<MembershipTable>,
}

impl MembershipSnapshot {
    /// The table of the member at `address`
    pub fn table(&self, address: &Address) -> Option<&MembershipTable> {
        self.tables.iter().find(|t| t.entry.address == *address)
    }

    /// Flatten the tables into per-identity locators. Should two members
    /// claim one identity, the later table wins.
    pub fn locators(&self) -> HashMap<Identity, ServiceLocator> {
        self.tables
            .iter()
            .flat_map(|table| {
                table.rows.iter().map(move |row| {
                    (
                        row.identity,
                        ServiceLocator {
                            identity: row.identity,
                            address: table.entry.address,
                            service_type: row.service_type.clone(),
                            metadata: row.metadata.clone(),
                        },
                    )
                })
            })
            .collect()
    }
}

/// Where a service lives, as resolved from a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceLocator {
    /// The service identity
    pub identity: Identity,
    /// The hosting silo
    pub address: Address,
    /// Interface name
    pub service_type: String,
    /// Instance metadata
    pub metadata: Vec<u8>,
}

// ============== wire conversions ============== //

impl From<MembershipEntry> for proto::MembershipEntry {
    fn from(value: MembershipEntry) -> Self {
        Self {
            address: Some(value.address.into()),
            identity: Some(value.identity.into()),
        }
    }
}

impl TryFrom<proto::MembershipEntry> for MembershipEntry {
    type Error = SerializationErr;

    fn try_from(value: proto::MembershipEntry) -> Result<Self, Self::Error> {
        Ok(Self {
            address: required(value.address, "entry.address")?.try_into()?,
            identity: required(value.identity, "entry.identity")?.try_into()?,
        })
    }
}

impl From<MembershipRow> for proto::MembershipRow {
    fn from(value: MembershipRow) -> Self {
        Self {
            identity: Some(value.identity.into()),
            service_type: value.service_type,
            metadata: value.metadata,
        }
    }
}

impl TryFrom<proto::MembershipRow> for MembershipRow {
    type Error = SerializationErr;

    fn try_from(value: proto::MembershipRow) -> Result<Self, Self::Error> {
        Ok(Self {
            identity: required(value.identity, "row.identity")?.try_into()?,
            service_type: value.service_type,
            metadata: value.metadata,
        })
    }
}

impl From<MembershipTable> for proto::MembershipTable {
    fn from(value: MembershipTable) -> Self {
        Self {
            entry: Some(value.entry.into()),
            version: value.version,
            rows: value.rows.into_iter().map(Into::into).collect(),
        }
    }
}

impl TryFrom<proto::MembershipTable> for MembershipTable {
    type Error = SerializationErr;

    fn try_from(value: proto::MembershipTable) -> Result<Self, Self::Error> {
        Ok(Self {
            entry: required(value.entry, "table.entry")?.try_into()?,
            version: value.version,
            rows: value
                .rows
                .into_iter()
                .map(TryInto::try_into)
                .collect::<Result<_, _>>()?,
        })
    }
}

impl From<MembershipSnapshot> for proto::MembershipSnapshot {
    fn from(value: MembershipSnapshot) -> Self {
        Self {
            version: value.version,
            tables: value.tables.into_iter().map(Into::into).collect(),
        }
    }
}

impl TryFrom<proto::MembershipSnapshot> for MembershipSnapshot {
    type Error = SerializationErr;

    fn try_from(value: proto::MembershipSnapshot) -> Result<Self, Self::Error> {
        Ok(Self {
            version: value.version,
            tables: value
                .tables
                .into_iter()
                .map(TryInto::try_into)
                .collect::<Result<_, _>>()?,
        })
    }
}

derive_bytes_convertable_via_prost! {MembershipEntry, proto::MembershipEntry}
derive_bytes_convertable_via_prost! {MembershipTable, proto::MembershipTable}
derive_bytes_convertable_via_prost! {MembershipSnapshot, proto::MembershipSnapshot}
