// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! # Networked silos
//!
//! `silo_cluster` turns the single-process machinery of [silo] into a cluster
//! of cooperating processes ("silos"). Each silo binds up to two listeners:
//!
//! * a **gateway** listener which hosts user services and joins the cluster,
//! * a **cluster** listener which runs the membership coordinator.
//!
//! Exactly one silo in a cluster runs the coordinator. Every gateway registers
//! the table of services it hosts with the coordinator, checks periodically
//! that it is still considered alive, and learns where every other service
//! lives from versioned membership snapshots.
//!
//! Messages cross the network as length-prefixed protobuf frames over one
//! pooled TCP connection per peer. A request is answered with a value, an
//! error, or a rejection (e.g. the target's in-flight threshold was reached),
//! and times out if no answer arrives in time.
//!
//! ## Declaring a contract
//!
//! ```rust
//! use silo::CallErr;
//! use silo_cluster::service_contract;
//!
//! #[service_contract(name = "demo.Hello")]
//! pub trait Hello {
//!     async fn say(&self, name: String, greeting: String) -> Result<String, CallErr>;
//!
//!     #[one_way]
//!     async fn ping(&self) -> Result<(), CallErr>;
//! }
//! ```
//!
//! The macro generates `HelloContract` (the [silo::ServiceContract]),
//! `HelloReference` (a typed client obtained from [Silo::reference]) and the
//! invoker used to host an implementation with [Silo::spawn_service].

#![warn(unused_imports)]
#![warn(unsafe_code)]
#![warn(missing_docs)]
#![warn(unused_crate_dependencies)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod protocol;

pub mod config;
pub mod host;
pub mod macros;
pub mod membership;
pub mod message_center;
pub mod net;
pub mod reference;
pub mod serializer;
pub mod stats;

#[cfg(test)]
pub(crate) mod common_test;

// ============== Re-exports ============== //
pub use crate::config::{ClusterOptions, ConfigErr, GatewayOptions, ListenerOptions};
pub use crate::membership::{MembershipEvent, MembershipManager, ServiceLocator};
pub use crate::message_center::MessageCenter;
pub use crate::net::{AllowAll, Authenticator, ConnectErr, Connector, NetworkStream, TcpConnector};
pub use crate::reference::{ServiceTarget, SystemTarget};
pub use crate::serializer::{MessageSerializer, ProstSerializer, SerializationErr};
pub use crate::host::{Silo, SiloBuilder, SiloErr};
pub use crate::stats::ActivationStatistics;

// Re-export the procedural macro so people don't need to reference it directly
pub use silo_cluster_derive::service_contract;
