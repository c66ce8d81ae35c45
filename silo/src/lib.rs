// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! `silo`: the core of a distributed service runtime.
//!
//! A silo hosts addressable service instances ("activations") and routes typed
//! remote-procedure messages to them. This crate holds the single-process
//! machinery: identities and addresses, the message envelope, the stable
//! method-id scheme, service contracts with their references and invokers,
//! activations with their mailboxes, the activation directory and the staged
//! lifecycle. Networking, membership and the silo host itself live in
//! `silo_cluster`.
//!
//! ## Installation
//!
//! ```toml
//! [dependencies]
//! silo = "0.1"
//! ```
//!
//! ## Identities and addresses
//!
//! ```rust
//! use silo::{Address, Category, Identity};
//!
//! let address: Address = "127.0.0.1:64001".parse().unwrap();
//! assert_eq!("127.0.0.1:64001", address.to_string());
//!
//! let identity = Identity::service();
//! assert_eq!(Category::Service, identity.category());
//! assert_eq!(identity, identity.to_string().parse::<Identity>().unwrap());
//! ```
//!
//! ## Method ids
//!
//! Methods are identified across processes by a hash of their canonical
//! signature, so two builds of the same contract always agree:
//!
//! ```rust
//! let id = silo::method_id::method_id("say", &[] as &[&str], &["String", "String"]);
//! assert_eq!(id, silo::method_id::hash_fold("say<>(String,String)"));
//! ```

#![warn(unused_imports)]
#![warn(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod activation;
pub mod address;
pub mod call_context;
pub mod concurrency;
pub mod contract;
pub mod directory;
pub mod errors;
pub mod identity;
pub mod invoker;
pub mod lifecycle;
pub mod message;
pub mod method_id;
pub mod reference;
pub mod rpc;
pub mod serialization;


// re-exports
pub use activation::{Activation, InvocationPolicy, Priority};
pub use address::{Address, AddressParseErr};
pub use call_context::CallContext;
pub use contract::{InvokeOptions, ServiceContract, ServiceDescriptor};
pub use directory::ActivationDirectory;
pub use errors::*;
pub use identity::{Category, Identity};
pub use invoker::{Addressable, MethodInvoker};
pub use lifecycle::{LifecycleObservable, LifecycleObserver, LifecycleStage, ShutdownSignal};
pub use message::{
    Body, Direction, ExceptionKind, InvokeRequest, Message, MessageId, RejectionType,
    RemoteException, ResultKind,
};
pub use reference::ReferenceTarget;
pub use rpc::CallResult;
pub use serialization::BytesConvertable;

// generated contract code refers to these through `::silo`
pub use async_trait::async_trait;
