// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Protobuf specifications for over-the-wire intercommunication
//! between silos. Generated via [prost]

mod convert;

/// The message envelope and its parts
pub(crate) mod message {
    #![allow(unreachable_pub)]
    #![allow(missing_docs)]
    include!(concat!(env!("OUT_DIR"), "/message.rs"));
}

/// Cluster membership tables and snapshots
pub(crate) mod membership {
    #![allow(unreachable_pub)]
    #![allow(missing_docs)]
    include!(concat!(env!("OUT_DIR"), "/membership.rs"));
}

pub(crate) use convert::{decode_envelope, encode_envelope, required};
