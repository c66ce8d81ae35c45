// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Pluggable admission of accepted peers

use std::net::SocketAddr;

/// Decides whether an accepted peer may talk to this silo. Refused peers are
/// disconnected before any frame is read.
#[async_trait::async_trait]
pub trait Authenticator: Send + Sync + 'static {
    /// Returns [true] to admit the peer
    async fn authenticate(&self, peer: Option<SocketAddr>) -> bool;
}

/// Admits everyone
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait::async_trait]
impl Authenticator for AllowAll {
    async fn authenticate(&self, _peer: Option<SocketAddr>) -> bool {
        true
    }
}
