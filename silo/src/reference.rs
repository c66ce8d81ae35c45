// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The client side of a contract. A generated reference encodes each call
//! into an [InvokeRequest] and forwards it to a [ReferenceTarget], which owns
//! routing (locating the hosting silo and awaiting the response).

use crate::contract::InvokeOptions;
use crate::errors::CallErr;
use crate::serialization::BytesConvertable;
use crate::{Identity, InvokeRequest};

/// Where a typed reference sends its invocations
#[async_trait::async_trait]
pub trait ReferenceTarget: Send + Sync + 'static {
    /// The identity being called
    fn identity(&self) -> Identity;

    /// Deliver an invocation. One-way invocations resolve to [Ok(None)] as
    /// soon as the message is handed to the transport.
    async fn invoke(
        &self,
        request: InvokeRequest,
        options: InvokeOptions,
    ) -> Result<Option<Vec<u8>>, CallErr>;
}

/// Decode a method's return payload. A missing payload decodes as empty
/// bytes, which only unit-like types accept.
pub fn decode_return<T: BytesConvertable>(value: Option<Vec<u8>>) -> Result<T, CallErr> {
    Ok(T::from_bytes(value.unwrap_or_default())?)
}
