// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The server side of a contract. A [MethodInvoker] maps a method id to the
//! concrete method of a hosted instance, decodes its arguments and encodes its
//! return value. `#[service_contract]` generates one per interface. The
//! instance's lifecycle capabilities come from [Addressable].

use std::fmt::Display;
use std::sync::Arc;

use crate::contract::ServiceDescriptor;
use crate::errors::SiloProcessingErr;
use crate::message::{ExceptionKind, InvokeRequest, RemoteException};
use crate::serialization::BytesConvertable;

/// Lifecycle capabilities of a hosted instance. Every method has a no-op
/// default, so `impl Addressable for MyService {}` is enough.
#[async_trait::async_trait]
pub trait Addressable: Send + Sync + 'static {
    /// Called once when the activation starts
    async fn on_activate(&self) -> Result<(), SiloProcessingErr> {
        Ok(())
    }

    /// Called once when the activation stops or is killed
    async fn on_deactivate(&self) -> Result<(), SiloProcessingErr> {
        Ok(())
    }

    /// Opaque metadata published in the membership table
    fn metadata(&self) -> Vec<u8> {
        Vec::new()
    }
}

/// Dispatches invocations onto a hosted instance
#[async_trait::async_trait]
pub trait MethodInvoker: Send + Sync + 'static {
    /// The interface this invoker serves
    fn descriptor(&self) -> Arc<ServiceDescriptor>;

    /// Run one invocation. [Ok(None)] is a unit return.
    async fn invoke(&self, request: InvokeRequest) -> Result<Option<Vec<u8>>, RemoteException>;

    /// Forwarded to [Addressable::on_activate]
    async fn on_activate(&self) -> Result<(), SiloProcessingErr>;

    /// Forwarded to [Addressable::on_deactivate]
    async fn on_deactivate(&self) -> Result<(), SiloProcessingErr>;

    /// Forwarded to [Addressable::metadata]
    fn metadata(&self) -> Vec<u8>;
}

/// The exception for a method id the interface does not declare
pub fn unknown_method(descriptor: &ServiceDescriptor, method_id: u32) -> RemoteException {
    RemoteException::new(
        ExceptionKind::MethodNotSupported,
        "",
        format!(
            "Interface '{}' has no method with id {method_id:#010x}",
            descriptor.name()
        ),
    )
}

/// Wrap an application error returned by a method
pub fn application_error<E: Display>(err: &E) -> RemoteException {
    RemoteException::new(
        ExceptionKind::Application,
        std::any::type_name::<E>(),
        err.to_string(),
    )
}

/// Positional argument decoder for one invocation
#[derive(Debug)]
pub struct Arguments {
    method: String,
    position: usize,
    values: std::vec::IntoIter<Vec<u8>>,
}

impl Arguments {
    /// Check the argument count against the method at `index` and prepare to
    /// decode
    pub fn new(
        descriptor: &ServiceDescriptor,
        index: usize,
        arguments: Vec<Vec<u8>>,
    ) -> Result<Self, RemoteException> {
        let method = descriptor.method_at(index).ok_or_else(|| {
            RemoteException::new(ExceptionKind::MethodNotSupported, "", "Invalid method index")
        })?;
        if method.arity() != arguments.len() {
            return Err(RemoteException::new(
                ExceptionKind::InvalidArgument,
                "",
                format!(
                    "'{}::{}' takes {} argument(s), {} supplied",
                    descriptor.name(),
                    method.name(),
                    method.arity(),
                    arguments.len()
                ),
            ));
        }
        Ok(Self {
            method: format!("{}::{}", descriptor.name(), method.name()),
            position: 0,
            values: arguments.into_iter(),
        })
    }

    /// Decode the next argument
    pub fn next<T: BytesConvertable>(&mut self) -> Result<T, RemoteException> {
        let position = self.position;
        self.position += 1;
        let bytes = self.values.next().ok_or_else(|| {
            RemoteException::new(
                ExceptionKind::InvalidArgument,
                "",
                format!("'{}' is missing argument {position}", self.method),
            )
        })?;
        T::from_bytes(bytes).map_err(|err| {
            RemoteException::new(
                ExceptionKind::InvalidArgument,
                std::any::type_name::<T>(),
                format!("'{}' argument {position}: {err}", self.method),
            )
        })
    }
}
