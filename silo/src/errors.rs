// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Runtime error types

use std::fmt::Display;

use crate::message::{RejectionType, RemoteException};
use crate::Identity;

/// An error raised by user code (activation hooks, lifecycle observers)
pub type SiloProcessingErr = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors registering an activation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationErr {
    /// An activation with this identity is already registered
    DuplicateIdentity(Identity),
}

impl std::error::Error for RegistrationErr {}

impl Display for RegistrationErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateIdentity(identity) => {
                write!(f, "An activation for '{identity}' is already registered")
            }
        }
    }
}

/// Errors validating a service contract's descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractErr {
    /// A one-way method declared a non-unit success type
    OneWayMustReturnUnit {
        /// The interface name
        interface: String,
        /// The offending method
        method: String,
    },
    /// Two methods hashed to the same id
    DuplicateMethodId {
        /// The interface name
        interface: String,
        /// The colliding signatures
        signatures: (String, String),
        /// The shared id
        id: u32,
    },
    /// The interface name was empty
    EmptyInterfaceName,
}

impl std::error::Error for ContractErr {}

impl Display for ContractErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OneWayMustReturnUnit { interface, method } => write!(
                f,
                "One-way method '{interface}::{method}' must return a unit success type"
            ),
            Self::DuplicateMethodId {
                interface,
                signatures,
                id,
            } => write!(
                f,
                "Methods '{}' and '{}' of '{interface}' share the id {id:#010x}",
                signatures.0, signatures.1
            ),
            Self::EmptyInterfaceName => write!(f, "Service interface names cannot be empty"),
        }
    }
}

/// A payload could not be decoded into the requested type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeErr {
    target: &'static str,
    reason: String,
}

impl DecodeErr {
    /// A decode failure for the named target type
    pub fn new(target: &'static str, reason: impl Into<String>) -> Self {
        Self {
            target,
            reason: reason.into(),
        }
    }

    /// The type that failed to decode
    pub fn target(&self) -> &'static str {
        self.target
    }
}

impl std::error::Error for DecodeErr {}

impl Display for DecodeErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to decode '{}': {}", self.target, self.reason)
    }
}

/// Errors surfaced to callers of remote methods
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallErr {
    /// No silo hosts the target identity
    NotFound(Identity),
    /// The target silo refused the call
    Rejected {
        /// Why
        kind: RejectionType,
        /// Human readable reason
        reason: String,
    },
    /// The method ran and failed
    Remote(RemoteException),
    /// No response arrived within the request timeout
    Timeout,
    /// The message could not be delivered
    Transport(String),
    /// The exchange was malformed (unknown method id, undecodable payload)
    Protocol(String),
}

impl CallErr {
    /// Whether retrying the call could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Rejected { kind, .. } => kind.is_retryable(),
            Self::Transport(_) => true,
            _ => false,
        }
    }

    /// Returns [true] when the target could not be located
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Remote(exception) => {
                matches!(exception.kind, crate::message::ExceptionKind::ServiceNotFound)
            }
            _ => false,
        }
    }
}

impl std::error::Error for CallErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Remote(inner) => Some(inner),
            _ => None,
        }
    }
}

impl Display for CallErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(identity) => write!(f, "Target '{identity}' not found"),
            Self::Rejected { kind, reason } => write!(f, "Rejected ({kind}): {reason}"),
            Self::Remote(exception) => write!(f, "Remote failure: {exception}"),
            Self::Timeout => write!(f, "Timeout waiting for a response"),
            Self::Transport(reason) => write!(f, "Transport failure: {reason}"),
            Self::Protocol(reason) => write!(f, "Protocol failure: {reason}"),
        }
    }
}

impl From<DecodeErr> for CallErr {
    fn from(value: DecodeErr) -> Self {
        Self::Protocol(value.to_string())
    }
}

impl From<ContractErr> for CallErr {
    fn from(value: ContractErr) -> Self {
        Self::Protocol(value.to_string())
    }
}

impl From<RemoteException> for CallErr {
    fn from(value: RemoteException) -> Self {
        Self::Remote(value)
    }
}

impl From<crate::concurrency::Timeout> for CallErr {
    fn from(_: crate::concurrency::Timeout) -> Self {
        Self::Timeout
    }
}

/// Errors bringing a new activation online
#[derive(Debug)]
pub enum ActivationErr {
    /// The identity is already hosted
    Registration(RegistrationErr),
    /// The instance's activation hook failed, it was not registered
    ActivationFailed(Identity, SiloProcessingErr),
}

impl std::error::Error for ActivationErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Registration(inner) => Some(inner),
            Self::ActivationFailed(_, inner) => Some(inner.as_ref()),
        }
    }
}

impl Display for ActivationErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registration(inner) => write!(f, "{inner}"),
            Self::ActivationFailed(identity, inner) => {
                write!(f, "Activation of '{identity}' failed: {inner}")
            }
        }
    }
}

impl From<RegistrationErr> for ActivationErr {
    fn from(value: RegistrationErr) -> Self {
        Self::Registration(value)
    }
}
