// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The message envelope routed between silos.
//!
//! Every remote interaction is a [Message]: a request or one-way call carries
//! an [InvokeRequest] body, and the answer is a derived copy of the request
//! (see [Message::create_response], [Message::create_error] and
//! [Message::create_rejection]) with the sender and target swapped and the
//! correlation id preserved.

use std::fmt::Display;

use crate::concurrency::Duration;
use crate::{Address, Identity};

/// Correlation id shared by a request and its response
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct MessageId(u128);

impl MessageId {
    /// A fresh random id
    pub fn random() -> Self {
        Self(rand::random::<u128>())
    }

    /// Wrap a raw id
    pub const fn from_raw(raw: u128) -> Self {
        Self(raw)
    }

    /// The raw 128-bit value
    pub fn as_u128(&self) -> u128 {
        self.0
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// What kind of exchange a message belongs to
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub enum Direction {
    /// Expects a response
    Request,
    /// Answers a request
    Response,
    /// Fire and forget
    OneWay,
}

/// Outcome classification carried by responses
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub enum ResultKind {
    /// The method completed
    Success,
    /// The method raised an exception
    Error,
    /// The runtime refused to run the method
    Rejection,
}

/// Why the runtime refused a message
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub enum RejectionType {
    /// A temporary condition, retry later
    Transient,
    /// Too many messages in flight for the target
    Overloaded,
    /// The same request was already seen
    DuplicateRequest,
    /// Retrying will not help
    Unrecoverable,
    /// The gateway is saturated
    GatewayTooBusy,
    /// The sender routed with a stale locator
    CacheInvalidation,
}

impl RejectionType {
    /// Whether a caller could reasonably retry after this rejection
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transient | Self::Overloaded | Self::GatewayTooBusy | Self::CacheInvalidation => {
                true
            }
            Self::DuplicateRequest | Self::Unrecoverable => false,
        }
    }
}

impl Display for RejectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Transient => "transient",
            Self::Overloaded => "overloaded",
            Self::DuplicateRequest => "duplicate request",
            Self::Unrecoverable => "unrecoverable",
            Self::GatewayTooBusy => "gateway too busy",
            Self::CacheInvalidation => "cache invalidation",
        };
        write!(f, "{label}")
    }
}

/// A method invocation on a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeRequest {
    /// Hash of the interface's qualified name
    pub interface_id: u32,
    /// Hash of the method's canonical signature
    pub method_id: u32,
    /// Encoded arguments, in declared order
    pub arguments: Vec<Vec<u8>>,
    /// Per-call override of the request timeout
    pub timeout: Option<Duration>,
}

impl InvokeRequest {
    /// Create a new invocation request
    pub fn new(interface_id: u32, method_id: u32, arguments: Vec<Vec<u8>>) -> Self {
        Self {
            interface_id,
            method_id,
            arguments,
            timeout: None,
        }
    }

    /// Attach a timeout override
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Classification of a [RemoteException]
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub enum ExceptionKind {
    /// The method itself returned an error
    Application,
    /// No activation with the target identity exists
    ServiceNotFound,
    /// The target does not implement the method id
    MethodNotSupported,
    /// Wrong argument count or undecodable argument
    InvalidArgument,
    /// The method panicked
    Panic,
}

/// An error raised while executing a method, shipped back to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteException {
    /// The classification
    pub kind: ExceptionKind,
    /// Rust type name of the original error, where known
    pub type_name: String,
    /// Rendered error message
    pub message: String,
}

impl RemoteException {
    /// Create a new exception
    pub fn new(
        kind: ExceptionKind,
        type_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            type_name: type_name.into(),
            message: message.into(),
        }
    }

    /// The target identity is not hosted where the message arrived
    pub fn service_not_found(identity: Option<Identity>) -> Self {
        let message = match identity {
            Some(identity) => format!("Service {identity} not found"),
            None => "Message carried no target identity".to_string(),
        };
        Self::new(ExceptionKind::ServiceNotFound, "", message)
    }

    /// A method panicked with the given payload text
    pub fn panic(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Panic, "", message)
    }
}

impl Display for RemoteException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.type_name.is_empty() {
            write!(f, "{:?}: {}", self.kind, self.message)
        } else {
            write!(f, "{:?} ({}): {}", self.kind, self.type_name, self.message)
        }
    }
}

impl std::error::Error for RemoteException {}

/// The payload of a [Message]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// Nothing
    Empty,
    /// An invocation
    Request(InvokeRequest),
    /// A successful return value, [None] for unit returns
    Value(Option<Vec<u8>>),
    /// A failed invocation
    Exception(RemoteException),
    /// A refusal, with a human readable reason
    Rejection(String),
}

/// A routed message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Correlation id
    pub id: MessageId,
    /// The silo which sent this message, stamped on send when absent
    pub sending_address: Option<Address>,
    /// The identity on whose behalf this message was sent
    pub sending_identity: Option<Identity>,
    /// The silo the message is routed to
    pub target_address: Address,
    /// The target on that silo
    pub target_identity: Option<Identity>,
    /// Exchange kind
    pub direction: Direction,
    /// Outcome classification (meaningful for responses)
    pub result: ResultKind,
    /// Refusal reason (only on rejections)
    pub rejection_type: Option<RejectionType>,
    /// The payload
    pub body: Body,
}

impl Message {
    fn invocation(
        direction: Direction,
        target_address: Address,
        target_identity: Identity,
        request: InvokeRequest,
    ) -> Self {
        Self {
            id: MessageId::random(),
            sending_address: None,
            sending_identity: None,
            target_address,
            target_identity: Some(target_identity),
            direction,
            result: ResultKind::Success,
            rejection_type: None,
            body: Body::Request(request),
        }
    }

    /// A request expecting a response
    pub fn request(
        target_address: Address,
        target_identity: Identity,
        request: InvokeRequest,
    ) -> Self {
        Self::invocation(Direction::Request, target_address, target_identity, request)
    }

    /// A fire-and-forget invocation
    pub fn one_way(
        target_address: Address,
        target_identity: Identity,
        request: InvokeRequest,
    ) -> Self {
        Self::invocation(Direction::OneWay, target_address, target_identity, request)
    }

    /// Set the identity on whose behalf this message is sent
    pub fn with_sending_identity(mut self, identity: Option<Identity>) -> Self {
        self.sending_identity = identity;
        self
    }

    /// Returns [true] for responses (including errors and rejections)
    pub fn is_response(&self) -> bool {
        matches!(self.direction, Direction::Response)
    }

    /// Returns [true] for fire-and-forget messages
    pub fn is_one_way(&self) -> bool {
        matches!(self.direction, Direction::OneWay)
    }

    /// The invocation carried by this message, if any
    pub fn invoke_request(&self) -> Option<&InvokeRequest> {
        match &self.body {
            Body::Request(request) => Some(request),
            _ => None,
        }
    }

    fn derive_response(&self, result: ResultKind, body: Body) -> Message {
        Message {
            id: self.id,
            sending_address: Some(self.target_address),
            sending_identity: self.target_identity,
            // an unstamped request never left this silo, answer it locally
            target_address: self.sending_address.unwrap_or(self.target_address),
            target_identity: self.sending_identity,
            direction: Direction::Response,
            result,
            rejection_type: None,
            body,
        }
    }

    /// A successful response carrying the return value
    pub fn create_response(&self, value: Option<Vec<u8>>) -> Message {
        self.derive_response(ResultKind::Success, Body::Value(value))
    }

    /// An error response carrying the exception
    pub fn create_error(&self, exception: RemoteException) -> Message {
        self.derive_response(ResultKind::Error, Body::Exception(exception))
    }

    /// A rejection with the given kind and reason
    pub fn create_rejection(&self, kind: RejectionType, reason: impl Into<String>) -> Message {
        let mut response =
            self.derive_response(ResultKind::Rejection, Body::Rejection(reason.into()));
        response.rejection_type = Some(kind);
        response
    }
}
