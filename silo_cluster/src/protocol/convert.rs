// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Conversions between the runtime's value types and their generated wire
//! counterparts

use std::net::IpAddr;

use silo::concurrency::Duration;
use silo::{
    Address, Body, Category, Direction, ExceptionKind, Identity, InvokeRequest, Message,
    MessageId, RejectionType, RemoteException, ResultKind,
};

use super::message as wire;
use crate::serializer::SerializationErr;

/// Unwrap an optional sub-message the schema requires
pub(crate) fn required<T>(value: Option<T>, field: &'static str) -> Result<T, SerializationErr> {
    value.ok_or(SerializationErr::MissingField(field))
}

impl From<Address> for wire::Address {
    fn from(value: Address) -> Self {
        Self {
            host: value.host().to_string(),
            port: value.port() as u32,
        }
    }
}

impl TryFrom<wire::Address> for Address {
    type Error = SerializationErr;

    fn try_from(value: wire::Address) -> Result<Self, Self::Error> {
        let host = value
            .host
            .parse::<IpAddr>()
            .map_err(|_| SerializationErr::invalid("address.host", value.host.clone()))?;
        let port = u16::try_from(value.port)
            .map_err(|_| SerializationErr::invalid("address.port", value.port.to_string()))?;
        Ok(Address::new(host, port))
    }
}

impl From<Identity> for wire::Identity {
    fn from(value: Identity) -> Self {
        let (key_high, key_low) = value.key_parts();
        let mut identity = Self {
            key_high,
            key_low,
            ..Default::default()
        };
        identity.set_category(match value.category() {
            Category::SystemTarget => wire::Category::SystemTarget,
            Category::Service => wire::Category::Service,
        });
        identity
    }
}

impl TryFrom<wire::Identity> for Identity {
    type Error = SerializationErr;

    fn try_from(value: wire::Identity) -> Result<Self, Self::Error> {
        let category = match wire::Category::from_i32(value.category) {
            Some(wire::Category::SystemTarget) => Category::SystemTarget,
            Some(wire::Category::Service) => Category::Service,
            None => {
                return Err(SerializationErr::invalid(
                    "identity.category",
                    value.category.to_string(),
                ))
            }
        };
        Ok(Identity::from_key_parts(value.key_high, value.key_low, category))
    }
}

fn rejection_to_wire(kind: RejectionType) -> wire::RejectionType {
    match kind {
        RejectionType::Transient => wire::RejectionType::Transient,
        RejectionType::Overloaded => wire::RejectionType::Overloaded,
        RejectionType::DuplicateRequest => wire::RejectionType::DuplicateRequest,
        RejectionType::Unrecoverable => wire::RejectionType::Unrecoverable,
        RejectionType::GatewayTooBusy => wire::RejectionType::GatewayTooBusy,
        RejectionType::CacheInvalidation => wire::RejectionType::CacheInvalidation,
    }
}

fn rejection_from_wire(raw: i32) -> Result<RejectionType, SerializationErr> {
    Ok(match wire::RejectionType::from_i32(raw) {
        Some(wire::RejectionType::Transient) => RejectionType::Transient,
        Some(wire::RejectionType::Overloaded) => RejectionType::Overloaded,
        Some(wire::RejectionType::DuplicateRequest) => RejectionType::DuplicateRequest,
        Some(wire::RejectionType::Unrecoverable) => RejectionType::Unrecoverable,
        Some(wire::RejectionType::GatewayTooBusy) => RejectionType::GatewayTooBusy,
        Some(wire::RejectionType::CacheInvalidation) => RejectionType::CacheInvalidation,
        None => return Err(SerializationErr::invalid("rejection_type", raw.to_string())),
    })
}

fn exception_to_wire(exception: &RemoteException) -> wire::Exception {
    let mut out = wire::Exception {
        type_name: exception.type_name.clone(),
        message: exception.message.clone(),
        ..Default::default()
    };
    out.set_kind(match exception.kind {
        ExceptionKind::Application => wire::ExceptionKind::Application,
        ExceptionKind::ServiceNotFound => wire::ExceptionKind::ServiceNotFound,
        ExceptionKind::MethodNotSupported => wire::ExceptionKind::MethodNotSupported,
        ExceptionKind::InvalidArgument => wire::ExceptionKind::InvalidArgument,
        ExceptionKind::Panic => wire::ExceptionKind::Panic,
    });
    out
}

fn exception_from_wire(exception: wire::Exception) -> Result<RemoteException, SerializationErr> {
    let kind = match wire::ExceptionKind::from_i32(exception.kind) {
        Some(wire::ExceptionKind::Application) => ExceptionKind::Application,
        Some(wire::ExceptionKind::ServiceNotFound) => ExceptionKind::ServiceNotFound,
        Some(wire::ExceptionKind::MethodNotSupported) => ExceptionKind::MethodNotSupported,
        Some(wire::ExceptionKind::InvalidArgument) => ExceptionKind::InvalidArgument,
        Some(wire::ExceptionKind::Panic) => ExceptionKind::Panic,
        None => {
            return Err(SerializationErr::invalid(
                "exception.kind",
                exception.kind.to_string(),
            ))
        }
    };
    Ok(RemoteException::new(kind, exception.type_name, exception.message))
}

/// Build the wire envelope of a message
pub(crate) fn encode_envelope(message: &Message) -> wire::Envelope {
    let body = match &message.body {
        Body::Empty => None,
        Body::Request(request) => Some(wire::envelope::Body::Request(wire::InvokeRequest {
            interface_id: request.interface_id,
            method_id: request.method_id,
            arguments: request.arguments.clone(),
            timeout_ms: request
                .timeout
                .map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX)),
        })),
        Body::Value(value) => Some(wire::envelope::Body::Value(wire::ReturnValue {
            value: value.clone(),
        })),
        Body::Exception(exception) => {
            Some(wire::envelope::Body::Exception(exception_to_wire(exception)))
        }
        Body::Rejection(reason) => Some(wire::envelope::Body::Rejection(wire::Rejection {
            reason: reason.clone(),
        })),
    };

    let mut envelope = wire::Envelope {
        id: message.id.as_u128().to_be_bytes().to_vec(),
        sending_address: message.sending_address.map(Into::into),
        sending_identity: message.sending_identity.map(Into::into),
        target_address: Some(message.target_address.into()),
        target_identity: message.target_identity.map(Into::into),
        body,
        ..Default::default()
    };
    envelope.set_direction(match message.direction {
        Direction::Request => wire::Direction::Request,
        Direction::Response => wire::Direction::Response,
        Direction::OneWay => wire::Direction::OneWay,
    });
    envelope.set_result(match message.result {
        ResultKind::Success => wire::ResultKind::Success,
        ResultKind::Error => wire::ResultKind::Error,
        ResultKind::Rejection => wire::ResultKind::Rejection,
    });
    if let Some(kind) = message.rejection_type {
        envelope.set_rejection_type(rejection_to_wire(kind));
    }
    envelope
}

/// Rebuild a message from its wire envelope
pub(crate) fn decode_envelope(envelope: wire::Envelope) -> Result<Message, SerializationErr> {
    let id: [u8; 16] = envelope
        .id
        .as_slice()
        .try_into()
        .map_err(|_| SerializationErr::invalid("id", format!("{} bytes", envelope.id.len())))?;

    let direction = match wire::Direction::from_i32(envelope.direction) {
        Some(wire::Direction::Request) => Direction::Request,
        Some(wire::Direction::Response) => Direction::Response,
        Some(wire::Direction::OneWay) => Direction::OneWay,
        None => {
            return Err(SerializationErr::invalid(
                "direction",
                envelope.direction.to_string(),
            ))
        }
    };
    let result = match wire::ResultKind::from_i32(envelope.result) {
        Some(wire::ResultKind::Success) => ResultKind::Success,
        Some(wire::ResultKind::Error) => ResultKind::Error,
        Some(wire::ResultKind::Rejection) => ResultKind::Rejection,
        None => return Err(SerializationErr::invalid("result", envelope.result.to_string())),
    };
    let rejection_type = envelope.rejection_type.map(rejection_from_wire).transpose()?;

    let body = match envelope.body {
        None => Body::Empty,
        Some(wire::envelope::Body::Request(request)) => Body::Request(InvokeRequest {
            interface_id: request.interface_id,
            method_id: request.method_id,
            arguments: request.arguments,
            timeout: request.timeout_ms.map(Duration::from_millis),
        }),
        Some(wire::envelope::Body::Value(value)) => Body::Value(value.value),
        Some(wire::envelope::Body::Exception(exception)) => {
            Body::Exception(exception_from_wire(exception)?)
        }
        Some(wire::envelope::Body::Rejection(rejection)) => Body::Rejection(rejection.reason),
    };

    Ok(Message {
        id: MessageId::from_raw(u128::from_be_bytes(id)),
        sending_address: envelope.sending_address.map(TryInto::try_into).transpose()?,
        sending_identity: envelope.sending_identity.map(TryInto::try_into).transpose()?,
        target_address: required(envelope.target_address, "target_address")?.try_into()?,
        target_identity: envelope.target_identity.map(TryInto::try_into).transpose()?,
        direction,
        result,
        rejection_type,
        body,
    })
}
