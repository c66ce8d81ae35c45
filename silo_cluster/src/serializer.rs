// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The swappable codec which turns [Message]s into frame payloads and back

use std::fmt::Display;

use prost::Message as _;
use silo::Message;

use crate::protocol::{decode_envelope, encode_envelope, message::Envelope};

/// A payload could not be turned into a [Message]
#[derive(Debug)]
pub enum SerializationErr {
    /// The protobuf payload is malformed
    Decode(prost::DecodeError),
    /// A required field is absent
    MissingField(&'static str),
    /// A field carries a value the runtime does not understand
    InvalidField {
        /// The field's name
        field: &'static str,
        /// The offending value
        value: String,
    },
    /// Codec specific failure of a custom serializer
    Other(String),
}

impl SerializationErr {
    pub(crate) fn invalid(field: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            value: value.into(),
        }
    }
}

impl std::error::Error for SerializationErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Decode(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for SerializationErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decode(err) => write!(f, "Malformed payload: {err}"),
            Self::MissingField(field) => write!(f, "Missing required field '{field}'"),
            Self::InvalidField { field, value } => {
                write!(f, "Invalid value '{value}' for field '{field}'")
            }
            Self::Other(reason) => write!(f, "Serialization failed: {reason}"),
        }
    }
}

impl From<prost::DecodeError> for SerializationErr {
    fn from(value: prost::DecodeError) -> Self {
        Self::Decode(value)
    }
}

/// Converts messages to and from the bytes carried in one frame
pub trait MessageSerializer: Send + Sync + 'static {
    /// Encode a message
    fn serialize(&self, message: &Message) -> Result<Vec<u8>, SerializationErr>;

    /// Decode a message
    fn deserialize(&self, bytes: &[u8]) -> Result<Message, SerializationErr>;
}

/// The default protobuf codec
#[derive(Debug, Default, Clone, Copy)]
pub struct ProstSerializer;

impl MessageSerializer for ProstSerializer {
    fn serialize(&self, message: &Message) -> Result<Vec<u8>, SerializationErr> {
        Ok(encode_envelope(message).encode_to_vec())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Message, SerializationErr> {
        decode_envelope(Envelope::decode(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    use silo::concurrency::Duration;
    use silo::{
        Address, Body, ExceptionKind, Identity, InvokeRequest, RejectionType, RemoteException,
    };

    use super::*;

    fn request() -> Message {
        let target = Address::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 64001);
        let mut message = Message::request(
            target,
            Identity::service(),
            InvokeRequest::new(7, 11, vec![vec![1, 2], vec![], vec![3]])
                .with_timeout(Some(Duration::from_millis(1500))),
        )
        .with_sending_identity(Some(Identity::system_target(5)));
        message.sending_address = Some(Address::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 64000));
        message
    }

    #[test]
    fn request_survives_the_wire() {
        let serializer = ProstSerializer;
        let original = request();
        let bytes = serializer.serialize(&original).expect("Failed to serialize");
        let decoded = serializer.deserialize(&bytes).expect("Failed to deserialize");
        assert_eq!(original, decoded);
    }

    #[test]
    fn responses_keep_their_classification() {
        let serializer = ProstSerializer;
        let original = request();

        let rejection = original.create_rejection(RejectionType::Overloaded, "busy");
        let decoded = serializer
            .deserialize(&serializer.serialize(&rejection).expect("serialize"))
            .expect("deserialize");
        assert_eq!(Some(RejectionType::Overloaded), decoded.rejection_type);
        assert_eq!(Body::Rejection("busy".to_string()), decoded.body);

        let error = original.create_error(RemoteException::new(
            ExceptionKind::InvalidArgument,
            "arg",
            "bad",
        ));
        let decoded = serializer
            .deserialize(&serializer.serialize(&error).expect("serialize"))
            .expect("deserialize");
        assert_eq!(error, decoded);

        let unit = original.create_response(None);
        let decoded = serializer
            .deserialize(&serializer.serialize(&unit).expect("serialize"))
            .expect("deserialize");
        assert_eq!(Body::Value(None), decoded.body);
    }

    #[test]
    fn garbage_is_an_error() {
        let serializer = ProstSerializer;
        assert!(serializer.deserialize(&[0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn missing_target_is_reported() {
        let serializer = ProstSerializer;
        let mut envelope = encode_envelope(&request());
        envelope.target_address = None;
        let err = serializer
            .deserialize(&envelope.encode_to_vec())
            .expect_err("Decoded an envelope without target");
        assert!(matches!(err, SerializationErr::MissingField("target_address")));
    }
}
