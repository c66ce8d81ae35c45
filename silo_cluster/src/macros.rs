// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Macro helpers for wire types

/// Implement [silo::BytesConvertable] for a domain type through its prost
/// counterpart. The domain type must convert `Into` the proto type, and the
/// proto type `TryInto` the domain type with a [crate::SerializationErr].
///
/// The encoding is length delimited so the payload may be embedded in other
/// byte streams.
#[macro_export]
macro_rules! derive_bytes_convertable_via_prost {
    {$ty:ty, $proto:ty} => {
        impl ::silo::BytesConvertable for $ty {
            fn into_bytes(self) -> Vec<u8> {
                <$proto as ::prost::Message>::encode_length_delimited_to_vec(&<$proto>::from(self))
            }
            fn from_bytes(bytes: Vec<u8>) -> Result<Self, ::silo::DecodeErr> {
                let buffer = ::bytes::Bytes::from(bytes);
                let proto = <$proto as ::prost::Message>::decode_length_delimited(buffer)
                    .map_err(|err| ::silo::DecodeErr::new(stringify!($ty), err.to_string()))?;
                <$ty>::try_from(proto).map_err(|err: $crate::SerializationErr| {
                    ::silo::DecodeErr::new(stringify!($ty), err.to_string())
                })
            }
        }
    };
}
