// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Conversion of method arguments and return values to and from the byte
//! payloads carried inside an [crate::InvokeRequest].
//!
//! Implement [BytesConvertable] for any type that crosses a service contract.
//! Numeric primitives use a fixed-width big-endian encoding, strings are UTF-8
//! and collections are length-prefixed.

use crate::errors::DecodeErr;
use crate::{Address, Category, Identity};

/// A type which can be encoded to and decoded from a byte payload
pub trait BytesConvertable: Sized {
    /// Encode into bytes
    fn into_bytes(self) -> Vec<u8>;

    /// Decode from bytes
    fn from_bytes(bytes: Vec<u8>) -> Result<Self, DecodeErr>;
}

fn fixed<const N: usize>(bytes: Vec<u8>, target: &'static str) -> Result<[u8; N], DecodeErr> {
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| DecodeErr::new(target, format!("expected {N} bytes, found {len}")))
}

macro_rules! impl_bytes_convertable_for_number {
    ($($ty: ty),*) => {
        $(
            impl BytesConvertable for $ty {
                fn into_bytes(self) -> Vec<u8> {
                    self.to_be_bytes().to_vec()
                }

                fn from_bytes(bytes: Vec<u8>) -> Result<Self, DecodeErr> {
                    Ok(<$ty>::from_be_bytes(fixed(bytes, stringify!($ty))?))
                }
            }
        )*
    };
}

impl_bytes_convertable_for_number!(
    u8, u16, u32, u64, u128, i8, i16, i32, i64, i128, f32, f64
);

impl BytesConvertable for () {
    fn into_bytes(self) -> Vec<u8> {
        Vec::new()
    }

    fn from_bytes(_bytes: Vec<u8>) -> Result<Self, DecodeErr> {
        Ok(())
    }
}

impl BytesConvertable for bool {
    fn into_bytes(self) -> Vec<u8> {
        vec![self as u8]
    }

    fn from_bytes(bytes: Vec<u8>) -> Result<Self, DecodeErr> {
        match bytes.as_slice() {
            [0] => Ok(false),
            [1] => Ok(true),
            other => Err(DecodeErr::new("bool", format!("invalid encoding {other:?}"))),
        }
    }
}

impl BytesConvertable for char {
    fn into_bytes(self) -> Vec<u8> {
        (self as u32).into_bytes()
    }

    fn from_bytes(bytes: Vec<u8>) -> Result<Self, DecodeErr> {
        let raw = u32::from_bytes(bytes)?;
        char::from_u32(raw)
            .ok_or_else(|| DecodeErr::new("char", format!("{raw:#x} is not a scalar value")))
    }
}

impl BytesConvertable for String {
    fn into_bytes(self) -> Vec<u8> {
        self.into_bytes()
    }

    fn from_bytes(bytes: Vec<u8>) -> Result<Self, DecodeErr> {
        String::from_utf8(bytes).map_err(|err| DecodeErr::new("String", err.to_string()))
    }
}

/// Split a length-prefixed sequence of items
fn split_prefixed(bytes: &[u8], target: &'static str) -> Result<Vec<Vec<u8>>, DecodeErr> {
    let mut items = Vec::new();
    let mut rest = bytes;
    while !rest.is_empty() {
        if rest.len() < 8 {
            return Err(DecodeErr::new(target, "truncated length prefix"));
        }
        let (len, tail) = rest.split_at(8);
        let len = u64::from_be_bytes(fixed(len.to_vec(), target)?) as usize;
        if tail.len() < len {
            return Err(DecodeErr::new(target, "truncated item"));
        }
        let (item, tail) = tail.split_at(len);
        items.push(item.to_vec());
        rest = tail;
    }
    Ok(items)
}

fn push_prefixed(out: &mut Vec<u8>, item: Vec<u8>) {
    out.extend_from_slice(&(item.len() as u64).to_be_bytes());
    out.extend(item);
}

impl<T: BytesConvertable> BytesConvertable for Vec<T> {
    fn into_bytes(self) -> Vec<u8> {
        let mut out = Vec::new();
        for item in self {
            push_prefixed(&mut out, item.into_bytes());
        }
        out
    }

    fn from_bytes(bytes: Vec<u8>) -> Result<Self, DecodeErr> {
        split_prefixed(&bytes, "Vec")?
            .into_iter()
            .map(T::from_bytes)
            .collect()
    }
}

impl<T: BytesConvertable> BytesConvertable for Option<T> {
    fn into_bytes(self) -> Vec<u8> {
        match self {
            None => vec![0],
            Some(value) => {
                let mut out = vec![1];
                out.extend(value.into_bytes());
                out
            }
        }
    }

    fn from_bytes(mut bytes: Vec<u8>) -> Result<Self, DecodeErr> {
        match bytes.first() {
            Some(0) if bytes.len() == 1 => Ok(None),
            Some(1) => {
                bytes.remove(0);
                T::from_bytes(bytes).map(Some)
            }
            _ => Err(DecodeErr::new("Option", "invalid tag")),
        }
    }
}

impl BytesConvertable for Identity {
    fn into_bytes(self) -> Vec<u8> {
        let mut out = self.key().to_be_bytes().to_vec();
        out.push(match self.category() {
            Category::SystemTarget => 0,
            Category::Service => 1,
        });
        out
    }

    fn from_bytes(mut bytes: Vec<u8>) -> Result<Self, DecodeErr> {
        let category = match bytes.pop() {
            Some(0) => Category::SystemTarget,
            Some(1) => Category::Service,
            _ => return Err(DecodeErr::new("Identity", "invalid category")),
        };
        Ok(Identity::new(u128::from_bytes(bytes)?, category))
    }
}

impl BytesConvertable for Address {
    fn into_bytes(self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    fn from_bytes(bytes: Vec<u8>) -> Result<Self, DecodeErr> {
        let text = String::from_bytes(bytes)?;
        Address::parse(&text).map_err(|err| DecodeErr::new("Address", err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_need_exact_width() {
        assert_eq!(Ok(513u16), u16::from_bytes(vec![2, 1]));
        assert!(u32::from_bytes(vec![0, 1]).is_err());
    }

    #[test]
    fn strings_reject_invalid_utf8() {
        assert!(String::from_bytes(vec![0xff, 0xfe]).is_err());
        assert_eq!(
            Ok("hello".to_string()),
            String::from_bytes("hello".to_string().into_bytes())
        );
    }

    #[test]
    fn nested_collections() {
        let value = vec![Some("a".to_string()), None, Some(String::new())];
        let decoded = Vec::<Option<String>>::from_bytes(value.clone().into_bytes())
            .expect("Failed to decode nested collection");
        assert_eq!(value, decoded);

        assert!(Vec::<u8>::from_bytes(vec![0, 0, 0]).is_err());
    }

    #[test]
    fn unit_accepts_any_payload() {
        assert_eq!(Ok(()), <()>::from_bytes(vec![]));
        assert!(<()>::into_bytes(()).is_empty());
    }

    #[test]
    fn identities_and_addresses() {
        let id = Identity::service();
        assert_eq!(Ok(id), Identity::from_bytes(id.into_bytes()));

        let address = Address::parse("[::1]:4000").expect("Failed to parse address");
        assert_eq!(Ok(address), Address::from_bytes(address.into_bytes()));
    }
}
