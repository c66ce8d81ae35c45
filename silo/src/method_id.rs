// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Stable cross-process identifiers for interfaces and methods.
//!
//! A method is identified by the SHA-256 of its canonical signature
//! `name<G1,G2>(P1,P2)`, folded down to 32 bits by XOR-ing the eight
//! successive 4-byte little-endian windows of the digest. Interfaces use the
//! same fold over their fully qualified name. Type names are compared as
//! whitespace-free token text, so `Vec < u8 >` and `Vec<u8>` hash the same.

use sha2::{Digest, Sha256};

/// SHA-256 the text and XOR-fold the digest to 32 bits
pub fn hash_fold(text: &str) -> u32 {
    Sha256::digest(text.as_bytes())
        .chunks_exact(4)
        .fold(0u32, |acc, window| {
            acc ^ u32::from_le_bytes([window[0], window[1], window[2], window[3]])
        })
}

/// Remove all whitespace from a type's token text
pub fn normalize_type_name(raw: &str) -> String {
    raw.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Build the canonical signature `name<generics>(params)`
pub fn canonical_signature<G, P>(name: &str, generic_args: &[G], param_types: &[P]) -> String
where
    G: AsRef<str>,
    P: AsRef<str>,
{
    let generics = generic_args
        .iter()
        .map(|g| normalize_type_name(g.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    let params = param_types
        .iter()
        .map(|p| normalize_type_name(p.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    format!("{name}<{generics}>({params})")
}

/// The id of a method with the given signature parts
pub fn method_id<G, P>(name: &str, generic_args: &[G], param_types: &[P]) -> u32
where
    G: AsRef<str>,
    P: AsRef<str>,
{
    hash_fold(&canonical_signature(name, generic_args, param_types))
}

/// The id of an interface with the given fully qualified name
pub fn interface_id(qualified_name: &str) -> u32 {
    hash_fold(qualified_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NONE: [&str; 0] = [];

    #[test]
    fn canonical_form() {
        assert_eq!(
            "say<>(String,String)",
            canonical_signature("say", &NONE, &["String", "String"])
        );
        assert_eq!("map<K,V>()", canonical_signature::<_, &str>("map", &["K", "V"], &[]));
        assert_eq!("f<>(Vec<u8>)", canonical_signature("f", &NONE, &["Vec < u8 >"]));
    }

    #[test]
    fn ids_are_stable() {
        // pinned so a change to the scheme cannot slip in unnoticed
        let digest = Sha256::digest(b"say<>(String,String)");
        let expected = digest.chunks_exact(4).fold(0u32, |acc, w| {
            acc ^ (w[0] as u32 | (w[1] as u32) << 8 | (w[2] as u32) << 16 | (w[3] as u32) << 24)
        });
        assert_eq!(expected, method_id("say", &NONE, &["String", "String"]));
        assert_eq!(
            method_id("say", &NONE, &["String", "String"]),
            method_id("say", &NONE, &["String", "String"])
        );
    }

    #[test]
    fn ids_depend_on_parameter_types() {
        let base = method_id("say", &NONE, &["String", "String"]);
        assert_ne!(base, method_id("say", &NONE, &["String", "u32"]));
        assert_ne!(base, method_id("say", &NONE, &["String"]));
        assert_ne!(base, method_id("say", &["T"], &["String", "String"]));
        assert_ne!(base, method_id("greet", &NONE, &["String", "String"]));
    }

    #[test]
    fn interface_ids_use_the_same_fold() {
        assert_eq!(hash_fold("demo::Hello"), interface_id("demo::Hello"));
        assert_ne!(interface_id("demo::Hello"), interface_id("demo::Goodbye"));
    }
}
