// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Identities of addressable targets. An [Identity] names a service instance
//! or a system target for the lifetime of a cluster and is the key every
//! message is routed on.

use std::fmt::Display;
use std::str::FromStr;

/// The kind of addressable target an [Identity] names
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub enum Category {
    /// A runtime-owned target with a well-known key (e.g. membership services)
    SystemTarget,
    /// A user service instance
    Service,
}

impl Category {
    fn label(&self) -> &'static str {
        match self {
            Self::SystemTarget => "sys",
            Self::Service => "svc",
        }
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// The unique identity of an addressable target
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct Identity {
    key: u128,
    category: Category,
}

impl Identity {
    /// Build an identity from an explicit key
    pub const fn new(key: u128, category: Category) -> Self {
        Self { key, category }
    }

    /// A system target identity with a fixed, well-known key
    pub const fn system_target(key: u128) -> Self {
        Self::new(key, Category::SystemTarget)
    }

    /// A fresh random identity of the given category
    pub fn random(category: Category) -> Self {
        Self::new(rand::random::<u128>(), category)
    }

    /// A fresh random service identity
    pub fn service() -> Self {
        Self::random(Category::Service)
    }

    /// The 128-bit unique key
    pub fn key(&self) -> u128 {
        self.key
    }

    /// The category of target this identity names
    pub fn category(&self) -> Category {
        self.category
    }

    /// Returns [true] if this names a system target, [false] otherwise
    pub fn is_system_target(&self) -> bool {
        matches!(self.category, Category::SystemTarget)
    }

    /// Split the key into `(high, low)` 64-bit halves for wire encoding
    pub fn key_parts(&self) -> (u64, u64) {
        ((self.key >> 64) as u64, self.key as u64)
    }

    /// Rebuild an identity from the halves produced by [Identity::key_parts]
    pub fn from_key_parts(high: u64, low: u64, category: Category) -> Self {
        Self::new(((high as u128) << 64) | low as u128, category)
    }
}

impl Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{:032x}", self.category, self.key)
    }
}

/// Failure to parse the text form of an [Identity]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityParseErr(String);

impl Display for IdentityParseErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invalid identity '{}'", self.0)
    }
}

impl std::error::Error for IdentityParseErr {}

impl FromStr for Identity {
    type Err = IdentityParseErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || IdentityParseErr(s.to_string());
        let (category, key) = s.split_once('/').ok_or_else(err)?;
        let category = match category {
            "sys" => Category::SystemTarget,
            "svc" => Category::Service,
            _ => return Err(err()),
        };
        if key.is_empty() || key.len() > 32 {
            return Err(err());
        }
        let key = u128::from_str_radix(key, 16).map_err(|_| err())?;
        Ok(Self::new(key, category))
    }
}
