// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Network addresses of silos. Only IP literals are accepted, there is no name
//! resolution anywhere in the runtime.

use std::fmt::Display;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

/// An `ip:port` endpoint a silo listens on
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct Address {
    host: IpAddr,
    port: u16,
}

/// Failure to parse an [Address] from text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressParseErr {
    /// No `:port` suffix was found
    MissingPort(String),
    /// The host part is not an IPv4 or IPv6 literal
    InvalidHost(String),
    /// The port is not a decimal number in `0..=65535`
    InvalidPort(String),
}

impl Display for AddressParseErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingPort(text) => write!(f, "Address '{text}' has no port"),
            Self::InvalidHost(host) => write!(f, "'{host}' is not an IP literal"),
            Self::InvalidPort(port) => write!(f, "'{port}' is not a valid port"),
        }
    }
}

impl std::error::Error for AddressParseErr {}

impl Address {
    /// Build an address from its parts
    pub const fn new(host: IpAddr, port: u16) -> Self {
        Self { host, port }
    }

    /// The host IP
    pub fn host(&self) -> IpAddr {
        self.host
    }

    /// The port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Same host with a different port
    pub fn with_port(&self, port: u16) -> Self {
        Self::new(self.host, port)
    }

    /// Parse `"<ip>:<port>"`. IPv6 hosts may be bracketed (`"[::1]:80"`), an
    /// unbracketed IPv6 host is split on its last colon.
    pub fn parse(text: &str) -> Result<Self, AddressParseErr> {
        let (host, port) = if let Some(rest) = text.strip_prefix('[') {
            let (host, port) = rest
                .split_once("]:")
                .ok_or_else(|| AddressParseErr::MissingPort(text.to_string()))?;
            (host, port)
        } else {
            text.rsplit_once(':')
                .ok_or_else(|| AddressParseErr::MissingPort(text.to_string()))?
        };

        let host = host
            .parse::<IpAddr>()
            .map_err(|_| AddressParseErr::InvalidHost(host.to_string()))?;
        if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AddressParseErr::InvalidPort(port.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| AddressParseErr::InvalidPort(port.to_string()))?;
        Ok(Self::new(host, port))
    }

    /// Parse, discarding the reason on failure
    pub fn try_parse(text: &str) -> Option<Self> {
        Self::parse(text).ok()
    }

    /// The socket address to bind or dial
    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.host {
            IpAddr::V4(ip) => write!(f, "{ip}:{}", self.port),
            IpAddr::V6(ip) => write!(f, "[{ip}]:{}", self.port),
        }
    }
}

impl FromStr for Address {
    type Err = AddressParseErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<SocketAddr> for Address {
    fn from(value: SocketAddr) -> Self {
        Self::new(value.ip(), value.port())
    }
}

impl From<Address> for SocketAddr {
    fn from(value: Address) -> Self {
        value.to_socket_addr()
    }
}
