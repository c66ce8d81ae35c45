// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Programmatic configuration of the silo's listeners and membership

use std::fmt::Display;

use silo::concurrency::Duration;
use silo::Address;

/// The default accept backlog
pub const DEFAULT_BACKLOG: u32 = 1024;
/// The default cap on concurrently open inbound connections
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;
/// The default socket and frame reader buffer size
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;
/// The default wait for a response
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// The default period of the membership liveness check
pub const DEFAULT_MEMBERSHIP_UPDATE_PERIOD: Duration = Duration::from_secs(5);

/// Invalid configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigErr {
    /// A numeric option must be non-zero
    Zero(&'static str),
    /// A duration option must be non-zero
    ZeroDuration(&'static str),
    /// The gateway points its membership at its own listener
    ClusterIsSelf(Address),
    /// Neither a gateway nor a cluster listener was configured
    NoListener,
}

impl std::error::Error for ConfigErr {}

impl Display for ConfigErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Zero(option) => write!(f, "'{option}' must be greater than zero"),
            Self::ZeroDuration(option) => write!(f, "'{option}' must be a non-zero duration"),
            Self::ClusterIsSelf(address) => write!(
                f,
                "The gateway's cluster address {address} is its own listener"
            ),
            Self::NoListener => write!(f, "A silo needs a gateway or a cluster listener"),
        }
    }
}

/// Options of one listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerOptions {
    /// The address bound locally. Port 0 picks a free port on bind.
    pub inside_address: Address,
    /// The address advertised to peers, defaults to the inside address
    pub outside_address: Option<Address>,
    /// Accept backlog
    pub backlog: u32,
    /// Inbound connections beyond this are closed right after accept
    pub max_connections: usize,
    /// Socket and frame reader buffer size in bytes
    pub buffer_size: usize,
    /// How long a request waits for its response
    pub request_timeout: Duration,
    /// In-flight messages per activation beyond which requests are rejected,
    /// 0 disables rejection
    pub overloaded: usize,
}

impl ListenerOptions {
    /// Options with defaults listening on `inside_address`
    pub fn new(inside_address: Address) -> Self {
        Self {
            inside_address,
            outside_address: None,
            backlog: DEFAULT_BACKLOG,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            buffer_size: DEFAULT_BUFFER_SIZE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            overloaded: 0,
        }
    }

    /// Set the advertised address
    pub fn with_outside_address(mut self, address: Address) -> Self {
        self.outside_address = Some(address);
        self
    }

    /// Set the accept backlog
    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Set the connection cap
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Set the buffer size
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Set the request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the overload threshold
    pub fn with_overloaded(mut self, threshold: usize) -> Self {
        self.overloaded = threshold;
        self
    }

    /// The address peers use to reach this listener
    pub fn advertised_address(&self) -> Address {
        self.outside_address.unwrap_or(self.inside_address)
    }

    /// Check the options for values which can never work
    pub fn validate(&self) -> Result<(), ConfigErr> {
        if self.backlog == 0 {
            return Err(ConfigErr::Zero("backlog"));
        }
        if self.max_connections == 0 {
            return Err(ConfigErr::Zero("max_connections"));
        }
        if self.buffer_size == 0 {
            return Err(ConfigErr::Zero("buffer_size"));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigErr::ZeroDuration("request_timeout"));
        }
        Ok(())
    }
}

/// Options of a gateway silo, which hosts services and joins a cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayOptions {
    /// The gateway listener
    pub listener: ListenerOptions,
    /// The coordinator's address
    pub cluster: Address,
    /// Period of the membership liveness check
    pub membership_update_period: Duration,
}

impl GatewayOptions {
    /// Options with defaults
    pub fn new(inside_address: Address, cluster: Address) -> Self {
        Self {
            listener: ListenerOptions::new(inside_address),
            cluster,
            membership_update_period: DEFAULT_MEMBERSHIP_UPDATE_PERIOD,
        }
    }

    /// Replace the listener options
    pub fn with_listener(mut self, listener: ListenerOptions) -> Self {
        self.listener = listener;
        self
    }

    /// Set the membership check period
    pub fn with_membership_update_period(mut self, period: Duration) -> Self {
        self.membership_update_period = period;
        self
    }

    /// Check the options for values which can never work
    pub fn validate(&self) -> Result<(), ConfigErr> {
        self.listener.validate()?;
        if self.membership_update_period.is_zero() {
            return Err(ConfigErr::ZeroDuration("membership_update_period"));
        }
        if self.cluster == self.listener.advertised_address() && self.cluster.port() != 0 {
            return Err(ConfigErr::ClusterIsSelf(self.cluster));
        }
        Ok(())
    }
}

/// Options of the coordinator listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterOptions {
    /// The coordinator listener
    pub listener: ListenerOptions,
}

impl ClusterOptions {
    /// Options with defaults
    pub fn new(inside_address: Address) -> Self {
        Self {
            listener: ListenerOptions::new(inside_address),
        }
    }

    /// Replace the listener options
    pub fn with_listener(mut self, listener: ListenerOptions) -> Self {
        self.listener = listener;
        self
    }

    /// Check the options for values which can never work
    pub fn validate(&self) -> Result<(), ConfigErr> {
        self.listener.validate()
    }
}
