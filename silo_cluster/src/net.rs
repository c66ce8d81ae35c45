// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! TCP plumbing between silos: framed connections, the per-address
//! connection pool and the accepting listener

use std::fmt::Display;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use silo::Address;

use crate::serializer::SerializationErr;

pub mod auth;
pub mod connection;
pub mod listener;
pub mod manager;

pub use auth::{AllowAll, Authenticator};
pub use connection::{Connection, ConnectionDirection, ConnectionHandler};
pub use listener::Listener;
pub use manager::{ConnectionEvent, ConnectionManager, Connector, TcpConnector};

/// The largest frame accepted from a peer. Longer frames close the connection.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Boxed read half of a transport
pub type BoxRead = Box<dyn AsyncRead + Send + Unpin>;
/// Boxed write half of a transport
pub type BoxWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// A connected byte stream, split into halves
pub struct NetworkStream {
    pub(crate) reader: BoxRead,
    pub(crate) writer: BoxWrite,
    pub(crate) peer: Option<SocketAddr>,
}

impl NetworkStream {
    /// Wrap arbitrary halves (in-memory pipes, tunnels, ...)
    pub fn new(reader: BoxRead, writer: BoxWrite) -> Self {
        Self {
            reader,
            writer,
            peer: None,
        }
    }

    /// Wrap a TCP stream
    pub fn from_tcp(stream: TcpStream) -> Self {
        let peer = stream.peer_addr().ok();
        if let Err(err) = stream.set_nodelay(true) {
            log::debug!("Failed to set TCP_NODELAY: {err}");
        }
        let (reader, writer) = stream.into_split();
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            peer,
        }
    }
}

/// A connection could not be established or used
#[derive(Debug)]
pub enum ConnectErr {
    /// Socket level failure
    Io(std::io::Error),
    /// The connection was closed before the message could be queued
    Closed(Option<Address>),
    /// The message could not be encoded
    Serialization(SerializationErr),
}

impl std::error::Error for ConnectErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Serialization(err) => Some(err),
            Self::Closed(_) => None,
        }
    }
}

impl Display for ConnectErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "Network error: {err}"),
            Self::Closed(Some(peer)) => write!(f, "Connection to {peer} is closed"),
            Self::Closed(None) => write!(f, "Connection is closed"),
            Self::Serialization(err) => write!(f, "{err}"),
        }
    }
}

impl From<std::io::Error> for ConnectErr {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<SerializationErr> for ConnectErr {
    fn from(value: SerializationErr) -> Self {
        Self::Serialization(value)
    }
}

impl From<ConnectErr> for silo::CallErr {
    fn from(value: ConnectErr) -> Self {
        silo::CallErr::Transport(value.to_string())
    }
}
