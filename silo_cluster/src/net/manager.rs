// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The connection pool: at most one live connection per remote silo address,
//! dialed on demand and shared by both directions.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use dashmap::DashMap;

use silo::concurrency::{broadcast, AsyncMutex, BroadcastReceiver, BroadcastSender};
use silo::Address;

use super::{ConnectErr, Connection, ConnectionDirection, ConnectionHandler, NetworkStream};
use crate::serializer::MessageSerializer;

const EVENT_BUFFER: usize = 64;

/// Opens transports to remote silos
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Dial `address`
    async fn connect(&self, address: Address) -> Result<NetworkStream, ConnectErr>;
}

/// Dials plain TCP
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

#[async_trait::async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, address: Address) -> Result<NetworkStream, ConnectErr> {
        let stream = tokio::net::TcpStream::connect(address.to_socket_addr()).await?;
        Ok(NetworkStream::from_tcp(stream))
    }
}

/// Pool membership changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The live connection to a silo went away
    Disconnected(Address),
}

#[derive(Default)]
struct Entry {
    dial: AsyncMutex<()>,
    current: Mutex<Option<Arc<Connection>>>,
}

impl Entry {
    fn current(&self) -> MutexGuard<'_, Option<Arc<Connection>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn live(&self) -> Option<Arc<Connection>> {
        self.current().as_ref().filter(|c| c.is_alive()).cloned()
    }
}

/// Keyed pool of connections
pub struct ConnectionManager {
    entries: DashMap<Address, Arc<Entry>>,
    connector: Arc<dyn Connector>,
    serializer: Arc<dyn MessageSerializer>,
    buffer_size: usize,
    handler: Weak<dyn ConnectionHandler>,
    events: BroadcastSender<ConnectionEvent>,
}

impl ConnectionManager {
    /// Create an empty pool. Dialed connections report to `handler`.
    pub fn new(
        connector: Arc<dyn Connector>,
        serializer: Arc<dyn MessageSerializer>,
        buffer_size: usize,
        handler: Weak<dyn ConnectionHandler>,
    ) -> Self {
        let (events, _) = broadcast(EVENT_BUFFER);
        Self {
            entries: DashMap::new(),
            connector,
            serializer,
            buffer_size,
            handler,
            events,
        }
    }

    fn entry(&self, address: Address) -> Arc<Entry> {
        self.entries.entry(address).or_default().value().clone()
    }

    /// The live connection to `address`, dialing one if needed. Concurrent
    /// callers for one address share a single dial.
    pub async fn get_connection(&self, address: Address) -> Result<Arc<Connection>, ConnectErr> {
        let entry = self.entry(address);
        if let Some(connection) = entry.live() {
            return Ok(connection);
        }

        let _dialing = entry.dial.lock().await;
        if let Some(connection) = entry.live() {
            return Ok(connection);
        }

        log::debug!("Dialing {address}");
        let stream = self.connector.connect(address).await?;
        let connection = Connection::start(
            stream,
            ConnectionDirection::Outbound,
            self.serializer.clone(),
            self.buffer_size,
            self.handler.clone(),
        );
        connection.set_peer(address);
        *entry.current() = Some(connection.clone());
        Ok(connection)
    }

    /// Adopt an accepted connection for its peer's self-reported address.
    /// Returns [false] if a live connection to that address already exists.
    pub fn register_inbound(&self, address: Address, connection: Arc<Connection>) -> bool {
        let entry = self.entry(address);
        let mut current = entry.current();
        if current.as_ref().map(|c| c.is_alive()).unwrap_or(false) {
            return false;
        }
        log::debug!("Registered inbound connection {} for {address}", connection.id());
        *current = Some(connection);
        true
    }

    /// Forget a closed connection, but only if it is still the one pooled
    /// for its peer
    pub fn connection_closed(&self, connection: &Arc<Connection>) {
        let Some(address) = connection.peer() else {
            return;
        };
        let Some(entry) = self.entries.get(&address).map(|e| e.value().clone()) else {
            return;
        };
        let cleared = {
            let mut current = entry.current();
            match current.as_ref() {
                Some(pooled) if pooled.id() == connection.id() => {
                    *current = None;
                    true
                }
                _ => false,
            }
        };
        if cleared {
            log::info!("Connection to {address} lost");
            // nobody listening is fine
            let _ = self.events.send(ConnectionEvent::Disconnected(address));
        }
    }

    /// Listen for disconnects
    pub fn subscribe(&self) -> BroadcastReceiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Returns [true] if a live connection to `address` is pooled
    pub fn is_connected(&self, address: &Address) -> bool {
        self.entries
            .get(address)
            .map(|entry| entry.live().is_some())
            .unwrap_or(false)
    }

    /// Every address with a live pooled connection
    pub fn connected_peers(&self) -> Vec<Address> {
        let mut peers = self
            .entries
            .iter()
            .filter(|kvp| kvp.value().live().is_some())
            .map(|kvp| *kvp.key())
            .collect::<Vec<_>>();
        peers.sort();
        peers
    }

    /// Shut down every pooled connection
    pub fn close_all(&self) {
        let connections = self
            .entries
            .iter()
            .filter_map(|kvp| kvp.value().current().clone())
            .collect::<Vec<_>>();
        for connection in connections {
            connection.shutdown();
        }
    }
}
