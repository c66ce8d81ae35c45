// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! A bi-directional framed connection to a peer silo.
//!
//! Every connection runs a reader and a writer task. Should either of them
//! exit, the whole connection is shut down and its handler notified once.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use silo::concurrency::{mpsc_unbounded, MpscUnboundedReceiver, MpscUnboundedSender};
use silo::{Address, Message, ShutdownSignal};

use super::{BoxRead, BoxWrite, ConnectErr, NetworkStream, MAX_FRAME_BYTES};
use crate::serializer::MessageSerializer;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Read one `[u32 LE length][payload]` frame
pub(crate) async fn read_frame<R>(reader: &mut R) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32_le().await? as usize;
    if len > MAX_FRAME_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Frame of {len} bytes exceeds the {MAX_FRAME_BYTES} byte limit"),
        ));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Write one `[u32 LE length][payload]` frame
pub(crate) async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!(
                "Frame of {} bytes exceeds the {MAX_FRAME_BYTES} byte limit",
                payload.len()
            ),
        ));
    }
    writer.write_u32_le(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

/// Who opened the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionDirection {
    /// Accepted by our listener
    Inbound,
    /// Dialed by us
    Outbound,
}

/// Receives what a connection reads and learns when it closes
pub trait ConnectionHandler: Send + Sync + 'static {
    /// A message was decoded
    fn on_message(&self, connection: &Arc<Connection>, message: Message);

    /// The connection shut down. Called exactly once.
    fn on_disconnected(&self, connection: &Arc<Connection>);
}

/// A live connection's handle. Sending only queues the message, the writer
/// task owns the socket.
pub struct Connection {
    id: u64,
    direction: ConnectionDirection,
    socket_peer: Option<SocketAddr>,
    peer: OnceCell<Address>,
    outbound: MpscUnboundedSender<Message>,
    alive: AtomicBool,
    closed: ShutdownSignal,
    handler: Weak<dyn ConnectionHandler>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("peer", &self.peer.get())
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl Connection {
    /// Start the reader and writer tasks over a stream
    pub fn start(
        stream: NetworkStream,
        direction: ConnectionDirection,
        serializer: Arc<dyn MessageSerializer>,
        buffer_size: usize,
        handler: Weak<dyn ConnectionHandler>,
    ) -> Arc<Self> {
        let (outbound, rx) = mpsc_unbounded();
        let connection = Arc::new(Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            direction,
            socket_peer: stream.peer,
            peer: OnceCell::new(),
            outbound,
            alive: AtomicBool::new(true),
            closed: ShutdownSignal::new(),
            handler,
        });
        log::debug!(
            "Connection {} opened ({:?}, socket peer {:?})",
            connection.id,
            direction,
            connection.socket_peer
        );

        let reader = BufReader::with_capacity(buffer_size.max(1), stream.reader);
        silo::concurrency::spawn(Self::read_loop(connection.clone(), reader, serializer.clone()));
        silo::concurrency::spawn(Self::write_loop(
            connection.clone(),
            stream.writer,
            rx,
            serializer,
        ));
        connection
    }

    /// Process-unique connection id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Who opened the connection
    pub fn direction(&self) -> ConnectionDirection {
        self.direction
    }

    /// The silo address of the peer, once known
    pub fn peer(&self) -> Option<Address> {
        self.peer.get().copied()
    }

    /// The socket address of the peer, if the transport has one
    pub fn socket_peer(&self) -> Option<SocketAddr> {
        self.socket_peer
    }

    /// Record the peer's silo address. Returns [false] if it was already set.
    pub fn set_peer(&self, address: Address) -> bool {
        self.peer.set(address).is_ok()
    }

    /// Returns [true] until the connection shuts down
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Queue a message for transmission
    pub fn send(&self, message: Message) -> Result<(), ConnectErr> {
        if !self.is_alive() {
            return Err(ConnectErr::Closed(self.peer()));
        }
        self.outbound
            .send(message)
            .map_err(|_| ConnectErr::Closed(self.peer()))
    }

    /// Close the connection. Idempotent, the handler hears about it once.
    pub fn shutdown(self: &Arc<Self>) {
        if self.alive.swap(false, Ordering::AcqRel) {
            log::debug!("Connection {} to {:?} closed", self.id, self.peer());
            self.closed.cancel();
            if let Some(handler) = self.handler.upgrade() {
                handler.on_disconnected(self);
            }
        }
    }

    async fn read_loop(
        myself: Arc<Self>,
        mut reader: BufReader<BoxRead>,
        serializer: Arc<dyn MessageSerializer>,
    ) {
        loop {
            let frame = tokio::select! {
                _ = myself.closed.cancelled() => break,
                frame = read_frame(&mut reader) => frame,
            };
            match frame {
                Ok(bytes) => match serializer.deserialize(&bytes) {
                    Ok(message) => {
                        log::trace!(
                            "RECEIVE {:?} <- connection {} - '{message:?}'",
                            myself.peer(),
                            myself.id
                        );
                        match myself.handler.upgrade() {
                            Some(handler) => handler.on_message(&myself, message),
                            None => break,
                        }
                    }
                    Err(err) => {
                        log::warn!("Dropping undecodable frame on connection {}: {err}", myself.id);
                    }
                },
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                    log::debug!("Connection {} reached EOF", myself.id);
                    break;
                }
                Err(err) => {
                    log::warn!("Error reading from connection {}: {err}", myself.id);
                    break;
                }
            }
        }
        myself.shutdown();
    }

    async fn write_loop(
        myself: Arc<Self>,
        mut writer: BoxWrite,
        mut rx: MpscUnboundedReceiver<Message>,
        serializer: Arc<dyn MessageSerializer>,
    ) {
        loop {
            let message = tokio::select! {
                _ = myself.closed.cancelled() => break,
                message = rx.recv() => message,
            };
            let Some(message) = message else {
                break;
            };
            let payload = match serializer.serialize(&message) {
                Ok(payload) => payload,
                Err(err) => {
                    log::warn!("Failed to serialize message {}: {err}", message.id);
                    continue;
                }
            };
            log::trace!("SEND: connection {} -> {:?} - '{message:?}'", myself.id, myself.peer());
            if let Err(err) = write_frame(&mut writer, &payload).await {
                log::warn!("Error writing to connection {}: {err}", myself.id);
                break;
            }
        }
        myself.shutdown();
        if let Err(err) = writer.shutdown().await {
            log::trace!("Error closing connection {}: {err}", myself.id);
        }
    }
}
