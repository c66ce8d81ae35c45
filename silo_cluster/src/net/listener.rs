// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! TCP server accepting connections from peer silos

use std::sync::{Arc, Weak};

use tokio::net::{TcpListener, TcpSocket};

use silo::concurrency::JoinHandle;
use silo::{Address, ShutdownSignal};

use super::{
    Authenticator, ConnectErr, Connection, ConnectionDirection, ConnectionHandler, NetworkStream,
};
use crate::config::ListenerOptions;
use crate::serializer::MessageSerializer;

/// A bound, not yet accepting, listener
pub struct Listener {
    listener: TcpListener,
    options: ListenerOptions,
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("options", &self.options)
            .finish()
    }
}

/// What accepted connections are wired to
pub(crate) struct AcceptContext {
    pub(crate) handler: Weak<dyn ConnectionHandler>,
    pub(crate) serializer: Arc<dyn MessageSerializer>,
    pub(crate) authenticator: Arc<dyn Authenticator>,
    pub(crate) shutdown: ShutdownSignal,
}

impl Listener {
    /// Bind the inside address with the configured backlog and buffer sizes.
    /// Must be called from within the runtime.
    pub fn bind(options: &ListenerOptions) -> Result<Self, ConnectErr> {
        let local = options.inside_address.to_socket_addr();
        let socket = if local.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        let buffer = u32::try_from(options.buffer_size).unwrap_or(u32::MAX);
        if let Err(err) = socket.set_recv_buffer_size(buffer) {
            log::debug!("Failed to size the receive buffer of {local}: {err}");
        }
        if let Err(err) = socket.set_send_buffer_size(buffer) {
            log::debug!("Failed to size the send buffer of {local}: {err}");
        }
        socket.bind(local)?;
        let listener = socket.listen(options.backlog)?;

        // port 0 resolves to the port the OS picked
        let bound = listener.local_addr()?;
        let mut options = options.clone();
        options.inside_address = Address::from(bound);
        if let Some(outside) = options.outside_address {
            if outside.port() == 0 {
                options.outside_address = Some(outside.with_port(bound.port()));
            }
        }
        log::info!("Listening on {}", options.inside_address);
        Ok(Self { listener, options })
    }

    /// The effective options, with the bound port filled in
    pub fn options(&self) -> &ListenerOptions {
        &self.options
    }

    /// The address peers use to reach this listener
    pub fn advertised_address(&self) -> Address {
        self.options.advertised_address()
    }

    /// Run the accept loop until the shutdown signal is raised
    pub(crate) fn serve(self, context: AcceptContext) -> JoinHandle<()> {
        silo::concurrency::spawn(self.accept_loop(context))
    }

    async fn accept_loop(self, context: AcceptContext) {
        let mut live: Vec<Weak<Connection>> = Vec::new();
        loop {
            let accepted = tokio::select! {
                _ = context.shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };
            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    log::warn!("Error accepting socket on {}: {err}", self.options.inside_address);
                    continue;
                }
            };

            live.retain(|c| c.upgrade().map(|c| c.is_alive()).unwrap_or(false));
            if live.len() >= self.options.max_connections {
                log::warn!(
                    "Refusing {peer}, {} connections are open on {}",
                    live.len(),
                    self.options.inside_address
                );
                drop(stream);
                continue;
            }
            if !context.authenticator.authenticate(Some(peer)).await {
                log::warn!("Peer {peer} failed authentication");
                drop(stream);
                continue;
            }

            let connection = Connection::start(
                NetworkStream::from_tcp(stream),
                ConnectionDirection::Inbound,
                context.serializer.clone(),
                self.options.buffer_size,
                context.handler.clone(),
            );
            log::info!("TCP connection {} opened for {peer}", connection.id());
            live.push(Arc::downgrade(&connection));
        }

        log::info!("Listener on {} stopped", self.options.inside_address);
        for connection in live.iter().filter_map(Weak::upgrade) {
            connection.shutdown();
        }
    }
}
