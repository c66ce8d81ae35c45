// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The message center routes messages between local activations and remote
//! silos, correlates responses with pending requests, and dispatches
//! inbound invocations onto activations by their invocation policy.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use futures::FutureExt;

use silo::activation::QueuedMessage;
use silo::concurrency::{oneshot, Duration, Instant, OneshotSender};
use silo::{
    Activation, ActivationDirectory, Address, Body, CallContext, CallResult, InvocationPolicy,
    Message, MessageId, RejectionType, RemoteException, ShutdownSignal,
};

use crate::config::{ConfigErr, ListenerOptions};
use crate::net::{
    ConnectErr, Connection, ConnectionDirection, ConnectionHandler, ConnectionManager, Connector,
};
use crate::serializer::MessageSerializer;

/// Cheaply cloneable handle on the silo's dispatcher
#[derive(Clone)]
pub struct MessageCenter {
    inner: Arc<CenterInner>,
}

impl std::fmt::Debug for MessageCenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageCenter")
            .field("address", &self.silo_address())
            .field("pending", &self.inner.pending.len())
            .finish()
    }
}

struct CenterInner {
    myself: Weak<CenterInner>,
    gateway: Option<ListenerOptions>,
    cluster: Option<ListenerOptions>,
    directory: Arc<ActivationDirectory>,
    connections: ConnectionManager,
    serializer: Arc<dyn MessageSerializer>,
    pending: DashMap<MessageId, OneshotSender<Message>>,
    shutdown: ShutdownSignal,
}

/// Removes a pending request however its wait ends
struct PendingGuard<'a> {
    pending: &'a DashMap<MessageId, OneshotSender<Message>>,
    id: MessageId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl MessageCenter {
    /// Create the center for a silo with the given (already bound) listener
    /// options. At least one listener is required.
    pub fn new(
        gateway: Option<ListenerOptions>,
        cluster: Option<ListenerOptions>,
        directory: Arc<ActivationDirectory>,
        connector: Arc<dyn Connector>,
        serializer: Arc<dyn MessageSerializer>,
        shutdown: ShutdownSignal,
    ) -> Result<Self, ConfigErr> {
        if gateway.is_none() && cluster.is_none() {
            return Err(ConfigErr::NoListener);
        }
        let buffer_size = gateway
            .as_ref()
            .or(cluster.as_ref())
            .map(|options| options.buffer_size)
            .unwrap_or(crate::config::DEFAULT_BUFFER_SIZE);
        let inner = Arc::new_cyclic(|myself: &Weak<CenterInner>| {
            let handler: Weak<dyn ConnectionHandler> = myself.clone();
            CenterInner {
                myself: myself.clone(),
                gateway,
                cluster,
                directory,
                connections: ConnectionManager::new(
                    connector,
                    serializer.clone(),
                    buffer_size,
                    handler,
                ),
                serializer,
                pending: DashMap::new(),
                shutdown,
            }
        });
        Ok(Self { inner })
    }

    /// This silo's own address: the gateway's when it has one, otherwise the
    /// coordinator listener's
    pub fn silo_address(&self) -> Address {
        self.inner.silo_address()
    }

    /// Returns [true] if `address` is one of this silo's listeners
    pub fn is_local(&self, address: &Address) -> bool {
        self.inner.is_local(address)
    }

    /// The local activations
    pub fn directory(&self) -> &Arc<ActivationDirectory> {
        &self.inner.directory
    }

    /// The connection pool
    pub fn connections(&self) -> &ConnectionManager {
        &self.inner.connections
    }

    /// The process-wide cancellation signal
    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.inner.shutdown
    }

    /// The default wait for responses
    pub fn request_timeout(&self) -> Duration {
        self.inner
            .gateway
            .as_ref()
            .or(self.inner.cluster.as_ref())
            .map(|options| options.request_timeout)
            .unwrap_or(crate::config::DEFAULT_REQUEST_TIMEOUT)
    }

    /// Number of requests awaiting a response
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    pub(crate) fn serializer(&self) -> Arc<dyn MessageSerializer> {
        self.inner.serializer.clone()
    }

    pub(crate) fn connection_handler(&self) -> Weak<dyn ConnectionHandler> {
        let inner: Weak<CenterInner> = Arc::downgrade(&self.inner);
        inner
    }

    /// Route a message: in-process when the target is this silo, otherwise
    /// over the pooled connection to the target's silo
    pub async fn send_message(&self, message: Message) -> Result<(), ConnectErr> {
        self.inner.send_message(message).await
    }

    /// Send a request and wait for its response. The pending entry is
    /// removed whatever the outcome, late responses are dropped.
    pub async fn send_request(
        &self,
        message: Message,
        timeout: Option<Duration>,
    ) -> Result<CallResult<Option<Vec<u8>>>, ConnectErr> {
        let (tx, rx) = oneshot();
        let id = message.id;
        self.inner.pending.insert(id, tx);
        let _pending = PendingGuard {
            pending: &self.inner.pending,
            id,
        };

        self.send_message(message).await?;

        let wait = timeout.unwrap_or_else(|| self.request_timeout());
        Ok(match silo::concurrency::timeout(wait, rx).await {
            Ok(Ok(response)) => CallResult::from_response(response),
            Ok(Err(_)) => CallResult::SenderError,
            Err(_) => {
                log::debug!("Request {id} timed out after {wait:?}");
                CallResult::Timeout
            }
        })
    }

    /// Accept a message addressed to this silo
    pub fn receive_message(&self, message: Message) {
        self.inner.receive_message(message)
    }
}

impl CenterInner {
    fn listeners(&self) -> impl Iterator<Item = &ListenerOptions> {
        self.gateway.iter().chain(self.cluster.iter())
    }

    fn silo_address(&self) -> Address {
        self.listeners()
            .next()
            .map(ListenerOptions::advertised_address)
            .unwrap_or_else(|| Address::new(std::net::Ipv4Addr::UNSPECIFIED.into(), 0))
    }

    fn is_local(&self, address: &Address) -> bool {
        fn matches(options: &ListenerOptions, address: &Address) -> bool {
            options.advertised_address() == *address || options.inside_address == *address
        }
        self.listeners().any(|options| matches(options, address))
    }

    /// The overload threshold of the listener the target address names. The
    /// gateway wins unless only the coordinator listener matches.
    fn overload_threshold(&self, target: &Address) -> usize {
        let matches = |options: &&ListenerOptions| {
            options.advertised_address() == *target || options.inside_address == *target
        };
        let gateway = self.gateway.as_ref();
        let cluster = self.cluster.as_ref();
        match (gateway.filter(matches), cluster.filter(matches)) {
            (None, Some(cluster)) => cluster.overloaded,
            _ => gateway.or(cluster).map(|options| options.overloaded).unwrap_or(0),
        }
    }

    async fn send_message(&self, mut message: Message) -> Result<(), ConnectErr> {
        if message.sending_address.is_none() {
            message.sending_address = Some(self.silo_address());
        }
        if self.is_local(&message.target_address) {
            match self.myself.upgrade() {
                Some(this) => this.receive_message(message),
                None => return Err(ConnectErr::Closed(Some(message.target_address))),
            }
            return Ok(());
        }
        let connection = self
            .connections
            .get_connection(message.target_address)
            .await?;
        connection.send(message)
    }

    /// Send a response or rejection without blocking the caller
    fn reply(self: &Arc<Self>, response: Message) {
        let this = self.clone();
        silo::concurrency::spawn(async move {
            let id = response.id;
            let target = response.target_address;
            if let Err(err) = this.send_message(response).await {
                log::warn!("Failed to send response {id} to {target}: {err}");
            }
        });
    }

    fn receive_message(self: &Arc<Self>, message: Message) {
        if message.is_response() {
            match self.pending.remove(&message.id) {
                Some((_, tx)) => {
                    // the waiter may have just timed out
                    let _ = tx.send(message);
                }
                None => log::trace!("Dropping response {} without a pending request", message.id),
            }
            return;
        }

        if self.shutdown.is_cancelled() {
            log::debug!("Silo is stopping, refusing message {}", message.id);
            if !message.is_one_way() {
                self.reply(message.create_rejection(RejectionType::Transient, "silo is stopping"));
            }
            return;
        }

        let activation = message
            .target_identity
            .and_then(|identity| self.directory.get(&identity));
        let Some(activation) = activation else {
            log::warn!(
                "Message {} targets unknown service {:?}",
                message.id,
                message.target_identity
            );
            if !message.is_one_way() {
                let exception = RemoteException::service_not_found(message.target_identity);
                self.reply(message.create_error(exception));
            }
            return;
        };

        let threshold = self.overload_threshold(&message.target_address);
        let Some(guard) = activation.try_admit(threshold) else {
            log::warn!(
                "Activation {} is overloaded ({} in flight), rejecting message {}",
                activation.identity(),
                activation.in_flight(),
                message.id
            );
            if !message.is_one_way() {
                self.reply(message.create_rejection(
                    RejectionType::Overloaded,
                    format!("{} has {threshold} messages in flight", activation.identity()),
                ));
            }
            return;
        };

        match activation.policy() {
            InvocationPolicy::Multi => {
                let this = self.clone();
                silo::concurrency::spawn(async move {
                    this.execute(&activation, message).await;
                    drop(guard);
                });
            }
            InvocationPolicy::Single => {
                if activation.mailbox().enqueue((message, guard)) {
                    let this = self.clone();
                    silo::concurrency::spawn(async move { this.drain(activation).await });
                }
            }
        }
    }

    /// The single drain loop of a `Single` activation
    async fn drain(self: Arc<Self>, activation: Arc<Activation>) {
        while let Some(item) = activation.mailbox().next() {
            if self.shutdown.is_cancelled() || activation.is_killed() {
                let mut abandoned = vec![item];
                abandoned.extend(activation.mailbox().abandon());
                self.refuse_abandoned(&activation, abandoned);
                break;
            }
            let (message, guard) = item;
            self.execute(&activation, message).await;
            drop(guard);
        }
    }

    /// Answer the queued requests of an activation which will never run
    /// them. A stopping silo rejects them as transient, a killed activation
    /// reports the service as gone.
    fn refuse_abandoned(self: &Arc<Self>, activation: &Activation, abandoned: Vec<QueuedMessage>) {
        let identity = activation.identity();
        let stopping = self.shutdown.is_cancelled();
        log::debug!(
            "Refusing {} queued message(s) of {identity} ({})",
            abandoned.len(),
            if stopping { "silo is stopping" } else { "activation was killed" }
        );
        for (message, guard) in abandoned {
            drop(guard);
            if message.is_one_way() {
                continue;
            }
            let answer = if stopping {
                message.create_rejection(RejectionType::Transient, "silo is stopping")
            } else {
                message.create_error(RemoteException::service_not_found(Some(identity)))
            };
            self.reply(answer);
        }
    }

    async fn execute(self: &Arc<Self>, activation: &Arc<Activation>, mut message: Message) {
        let request = match std::mem::replace(&mut message.body, Body::Empty) {
            Body::Request(request) => request,
            other => {
                log::warn!("Message {} is not an invocation: {other:?}", message.id);
                return;
            }
        };
        let method_id = request.method_id;
        let started = Instant::now();
        let invocation = activation.invoker().invoke(request);
        let outcome = CallContext::new(activation.identity())
            .scope(AssertUnwindSafe(invocation).catch_unwind())
            .await;
        activation.consuming_time().record(started.elapsed());

        let result = outcome.unwrap_or_else(|panic| {
            Err(RemoteException::panic(panic_message(panic.as_ref())))
        });
        match result {
            Ok(value) => {
                if !message.is_one_way() {
                    self.reply(message.create_response(value));
                }
            }
            Err(exception) => {
                log::warn!(
                    "Invocation of {} on {} failed: {exception}",
                    activation.descriptor().describe_method(method_id),
                    activation.identity()
                );
                if !message.is_one_way() {
                    self.reply(message.create_error(exception));
                }
            }
        }
    }
}

impl ConnectionHandler for CenterInner {
    fn on_message(&self, connection: &Arc<Connection>, message: Message) {
        if connection.direction() == ConnectionDirection::Inbound && connection.peer().is_none() {
            if let Some(address) = message.sending_address {
                if connection.set_peer(address) {
                    self.connections.register_inbound(address, connection.clone());
                }
            }
        }
        if let Some(this) = self.myself.upgrade() {
            this.receive_message(message);
        }
    }

    fn on_disconnected(&self, connection: &Arc<Connection>) {
        self.connections.connection_closed(connection);
    }
}

#[cfg(test)]
mod tests;
