// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The silo host. Owns the directory, the lifecycle, the message center, the
//! listeners and the membership services of one process.
//!
//! ```no_run
//! use silo_cluster::{ClusterOptions, GatewayOptions, SiloBuilder};
//!
//! # async fn run() -> Result<(), silo_cluster::SiloErr> {
//! let coordinator = SiloBuilder::new()
//!     .cluster(ClusterOptions::new("127.0.0.1:64000".parse().unwrap()))
//!     .build()
//!     .await?;
//! coordinator.start().await?;
//!
//! let gateway = SiloBuilder::new()
//!     .gateway(GatewayOptions::new(
//!         "127.0.0.1:64001".parse().unwrap(),
//!         "127.0.0.1:64000".parse().unwrap(),
//!     ))
//!     .build()
//!     .await?;
//! gateway.start().await?;
//! # Ok(())
//! # }
//! ```

use std::fmt::Display;
use std::sync::{Arc, Mutex, PoisonError};

use silo::concurrency::{Duration, JoinHandle};
use silo::lifecycle::LifecycleErr;
use silo::{
    Activation, ActivationDirectory, ActivationErr, Address, CallErr, ContractErr, Identity,
    InvocationPolicy, LifecycleObservable, LifecycleObserver, LifecycleStage, MethodInvoker,
    Priority, RegistrationErr, ServiceContract, ShutdownSignal, SiloProcessingErr,
};

use crate::config::{ClusterOptions, ConfigErr, GatewayOptions};
use crate::membership::gateway::coordinator_reference;
use crate::membership::{
    ClusterMembership, ClusterMembershipContract, ClusterMembershipReference,
    ClusterMembershipService, GatewayMembershipContract, GatewayMembershipService,
    MembershipManager, CLUSTER_MEMBERSHIP, GATEWAY_MEMBERSHIP,
};
use crate::message_center::MessageCenter;
use crate::net::listener::AcceptContext;
use crate::net::{AllowAll, Authenticator, ConnectErr, Connector, Listener, TcpConnector};
use crate::reference::{ServiceTarget, SystemTarget};
use crate::serializer::{MessageSerializer, ProstSerializer};

/// Building or running a silo failed
#[derive(Debug)]
pub enum SiloErr {
    /// Invalid options
    Config(ConfigErr),
    /// A listener could not be bound
    Bind(ConnectErr),
    /// A built-in contract is invalid
    Contract(ContractErr),
    /// An identity is hosted twice
    Registration(RegistrationErr),
    /// A service failed to activate
    Activation(ActivationErr),
    /// Startup failed
    Lifecycle(LifecycleErr),
    /// System targets need a system target identity
    NotSystemTarget(Identity),
}

impl std::error::Error for SiloErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Bind(err) => Some(err),
            Self::Contract(err) => Some(err),
            Self::Registration(err) => Some(err),
            Self::Activation(err) => Some(err),
            Self::Lifecycle(err) => Some(err),
            Self::NotSystemTarget(_) => None,
        }
    }
}

impl Display for SiloErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "Invalid configuration: {err}"),
            Self::Bind(err) => write!(f, "Failed to bind listener: {err}"),
            Self::Contract(err) => write!(f, "{err}"),
            Self::Registration(err) => write!(f, "{err}"),
            Self::Activation(err) => write!(f, "{err}"),
            Self::Lifecycle(err) => write!(f, "{err}"),
            Self::NotSystemTarget(identity) => {
                write!(f, "{identity} is not a system target identity")
            }
        }
    }
}

impl From<ConfigErr> for SiloErr {
    fn from(value: ConfigErr) -> Self {
        Self::Config(value)
    }
}

impl From<ConnectErr> for SiloErr {
    fn from(value: ConnectErr) -> Self {
        Self::Bind(value)
    }
}

impl From<ContractErr> for SiloErr {
    fn from(value: ContractErr) -> Self {
        Self::Contract(value)
    }
}

impl From<RegistrationErr> for SiloErr {
    fn from(value: RegistrationErr) -> Self {
        Self::Registration(value)
    }
}

impl From<ActivationErr> for SiloErr {
    fn from(value: ActivationErr) -> Self {
        Self::Activation(value)
    }
}

impl From<LifecycleErr> for SiloErr {
    fn from(value: LifecycleErr) -> Self {
        Self::Lifecycle(value)
    }
}

/// Configures a [Silo]
pub struct SiloBuilder {
    gateway: Option<GatewayOptions>,
    cluster: Option<ClusterOptions>,
    serializer: Arc<dyn MessageSerializer>,
    connector: Arc<dyn Connector>,
    authenticator: Arc<dyn Authenticator>,
    statistics_period: Option<Duration>,
}

impl Default for SiloBuilder {
    fn default() -> Self {
        Self {
            gateway: None,
            cluster: None,
            serializer: Arc::new(ProstSerializer),
            connector: Arc::new(TcpConnector),
            authenticator: Arc::new(AllowAll),
            statistics_period: None,
        }
    }
}

impl SiloBuilder {
    /// A builder with no listeners
    pub fn new() -> Self {
        Self::default()
    }

    /// Host services and join the cluster through a gateway listener
    pub fn gateway(mut self, options: GatewayOptions) -> Self {
        self.gateway = Some(options);
        self
    }

    /// Run the cluster coordinator on its own listener
    pub fn cluster(mut self, options: ClusterOptions) -> Self {
        self.cluster = Some(options);
        self
    }

    /// Replace the message codec
    pub fn serializer(mut self, serializer: Arc<dyn MessageSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Replace how remote silos are dialed
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Replace the admission hook of accepted peers
    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    /// Log per-activation execution statistics every `period`
    pub fn statistics_period(mut self, period: Duration) -> Self {
        self.statistics_period = Some(period);
        self
    }

    /// Bind the listeners and assemble the silo. Nothing is served until
    /// [Silo::start].
    pub async fn build(self) -> Result<Silo, SiloErr> {
        if self.gateway.is_none() && self.cluster.is_none() {
            return Err(ConfigErr::NoListener.into());
        }
        if let Some(gateway) = &self.gateway {
            gateway.validate()?;
        }
        if let Some(cluster) = &self.cluster {
            cluster.validate()?;
        }

        let gateway_listener = self
            .gateway
            .as_ref()
            .map(|options| Listener::bind(&options.listener))
            .transpose()?;
        let cluster_listener = self
            .cluster
            .as_ref()
            .map(|options| Listener::bind(&options.listener))
            .transpose()?;

        let shutdown = ShutdownSignal::new();
        let directory = Arc::new(ActivationDirectory::new());
        let center = MessageCenter::new(
            gateway_listener.as_ref().map(|l| l.options().clone()),
            cluster_listener.as_ref().map(|l| l.options().clone()),
            directory.clone(),
            self.connector,
            self.serializer,
            shutdown.clone(),
        )?;
        let gateway_address = gateway_listener.as_ref().map(Listener::advertised_address);
        let cluster_address = cluster_listener.as_ref().map(Listener::advertised_address);
        let membership = Arc::new(MembershipManager::new());

        let coordinator_service = match cluster_listener.is_some() {
            true => {
                let service = ClusterMembershipService::new(center.clone());
                directory.register(Activation::new(
                    CLUSTER_MEMBERSHIP,
                    ClusterMembershipContract::invoker(service.clone())?,
                    Priority::System,
                    InvocationPolicy::Multi,
                ))?;
                Some(service)
            }
            false => None,
        };
        let gateway_service = match &self.gateway {
            Some(options) => {
                let service = GatewayMembershipService::new(
                    center.clone(),
                    options.cluster,
                    membership.clone(),
                    options.membership_update_period,
                );
                directory.register(Activation::new(
                    GATEWAY_MEMBERSHIP,
                    GatewayMembershipContract::invoker(service.clone())?,
                    Priority::System,
                    InvocationPolicy::Multi,
                ))?;
                Some(service)
            }
            None => None,
        };

        // a coordinator-only silo asks itself
        let coordinator_address = self
            .gateway
            .as_ref()
            .map(|options| options.cluster)
            .or(cluster_address)
            .ok_or(ConfigErr::NoListener)?;
        let coordinator = coordinator_reference(&center, coordinator_address);

        let lifecycle = LifecycleObservable::new();
        let listeners = gateway_listener
            .into_iter()
            .chain(cluster_listener)
            .collect::<Vec<_>>();
        lifecycle.subscribe(
            "listeners",
            LifecycleStage::Core,
            Arc::new(ListenerStage {
                listeners: Mutex::new(listeners),
                center: center.clone(),
                authenticator: self.authenticator,
            }),
        );
        lifecycle.subscribe(
            "directory.core",
            LifecycleStage::Core,
            directory.lifecycle_participant(Priority::Core),
        );
        lifecycle.subscribe(
            "directory.system",
            LifecycleStage::System,
            directory.lifecycle_participant(Priority::System),
        );
        if let Some(service) = &coordinator_service {
            lifecycle.subscribe(
                "membership.cluster",
                LifecycleStage::System,
                Arc::new(CoordinatorStage {
                    service: service.clone(),
                    shutdown: shutdown.clone(),
                }),
            );
        }
        if let Some(service) = &gateway_service {
            lifecycle.subscribe(
                "membership.gateway",
                LifecycleStage::Joining,
                Arc::new(JoinStage {
                    service: service.clone(),
                    shutdown: shutdown.clone(),
                }),
            );
        }
        lifecycle.subscribe(
            "directory.user",
            LifecycleStage::User,
            directory.lifecycle_participant(Priority::User),
        );

        Ok(Silo {
            inner: Arc::new(SiloInner {
                center,
                directory,
                lifecycle,
                membership,
                coordinator,
                coordinator_service,
                gateway_service,
                gateway_address,
                cluster_address,
                shutdown,
                statistics_period: self.statistics_period,
                statistics: Mutex::new(None),
            }),
        })
    }
}

/// Starts serving the bound listeners
struct ListenerStage {
    listeners: Mutex<Vec<Listener>>,
    center: MessageCenter,
    authenticator: Arc<dyn Authenticator>,
}

#[async_trait::async_trait]
impl LifecycleObserver for ListenerStage {
    async fn on_start(&self, _stage: LifecycleStage) -> Result<(), SiloProcessingErr> {
        let listeners = std::mem::take(
            &mut *self
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for listener in listeners {
            listener.serve(AcceptContext {
                handler: self.center.connection_handler(),
                serializer: self.center.serializer(),
                authenticator: self.authenticator.clone(),
                shutdown: self.center.shutdown_signal().clone(),
            });
        }
        Ok(())
    }

    async fn on_stop(&self, _stage: LifecycleStage) -> Result<(), SiloProcessingErr> {
        self.center.connections().close_all();
        Ok(())
    }
}

/// Removes members whose connection drops
struct CoordinatorStage {
    service: Arc<ClusterMembershipService>,
    shutdown: ShutdownSignal,
}

#[async_trait::async_trait]
impl LifecycleObserver for CoordinatorStage {
    async fn on_start(&self, _stage: LifecycleStage) -> Result<(), SiloProcessingErr> {
        self.service.watch_disconnects(self.shutdown.clone());
        Ok(())
    }
}

/// Completes once the silo registered with the coordinator
struct JoinStage {
    service: Arc<GatewayMembershipService>,
    shutdown: ShutdownSignal,
}

#[async_trait::async_trait]
impl LifecycleObserver for JoinStage {
    async fn on_start(&self, _stage: LifecycleStage) -> Result<(), SiloProcessingErr> {
        self.service.start(self.shutdown.clone());
        self.service.wait_joined().await;
        Ok(())
    }

    async fn on_stop(&self, _stage: LifecycleStage) -> Result<(), SiloProcessingErr> {
        self.service.unregister().await;
        Ok(())
    }
}

struct SiloInner {
    center: MessageCenter,
    directory: Arc<ActivationDirectory>,
    lifecycle: LifecycleObservable,
    membership: Arc<MembershipManager>,
    coordinator: ClusterMembershipReference,
    coordinator_service: Option<Arc<ClusterMembershipService>>,
    gateway_service: Option<Arc<GatewayMembershipService>>,
    gateway_address: Option<Address>,
    cluster_address: Option<Address>,
    shutdown: ShutdownSignal,
    statistics_period: Option<Duration>,
    statistics: Mutex<Option<JoinHandle<()>>>,
}

/// A running (or runnable) silo. Cheap to clone.
#[derive(Clone)]
pub struct Silo {
    inner: Arc<SiloInner>,
}

impl std::fmt::Debug for Silo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Silo")
            .field("gateway", &self.inner.gateway_address)
            .field("cluster", &self.inner.cluster_address)
            .field("activations", &self.inner.directory.len())
            .finish()
    }
}

impl Silo {
    /// Start the lifecycle: Core, System, Joining (waits for the first
    /// registration with the coordinator), then User
    pub async fn start(&self) -> Result<(), SiloErr> {
        self.inner.lifecycle.start().await?;
        if let Some(period) = self.inner.statistics_period {
            let handle = crate::stats::spawn_reporter(
                self.inner.directory.clone(),
                period,
                self.inner.shutdown.clone(),
            );
            *self
                .inner
                .statistics
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        }
        log::info!("Silo {} started", self.address());
        Ok(())
    }

    /// Raise the cancellation signal, then stop the lifecycle in reverse
    pub async fn stop(&self) {
        log::info!("Stopping silo {}", self.address());
        self.inner.shutdown.cancel();
        self.inner.lifecycle.stop().await;
        self.inner.center.connections().close_all();
    }

    /// This silo's address (the gateway's if it has one)
    pub fn address(&self) -> Address {
        self.inner.center.silo_address()
    }

    /// The gateway listener's advertised address
    pub fn gateway_address(&self) -> Option<Address> {
        self.inner.gateway_address
    }

    /// The coordinator listener's advertised address
    pub fn cluster_address(&self) -> Option<Address> {
        self.inner.cluster_address
    }

    /// Host a user service under a fresh identity
    pub async fn spawn_service(
        &self,
        invoker: Arc<dyn MethodInvoker>,
        policy: InvocationPolicy,
    ) -> Result<Identity, SiloErr> {
        self.spawn_service_with_identity(Identity::service(), invoker, policy)
            .await
    }

    /// Host a user service under a caller-chosen identity
    pub async fn spawn_service_with_identity(
        &self,
        identity: Identity,
        invoker: Arc<dyn MethodInvoker>,
        policy: InvocationPolicy,
    ) -> Result<Identity, SiloErr> {
        self.inner
            .directory
            .register_and_activate(Activation::new(identity, invoker, Priority::User, policy))
            .await?;
        log::debug!("Spawned service {identity}");
        if let Some(gateway) = &self.inner.gateway_service {
            gateway.publish_table().await;
        }
        Ok(identity)
    }

    /// Host a system target. System targets are not published in the
    /// membership table, callers address them by silo address.
    pub async fn spawn_system_target(
        &self,
        identity: Identity,
        invoker: Arc<dyn MethodInvoker>,
        policy: InvocationPolicy,
    ) -> Result<Identity, SiloErr> {
        if !identity.is_system_target() {
            return Err(SiloErr::NotSystemTarget(identity));
        }
        self.inner
            .directory
            .register_and_activate(Activation::new(identity, invoker, Priority::System, policy))
            .await?;
        Ok(identity)
    }

    /// A typed reference to a service, located through the directory and
    /// membership on every call
    pub fn reference<C: ServiceContract>(&self, identity: Identity) -> C::Reference {
        C::reference(Arc::new(ServiceTarget::new(
            self.inner.center.clone(),
            identity,
            self.inner.membership.clone(),
            Some(self.inner.coordinator.clone()),
        )))
    }

    /// A typed reference to a system target on the silo at `address`
    pub fn system_reference<C: ServiceContract>(
        &self,
        address: Address,
        identity: Identity,
    ) -> C::Reference {
        C::reference(Arc::new(SystemTarget::new(
            self.inner.center.clone(),
            address,
            identity,
        )))
    }

    /// Kill a service wherever it is hosted. Best-effort, there is no
    /// acknowledgement from the owner.
    pub async fn kill_service(&self, identity: Identity) -> Result<(), CallErr> {
        if self.inner.directory.kill(&identity).await {
            log::info!("Killed local service {identity}");
            if let Some(gateway) = &self.inner.gateway_service {
                gateway.publish_table().await;
            }
        }
        self.inner.membership.forget(&identity);
        self.inner.coordinator.kill_service(identity).await
    }

    /// Where a service lives, if known
    pub fn resolve(&self, identity: &Identity) -> Option<Address> {
        if self.inner.directory.contains(identity) {
            return Some(self.address());
        }
        self.inner.membership.resolve(identity).map(|l| l.address)
    }

    /// Pull the coordinator's snapshot now. Returns [true] if it was newer.
    pub async fn refresh_membership(&self) -> Result<bool, CallErr> {
        let snapshot = self.inner.coordinator.create_snapshot().await?;
        Ok(self.inner.membership.apply_snapshot(snapshot))
    }

    /// Returns [true] while the gateway member is registered
    pub fn is_registered(&self) -> bool {
        self.inner
            .gateway_service
            .as_ref()
            .map(|gateway| gateway.is_registered())
            .unwrap_or(false)
    }

    /// The local activations
    pub fn directory(&self) -> &Arc<ActivationDirectory> {
        &self.inner.directory
    }

    /// The membership cache
    pub fn membership(&self) -> &Arc<MembershipManager> {
        &self.inner.membership
    }

    /// The dispatcher
    pub fn message_center(&self) -> &MessageCenter {
        &self.inner.center
    }

    /// The staged lifecycle
    pub fn lifecycle(&self) -> &LifecycleObservable {
        &self.inner.lifecycle
    }

    /// The coordinator service, on the silo running it
    pub fn coordinator_service(&self) -> Option<&Arc<ClusterMembershipService>> {
        self.inner.coordinator_service.as_ref()
    }

    /// The gateway member, on silos hosting services
    pub fn gateway_service(&self) -> Option<&Arc<GatewayMembershipService>> {
        self.inner.gateway_service.as_ref()
    }
}
