// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use silo::concurrency::{sleep, Duration, Instant};
use silo::contract::MethodDescriptor;
use silo::{
    Activation, Addressable, CallContext, CallErr, Identity, InvocationPolicy, Message,
    Priority, ServiceContract,
};
use silo_cluster_derive::service_contract;

use crate::config::ListenerOptions;
use crate::message_center::MessageCenter;
use crate::net::listener::AcceptContext;
use crate::net::{AllowAll, Listener, TcpConnector};
use crate::serializer::ProstSerializer;

pub async fn periodic_check<F>(check: F, timeout: Duration)
where
    F: Fn() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if check() {
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }

    let backtrace = backtrace::Backtrace::new();
    assert!(check(), "Periodic check failed.\n{:?}", backtrace);
}

#[service_contract(name = "test.Probe")]
pub trait Probe {
    async fn echo(&self, text: String) -> Result<String, CallErr>;

    async fn hold(&self, millis: u64) -> Result<u64, CallErr>;

    #[one_way]
    async fn poke(&self, tag: u32) -> Result<(), CallErr>;

    async fn explode(&self) -> Result<(), CallErr>;

    async fn caller(&self) -> Result<Option<Identity>, CallErr>;
}

/// Records how it is being called
#[derive(Default)]
pub struct ProbeService {
    pub invocations: AtomicUsize,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub pokes: Mutex<Vec<u32>>,
}

impl ProbeService {
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn pokes(&self) -> Vec<u32> {
        self.pokes.lock().unwrap().clone()
    }
}

impl Addressable for ProbeService {}

#[silo::async_trait]
impl Probe for ProbeService {
    async fn echo(&self, text: String) -> Result<String, CallErr> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(text)
    }

    async fn hold(&self, millis: u64) -> Result<u64, CallErr> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        sleep(Duration::from_millis(millis)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(millis)
    }

    async fn poke(&self, tag: u32) -> Result<(), CallErr> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.pokes.lock().unwrap().push(tag);
        Ok(())
    }

    async fn explode(&self) -> Result<(), CallErr> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        panic!("boom");
    }

    async fn caller(&self) -> Result<Option<Identity>, CallErr> {
        Ok(CallContext::current().map(|context| context.identity()))
    }
}

pub fn probe_method(name: &str) -> MethodDescriptor {
    let descriptor = ProbeContract::descriptor().expect("Invalid probe contract");
    descriptor
        .methods()
        .iter()
        .find(|method| method.name() == name)
        .cloned()
        .expect("Unknown probe method")
}

/// Build a request message for one probe method
pub fn probe_request(
    center: &MessageCenter,
    identity: Identity,
    name: &str,
    args: Vec<Vec<u8>>,
) -> Message {
    let descriptor = ProbeContract::descriptor().expect("Invalid probe contract");
    let request = probe_method(name).request(descriptor.interface_id(), args);
    if probe_method(name).options().one_way {
        Message::one_way(center.silo_address(), identity, request)
    } else {
        Message::request(center.silo_address(), identity, request)
    }
}

/// Host a new probe on the center's directory
pub fn host_probe(
    center: &MessageCenter,
    policy: InvocationPolicy,
) -> (Identity, Arc<ProbeService>) {
    let service = Arc::new(ProbeService::default());
    let invoker = ProbeContract::invoker(service.clone()).expect("Invalid probe contract");
    let identity = Identity::service();
    center
        .directory()
        .register(Activation::new(identity, invoker, Priority::User, policy))
        .expect("Failed to register probe");
    (identity, service)
}

/// A center whose gateway listener is bound to a free local port and serving
pub fn networked_center(
    configure: impl FnOnce(ListenerOptions) -> ListenerOptions,
) -> MessageCenter {
    let options = configure(ListenerOptions::new(
        "127.0.0.1:0".parse().expect("Invalid address"),
    ));
    let listener = Listener::bind(&options).expect("Failed to bind listener");
    let center = MessageCenter::new(
        Some(listener.options().clone()),
        None,
        Arc::new(silo::ActivationDirectory::new()),
        Arc::new(TcpConnector),
        Arc::new(ProstSerializer),
        silo::ShutdownSignal::new(),
    )
    .expect("Failed to create message center");
    listener.serve(AcceptContext {
        handler: center.connection_handler(),
        serializer: center.serializer(),
        authenticator: Arc::new(AllowAll),
        shutdown: center.shutdown_signal().clone(),
    });
    center
}
