// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Whole clusters inside one test process

use std::sync::Arc;

use silo::concurrency::{sleep, Duration};
use silo::{Address, CallErr, InvocationPolicy};
use silo_cluster::{ClusterOptions, GatewayOptions, Silo, SiloBuilder};

use crate::hello::{Hello, HelloContract, HelloService, HELLO_SERVICE};
use crate::tests::periodic_check;

fn address(text: &str) -> Address {
    text.parse().expect("Invalid address")
}

async fn start_coordinator(at: Address) -> Silo {
    let silo = SiloBuilder::new()
        .cluster(ClusterOptions::new(at))
        .build()
        .await
        .expect("Failed to build coordinator");
    silo.start().await.expect("Failed to start coordinator");
    silo
}

async fn start_gateway(at: Address, cluster: Address) -> Silo {
    let silo = SiloBuilder::new()
        .gateway(
            GatewayOptions::new(at, cluster)
                .with_membership_update_period(Duration::from_millis(200)),
        )
        .build()
        .await
        .expect("Failed to build gateway");
    silo.start().await.expect("Failed to start gateway");
    silo
}

/// Table updates are one-way, wait until the coordinator has the service
async fn wait_published(coordinator: &Silo) {
    periodic_check(
        || {
            coordinator
                .coordinator_service()
                .map(|service| service.snapshot().locators().contains_key(&HELLO_SERVICE))
                .unwrap_or(false)
        },
        Duration::from_secs(5),
    )
    .await;
}

async fn host_hello(silo: &Silo) -> Arc<HelloService> {
    let service = Arc::new(HelloService::default());
    silo.spawn_service_with_identity(
        HELLO_SERVICE,
        HelloContract::invoker(service.clone()).expect("Invalid contract"),
        InvocationPolicy::Single,
    )
    .await
    .expect("Failed to host hello");
    service
}

#[silo::concurrency::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_way_call_executes_exactly_once() {
    let coordinator = start_coordinator(address("127.0.0.1:64000")).await;
    let cluster = address("127.0.0.1:64000");
    let a = start_gateway(address("127.0.0.1:64001"), cluster).await;
    let b = start_gateway(address("127.0.0.1:64002"), cluster).await;

    let service = host_hello(&a).await;
    wait_published(&coordinator).await;
    let hello = b.reference::<HelloContract>(HELLO_SERVICE);

    assert_eq!(Ok(()), hello.ping(42).await);
    assert_eq!(0, b.message_center().pending_requests());

    periodic_check(|| service.ping_count() == 1, Duration::from_secs(5)).await;
    // nothing is re-sent later
    sleep(Duration::from_millis(300)).await;
    assert_eq!(1, service.ping_count());
    assert_eq!(vec![42], service.tags());
    assert_eq!(0, b.message_center().pending_requests());

    b.stop().await;
    a.stop().await;
    coordinator.stop().await;
}

#[silo::concurrency::test(flavor = "multi_thread", worker_threads = 4)]
async fn say_preserves_argument_order_across_silos() {
    let coordinator = start_coordinator(address("127.0.0.1:0")).await;
    let cluster = coordinator
        .cluster_address()
        .expect("Coordinator has no cluster listener");
    let a = start_gateway(address("127.0.0.1:0"), cluster).await;
    let b = start_gateway(address("127.0.0.1:0"), cluster).await;

    host_hello(&a).await;
    wait_published(&coordinator).await;
    let hello = b.reference::<HelloContract>(HELLO_SERVICE);
    assert_eq!(
        Ok("Good morning, Ada!".to_string()),
        hello.say("Ada".to_string(), "Good morning".to_string()).await
    );
    assert_eq!(Some(a.address()), b.resolve(&HELLO_SERVICE));

    b.stop().await;
    a.stop().await;
    coordinator.stop().await;
}

#[silo::concurrency::test(flavor = "multi_thread", worker_threads = 4)]
async fn method_timeouts_override_the_silo_default() {
    let coordinator = start_coordinator(address("127.0.0.1:0")).await;
    let cluster = coordinator
        .cluster_address()
        .expect("Coordinator has no cluster listener");
    let a = start_gateway(address("127.0.0.1:0"), cluster).await;
    let b = start_gateway(address("127.0.0.1:0"), cluster).await;

    host_hello(&a).await;
    wait_published(&coordinator).await;
    let hello = b.reference::<HelloContract>(HELLO_SERVICE);
    assert_eq!(Ok(10), hello.slow(10).await);
    assert_eq!(Err(CallErr::Timeout), hello.slow(2000).await);
    assert_eq!(0, b.message_center().pending_requests());

    b.stop().await;
    a.stop().await;
    coordinator.stop().await;
}
