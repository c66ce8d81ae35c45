// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

use std::sync::Arc;

use silo::concurrency::Duration;
use silo::{Activation, InvocationPolicy, Priority};

use super::*;
use crate::common_test::{host_probe, networked_center, periodic_check};
use crate::message_center::MessageCenter;

fn host_coordinator(center: &MessageCenter) -> Arc<ClusterMembershipService> {
    let service = ClusterMembershipService::new(center.clone());
    let invoker = ClusterMembershipContract::invoker(service.clone()).expect("Invalid contract");
    center
        .directory()
        .register(Activation::new(
            CLUSTER_MEMBERSHIP,
            invoker,
            Priority::System,
            InvocationPolicy::Multi,
        ))
        .expect("Failed to host the coordinator");
    service
}

fn host_member(center: &MessageCenter, cluster: silo::Address) -> Arc<GatewayMembershipService> {
    let service = GatewayMembershipService::new(
        center.clone(),
        cluster,
        Arc::new(MembershipManager::new()),
        Duration::from_millis(100),
    );
    let invoker = GatewayMembershipContract::invoker(service.clone()).expect("Invalid contract");
    center
        .directory()
        .register(Activation::new(
            GATEWAY_MEMBERSHIP,
            invoker,
            Priority::System,
            InvocationPolicy::Multi,
        ))
        .expect("Failed to host the member");
    service
}

#[silo::concurrency::test]
async fn members_register_and_learn_about_each_other() {
    let coordinator_center = networked_center(|o| o);
    let coordinator = host_coordinator(&coordinator_center);
    let cluster = coordinator_center.silo_address();

    let a_center = networked_center(|o| o);
    let b_center = networked_center(|o| o);
    let (a_service, _) = host_probe(&a_center, InvocationPolicy::Multi);
    let (b_service, _) = host_probe(&b_center, InvocationPolicy::Multi);
    let a = host_member(&a_center, cluster);
    let b = host_member(&b_center, cluster);

    a.check().await.expect("A failed to register");
    assert!(a.is_registered());
    assert!(a.has_joined());
    assert_eq!(Some(1), a.manager().version());

    b.check().await.expect("B failed to register");
    assert_eq!(2, coordinator.version());

    // B learned about A from the register snapshot, A hears about B through
    // the change notification
    assert!(b.manager().resolve(&a_service).is_some());
    let a_view = a.clone();
    periodic_check(
        move || a_view.manager().resolve(&b_service).is_some(),
        Duration::from_secs(5),
    )
    .await;
    assert_eq!(
        Some(b_center.silo_address()),
        a.manager().resolve(&b_service).map(|l| l.address)
    );

    // a registered member with a live connection is left alone
    a.check().await.expect("check failed");
    assert_eq!(2, coordinator.version());
}

#[silo::concurrency::test]
async fn members_reregister_when_the_coordinator_forgets_them() {
    let coordinator_center = networked_center(|o| o);
    let coordinator = host_coordinator(&coordinator_center);
    let member_center = networked_center(|o| o);
    let member = host_member(&member_center, coordinator_center.silo_address());

    member.check().await.expect("register failed");
    assert!(coordinator.remove_member(&member.entry().address));
    assert!(coordinator.members().is_empty());

    member.check().await.expect("check failed");
    assert_eq!(vec![member.entry().address], coordinator.members());
    assert_eq!(3, coordinator.version());
}

#[silo::concurrency::test]
async fn the_loop_joins_and_unregister_leaves() {
    let coordinator_center = networked_center(|o| o);
    let coordinator = host_coordinator(&coordinator_center);
    let member_center = networked_center(|o| o);
    let member = host_member(&member_center, coordinator_center.silo_address());

    let shutdown = silo::ShutdownSignal::new();
    let handle = member.start(shutdown.clone());
    silo::concurrency::timeout(Duration::from_secs(5), member.wait_joined())
        .await
        .expect("Member never joined");
    assert_eq!(vec![member.entry().address], coordinator.members());

    shutdown.cancel();
    handle.await.expect("Loop panicked");
    member.unregister().await;
    assert!(!member.is_registered());
    assert!(coordinator.members().is_empty());
}

#[silo::concurrency::test]
async fn failed_checks_are_retried() {
    // nobody listens at the coordinator address yet
    let member_center = networked_center(|o| o);
    let member = host_member(&member_center, "127.0.0.1:9".parse().expect("Invalid address"));
    assert!(member.check().await.is_err());
    assert!(!member.is_registered());
    assert!(!member.has_joined());
}

#[silo::concurrency::test]
async fn kills_are_fanned_out_to_the_owner() {
    let coordinator_center = networked_center(|o| o);
    let coordinator = host_coordinator(&coordinator_center);
    let cluster = coordinator_center.silo_address();

    let a_center = networked_center(|o| o);
    let b_center = networked_center(|o| o);
    let (victim, _) = host_probe(&b_center, InvocationPolicy::Multi);
    let a = host_member(&a_center, cluster);
    let b = host_member(&b_center, cluster);
    a.check().await.expect("register failed");
    b.check().await.expect("register failed");

    let caller = gateway::coordinator_reference(&a_center, cluster);
    caller.kill_service(victim).await.expect("kill failed");

    let b_view = b_center.clone();
    periodic_check(move || !b_view.directory().contains(&victim), Duration::from_secs(5)).await;

    // the owner published its smaller table
    let view = coordinator.clone();
    periodic_check(
        move || {
            view.snapshot()
                .table(&b.entry().address)
                .map(|t| t.rows.is_empty())
                .unwrap_or(false)
        },
        Duration::from_secs(5),
    )
    .await;
}
