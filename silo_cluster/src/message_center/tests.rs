// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use silo::concurrency::{Duration, JoinHandle};
use silo::{
    ActivationDirectory, BytesConvertable, CallResult, ExceptionKind, Identity,
    InvocationPolicy, InvokeRequest, Message, RejectionType, ServiceContract, ShutdownSignal,
};

use super::*;
use crate::common_test::{
    host_probe, networked_center, periodic_check, probe_method, probe_request, ProbeContract,
    ProbeService,
};
use crate::net::TcpConnector;
use crate::serializer::ProstSerializer;

fn local_center(overloaded: usize) -> MessageCenter {
    let options = ListenerOptions::new("127.0.0.1:47001".parse().expect("Invalid address"))
        .with_overloaded(overloaded);
    MessageCenter::new(
        Some(options),
        None,
        Arc::new(ActivationDirectory::new()),
        Arc::new(TcpConnector),
        Arc::new(ProstSerializer),
        ShutdownSignal::new(),
    )
    .expect("Failed to create message center")
}

fn decode<T: BytesConvertable>(result: CallResult<Option<Vec<u8>>>) -> T {
    match result {
        CallResult::Success(value) => {
            T::from_bytes(value.unwrap_or_default()).expect("Failed to decode return value")
        }
        other => panic!("Call did not succeed: {other:?}"),
    }
}

#[silo::concurrency::test]
async fn requests_are_answered_in_process() {
    let center = local_center(0);
    let (identity, probe) = host_probe(&center, InvocationPolicy::Multi);

    let message = probe_request(&center, identity, "echo", vec!["hello".to_string().into_bytes()]);
    let result = center
        .send_request(message, None)
        .await
        .expect("Failed to send request");
    assert_eq!("hello".to_string(), decode::<String>(result));
    assert_eq!(1, probe.invocations());
    assert_eq!(0, center.pending_requests());
}

#[silo::concurrency::test]
async fn unknown_targets_and_methods_fail() {
    let center = local_center(0);
    let (identity, _probe) = host_probe(&center, InvocationPolicy::Multi);

    let missing = probe_request(
        &center,
        Identity::service(),
        "echo",
        vec![String::new().into_bytes()],
    );
    match center.send_request(missing, None).await.expect("send failed") {
        CallResult::Failed(exception) => assert_eq!(ExceptionKind::ServiceNotFound, exception.kind),
        other => panic!("Unexpected result {other:?}"),
    }

    let descriptor = ProbeContract::descriptor().expect("Invalid probe contract");
    let bogus = Message::request(
        center.silo_address(),
        identity,
        InvokeRequest::new(descriptor.interface_id(), 0xdead_beef, vec![]),
    );
    match center.send_request(bogus, None).await.expect("send failed") {
        CallResult::Failed(exception) => {
            assert_eq!(ExceptionKind::MethodNotSupported, exception.kind)
        }
        other => panic!("Unexpected result {other:?}"),
    }

    let wrong_arity = probe_request(&center, identity, "echo", vec![]);
    match center.send_request(wrong_arity, None).await.expect("send failed") {
        CallResult::Failed(exception) => assert_eq!(ExceptionKind::InvalidArgument, exception.kind),
        other => panic!("Unexpected result {other:?}"),
    }
}

#[silo::concurrency::test]
async fn panics_become_error_responses() {
    let center = local_center(0);
    let (identity, _probe) = host_probe(&center, InvocationPolicy::Single);

    let message = probe_request(&center, identity, "explode", vec![]);
    match center.send_request(message, None).await.expect("send failed") {
        CallResult::Failed(exception) => {
            assert_eq!(ExceptionKind::Panic, exception.kind);
            assert!(exception.message.contains("boom"));
        }
        other => panic!("Unexpected result {other:?}"),
    }

    // the activation keeps serving after the panic
    let message = probe_request(
        &center,
        identity,
        "echo",
        vec!["still here".to_string().into_bytes()],
    );
    let result = center.send_request(message, None).await.expect("send failed");
    assert_eq!("still here".to_string(), decode::<String>(result));
}

#[silo::concurrency::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_policy_never_overlaps() {
    let center = local_center(0);
    let (identity, probe) = host_probe(&center, InvocationPolicy::Single);

    let calls = (0..16u64).map(|_| {
        let center = center.clone();
        let message = probe_request(&center, identity, "hold", vec![5u64.into_bytes()]);
        async move { center.send_request(message, None).await }
    });
    for result in futures::future::join_all(calls).await {
        assert_eq!(5u64, decode::<u64>(result.expect("send failed")));
    }
    assert_eq!(16, probe.invocations());
    assert_eq!(1, probe.max_active());
}

#[silo::concurrency::test(flavor = "multi_thread", worker_threads = 4)]
async fn multi_policy_overlaps() {
    let center = local_center(0);
    let (identity, probe) = host_probe(&center, InvocationPolicy::Multi);

    let calls = (0..8u64).map(|_| {
        let center = center.clone();
        let message = probe_request(&center, identity, "hold", vec![200u64.into_bytes()]);
        async move { center.send_request(message, None).await }
    });
    for result in futures::future::join_all(calls).await {
        assert!(result.expect("send failed").is_success());
    }
    assert!(probe.max_active() > 1);
}

#[silo::concurrency::test]
async fn overloaded_activations_reject_without_invoking() {
    let center = local_center(1);
    let (identity, probe) = host_probe(&center, InvocationPolicy::Multi);
    let activation = center.directory().get(&identity).expect("probe not hosted");

    let busy = {
        let center = center.clone();
        let message = probe_request(&center, identity, "hold", vec![300u64.into_bytes()]);
        silo::concurrency::spawn(async move { center.send_request(message, None).await })
    };
    periodic_check(|| activation.in_flight() == 1, Duration::from_secs(5)).await;

    let message = probe_request(&center, identity, "echo", vec!["x".to_string().into_bytes()]);
    match center.send_request(message, None).await.expect("send failed") {
        CallResult::Rejected(kind, _) => assert_eq!(RejectionType::Overloaded, kind),
        other => panic!("Unexpected result {other:?}"),
    }
    assert_eq!(1, probe.invocations());

    let first = busy.await.expect("join failed").expect("send failed");
    assert!(first.is_success());
    assert_eq!(0, activation.in_flight());
}

type PendingCall = JoinHandle<Result<CallResult<Option<Vec<u8>>>, ConnectErr>>;

/// Occupy a `Single` activation with a 300ms call and queue an `echo` behind it
async fn queue_behind_busy_call(
    center: &MessageCenter,
) -> (Identity, Arc<ProbeService>, PendingCall, PendingCall) {
    let (identity, probe) = host_probe(center, InvocationPolicy::Single);
    let activation = center.directory().get(&identity).expect("probe not hosted");

    let busy = {
        let center = center.clone();
        let message = probe_request(&center, identity, "hold", vec![300u64.into_bytes()]);
        silo::concurrency::spawn(async move { center.send_request(message, None).await })
    };
    let running = probe.clone();
    periodic_check(
        move || running.active.load(Ordering::SeqCst) == 1,
        Duration::from_secs(5),
    )
    .await;

    let queued = {
        let center = center.clone();
        let message =
            probe_request(&center, identity, "echo", vec!["late".to_string().into_bytes()]);
        silo::concurrency::spawn(async move {
            center.send_request(message, Some(Duration::from_millis(1500))).await
        })
    };
    periodic_check(move || activation.mailbox().len() == 1, Duration::from_secs(5)).await;
    (identity, probe, busy, queued)
}

#[silo::concurrency::test]
async fn queued_requests_of_a_killed_activation_are_answered() {
    let center = local_center(0);
    let (identity, probe, busy, queued) = queue_behind_busy_call(&center).await;
    let activation = center.directory().get(&identity).expect("probe not hosted");

    assert!(center.directory().kill(&identity).await);
    let killed_at = Instant::now();
    match queued.await.expect("join failed").expect("send failed") {
        CallResult::Failed(exception) => assert_eq!(ExceptionKind::ServiceNotFound, exception.kind),
        other => panic!("Unexpected result {other:?}"),
    }
    assert!(killed_at.elapsed() < Duration::from_millis(1000));

    // the call already running finishes normally
    assert_eq!(300u64, decode::<u64>(busy.await.expect("join failed").expect("send failed")));
    assert_eq!(1, probe.invocations());
    assert_eq!(0, activation.in_flight());
    assert_eq!(0, center.pending_requests());
}

#[silo::concurrency::test]
async fn queued_requests_of_a_stopping_silo_are_rejected() {
    let center = local_center(0);
    let (identity, probe, busy, queued) = queue_behind_busy_call(&center).await;
    let activation = center.directory().get(&identity).expect("probe not hosted");

    // a one-way message queued as well is dropped without an answer
    let poke = probe_request(&center, identity, "poke", vec![9u32.into_bytes()]);
    center.send_message(poke).await.expect("send failed");
    center.shutdown_signal().cancel();

    let cancelled_at = Instant::now();
    match queued.await.expect("join failed").expect("send failed") {
        CallResult::Rejected(kind, _) => assert_eq!(RejectionType::Transient, kind),
        other => panic!("Unexpected result {other:?}"),
    }
    assert!(cancelled_at.elapsed() < Duration::from_millis(1000));

    assert!(busy.await.expect("join failed").expect("send failed").is_success());
    assert_eq!(1, probe.invocations());
    assert!(probe.pokes().is_empty());
    assert_eq!(0, activation.in_flight());
    assert!(activation.mailbox().is_empty());
}

#[silo::concurrency::test]
async fn timeouts_remove_the_pending_request() {
    let center = local_center(0);
    let (identity, probe) = host_probe(&center, InvocationPolicy::Multi);

    let message = probe_request(&center, identity, "hold", vec![300u64.into_bytes()]);
    let result = center
        .send_request(message, Some(Duration::from_millis(50)))
        .await
        .expect("send failed");
    assert!(result.is_timeout());
    assert_eq!(0, center.pending_requests());

    // the late response is dropped without effect
    periodic_check(
        || probe.active.load(std::sync::atomic::Ordering::SeqCst) == 0 && probe.invocations() == 1,
        Duration::from_secs(5),
    )
    .await;
    silo::concurrency::sleep(Duration::from_millis(50)).await;
    assert_eq!(0, center.pending_requests());
}

#[silo::concurrency::test]
async fn one_way_messages_get_no_response() {
    let center = local_center(0);
    let (identity, probe) = host_probe(&center, InvocationPolicy::Single);

    let message = probe_request(&center, identity, "poke", vec![7u32.into_bytes()]);
    assert!(message.is_one_way());
    center.send_message(message).await.expect("send failed");
    periodic_check(|| probe.pokes() == vec![7], Duration::from_secs(5)).await;
    assert_eq!(0, center.pending_requests());
}

#[silo::concurrency::test]
async fn invocations_run_in_the_activations_call_context() {
    let center = local_center(0);
    let (identity, _probe) = host_probe(&center, InvocationPolicy::Multi);

    let message = probe_request(&center, identity, "caller", vec![]);
    let result = center.send_request(message, None).await.expect("send failed");
    assert_eq!(Some(identity), decode::<Option<Identity>>(result));
}

#[test]
fn gateway_overload_wins_when_ambiguous() {
    let gateway = ListenerOptions::new("127.0.0.1:47010".parse().expect("Invalid address"))
        .with_overloaded(3);
    let cluster = ListenerOptions::new("127.0.0.1:47011".parse().expect("Invalid address"))
        .with_overloaded(9);
    let center = MessageCenter::new(
        Some(gateway),
        Some(cluster),
        Arc::new(ActivationDirectory::new()),
        Arc::new(TcpConnector),
        Arc::new(ProstSerializer),
        ShutdownSignal::new(),
    )
    .expect("Failed to create message center");

    let inner = &center.inner;
    assert_eq!(9, inner.overload_threshold(&"127.0.0.1:47011".parse().expect("addr")));
    assert_eq!(3, inner.overload_threshold(&"127.0.0.1:47010".parse().expect("addr")));
    assert_eq!(3, inner.overload_threshold(&"10.1.1.1:1".parse().expect("addr")));
    assert_eq!("127.0.0.1:47010".parse::<Address>().expect("addr"), center.silo_address());
    assert!(center.is_local(&"127.0.0.1:47011".parse().expect("addr")));
}

#[silo::concurrency::test]
async fn stopping_silos_refuse_new_work() {
    let center = local_center(0);
    let (identity, probe) = host_probe(&center, InvocationPolicy::Multi);
    center.shutdown_signal().cancel();

    let message = probe_request(&center, identity, "echo", vec!["x".to_string().into_bytes()]);
    match center.send_request(message, None).await.expect("send failed") {
        CallResult::Rejected(kind, _) => assert_eq!(RejectionType::Transient, kind),
        other => panic!("Unexpected result {other:?}"),
    }
    assert_eq!(0, probe.invocations());
}

#[silo::concurrency::test]
async fn requests_cross_the_network() {
    let server = networked_center(|options| options);
    let client = networked_center(|options| options);
    let (identity, probe) = host_probe(&server, InvocationPolicy::Single);

    let descriptor = ProbeContract::descriptor().expect("Invalid probe contract");
    let request = probe_method("echo")
        .request(descriptor.interface_id(), vec!["over tcp".to_string().into_bytes()]);
    let message = Message::request(server.silo_address(), identity, request);
    let result = client.send_request(message, None).await.expect("send failed");
    assert_eq!("over tcp".to_string(), decode::<String>(result));
    assert_eq!(1, probe.invocations());

    // the server adopted the client's connection under the client's address
    assert!(server.connections().is_connected(&client.silo_address()));
    assert_eq!(vec![server.silo_address()], client.connections().connected_peers());

    client.connections().close_all();
    let server_view = server.clone();
    let client_address = client.silo_address();
    periodic_check(
        move || !server_view.connections().is_connected(&client_address),
        Duration::from_secs(5),
    )
    .await;
}

#[silo::concurrency::test]
async fn unreachable_silos_are_transport_errors() {
    let center = local_center(0);
    // nothing listens on the discard port of localhost
    let message = Message::one_way(
        "127.0.0.1:9".parse().expect("Invalid address"),
        Identity::service(),
        InvokeRequest::new(1, 1, vec![]),
    );
    assert!(matches!(
        center.send_message(message).await,
        Err(ConnectErr::Io(_))
    ));
}
