// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Different test scenarios are defined here. Each runs as its own process.

use clap::Parser;
use silo::concurrency::Duration;
use silo::Address;

pub mod coordinator;
pub mod hello_client;

#[derive(Parser, Debug, Clone)]
pub enum TestCase {
    /// Run the membership coordinator
    Coordinator(coordinator::CoordinatorConfig),
    /// Run a gateway hosting the hello service
    Gateway(gateway::GatewayConfig),
    /// Join the cluster and call the hello service
    HelloClient(hello_client::HelloClientConfig),
    /// Not-a-Node: Don't run any test and exit this node with code 0
    Nan,
}

/// Run a scenario to completion and return the process exit code
pub async fn run(case: TestCase) -> i32 {
    let result = match case {
        TestCase::Coordinator(config) => coordinator::test(config).await,
        TestCase::Gateway(config) => gateway::test(config).await,
        TestCase::HelloClient(config) => hello_client::test(config).await,
        TestCase::Nan => {
            silo::concurrency::sleep(Duration::from_secs(2)).await;
            Ok(())
        }
    };
    match result {
        Ok(()) => 0,
        Err(err) => {
            log::error!("Test failed: {err:#}");
            -1
        }
    }
}

fn local_address(host: &str, port: u16) -> anyhow::Result<Address> {
    Ok(format!("{host}:{port}").parse()?)
}

/// Poll `check` until it holds or `timeout` elapses, then assert it
#[cfg(test)]
pub async fn periodic_check<F>(check: F, timeout: Duration)
where
    F: Fn() -> bool,
{
    let start = silo::concurrency::Instant::now();
    while start.elapsed() < timeout {
        if check() {
            break;
        }
        silo::concurrency::sleep(Duration::from_millis(50)).await;
    }
    assert!(check(), "Periodic check failed");
}

/// Keep a node up for `lifetime_ms`, or until interrupted
async fn stay_alive(lifetime_ms: Option<u64>) {
    match lifetime_ms {
        Some(ms) => silo::concurrency::sleep(Duration::from_millis(ms)).await,
        None => std::future::pending::<()>().await,
    }
}
