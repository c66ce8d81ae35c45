// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Joins the cluster as a gateway without services and calls the hello
//! service wherever it is hosted

use anyhow::{bail, Context};
use clap::Args;
use rand::Rng;
use silo::concurrency::{sleep, Duration, Instant};
use silo_cluster::{GatewayOptions, SiloBuilder};

use crate::hello::{Hello, HelloContract, HELLO_SERVICE};

const PING_TIME_ALLOWANCE_MS: u128 = 2000;

/// Configuration
#[derive(Args, Debug, Clone)]
pub struct HelloClientConfig {
    /// Port of this client's gateway listener
    #[arg(long, default_value_t = 64002)]
    port: u16,
    /// Host to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    /// The coordinator's host
    #[arg(long, default_value = "127.0.0.1")]
    cluster_host: String,
    /// The coordinator's port
    #[arg(long, default_value_t = 64000)]
    cluster_port: u16,
    /// Who to greet
    #[arg(long, default_value = "world")]
    name: String,
    /// How to greet
    #[arg(long, default_value = "Hello")]
    greeting: String,
    /// Number of one-way pings to send
    #[arg(long, default_value_t = 1)]
    pings: u64,
}

pub async fn test(config: HelloClientConfig) -> anyhow::Result<()> {
    let address = super::local_address(&config.host, config.port)?;
    let cluster = super::local_address(&config.cluster_host, config.cluster_port)?;
    let silo = SiloBuilder::new()
        .gateway(GatewayOptions::new(address, cluster))
        .build()
        .await?;
    silo.start().await?;

    let result = exercise(&silo, &config).await;
    silo.stop().await;
    result
}

async fn exercise(silo: &silo_cluster::Silo, config: &HelloClientConfig) -> anyhow::Result<()> {
    let hello = silo.reference::<HelloContract>(HELLO_SERVICE);

    let expected = format!("{}, {}!", config.greeting, config.name);
    let reply = hello
        .say(config.name.clone(), config.greeting.clone())
        .await
        .context("say failed")?;
    log::info!("Service replied '{reply}'");
    if reply != expected {
        bail!("Expected '{expected}' but got '{reply}'");
    }

    let before = hello.pings().await.context("pings failed")?;
    let tags = {
        let mut rng = rand::thread_rng();
        (0..config.pings).map(|_| rng.gen()).collect::<Vec<u64>>()
    };
    for tag in tags {
        hello.ping(tag).await.context("ping failed")?;
    }
    if silo.message_center().pending_requests() != 0 {
        bail!("One-way pings left pending requests behind");
    }

    let tic = Instant::now();
    loop {
        let seen = hello.pings().await.context("pings failed")? - before;
        if seen == config.pings {
            log::info!("All {seen} pings executed");
            return Ok(());
        }
        if seen > config.pings {
            bail!("{} pings were sent but {seen} executed", config.pings);
        }
        if tic.elapsed().as_millis() > PING_TIME_ALLOWANCE_MS {
            bail!("Only {seen} of {} pings executed in time", config.pings);
        }
        sleep(Duration::from_millis(50)).await;
    }
}
