// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The coordinator node: runs cluster membership and nothing else

use clap::Args;
use silo_cluster::{ClusterOptions, SiloBuilder};

/// Configuration
#[derive(Args, Debug, Clone)]
pub struct CoordinatorConfig {
    /// Port of the cluster listener
    #[arg(long, default_value_t = 64000)]
    port: u16,
    /// Host to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    /// Exit after this many milliseconds instead of running until interrupted
    #[arg(long)]
    lifetime_ms: Option<u64>,
}

pub async fn test(config: CoordinatorConfig) -> anyhow::Result<()> {
    let address = super::local_address(&config.host, config.port)?;
    let silo = SiloBuilder::new()
        .cluster(ClusterOptions::new(address))
        .build()
        .await?;
    silo.start().await?;
    log::info!("Coordinator listening on {address}");

    super::stay_alive(config.lifetime_ms).await;

    if let Some(service) = silo.coordinator_service() {
        log::info!(
            "Membership version {} with members {:?}",
            service.version(),
            service.members()
        );
    }
    silo.stop().await;
    Ok(())
}
