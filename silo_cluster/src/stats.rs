// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Periodic reporting of per-activation execution time

use std::sync::Arc;

use silo::concurrency::{sleep, Duration, JoinHandle};
use silo::{ActivationDirectory, Identity, ShutdownSignal};

/// Execution statistics of one activation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationStatistics {
    /// The activation
    pub identity: Identity,
    /// Its interface
    pub service_type: String,
    /// Completed invocations
    pub completed: u64,
    /// Total execution time
    pub total: Duration,
    /// Messages admitted and not yet finished
    pub in_flight: usize,
}

/// Collect the statistics of every activation which executed anything
pub fn collect(directory: &ActivationDirectory) -> Vec<ActivationStatistics> {
    let mut statistics = directory
        .activations()
        .into_iter()
        .filter(|activation| activation.consuming_time().completed() > 0)
        .map(|activation| ActivationStatistics {
            identity: activation.identity(),
            service_type: activation.descriptor().name().to_string(),
            completed: activation.consuming_time().completed(),
            total: activation.consuming_time().total(),
            in_flight: activation.in_flight(),
        })
        .collect::<Vec<_>>();
    statistics.sort_by(|a, b| b.total.cmp(&a.total));
    statistics
}

fn report(directory: &ActivationDirectory) {
    for entry in collect(directory) {
        let average = entry.total / u32::try_from(entry.completed).unwrap_or(u32::MAX).max(1);
        log::debug!(
            "{} ({}): {} call(s), {:?} total, {:?} average, {} in flight",
            entry.identity,
            entry.service_type,
            entry.completed,
            entry.total,
            average,
            entry.in_flight
        );
    }
}

/// Log the statistics every `period` until `shutdown`
pub fn spawn_reporter(
    directory: Arc<ActivationDirectory>,
    period: Duration,
    shutdown: ShutdownSignal,
) -> JoinHandle<()> {
    silo::concurrency::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(period) => report(&directory),
            }
        }
    })
}
