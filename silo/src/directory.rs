// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The activation directory: every activation hosted by one silo, keyed by
//! identity. It is the source of the silo's membership rows and takes part
//! in the lifecycle, activating and deactivating its entries by [Priority].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry::{Occupied, Vacant};
use dashmap::DashMap;
use futures::future::join_all;

use crate::activation::{Activation, Priority};
use crate::errors::{ActivationErr, RegistrationErr, SiloProcessingErr};
use crate::lifecycle::{LifecycleObserver, LifecycleStage};
use crate::Identity;

/// A locally hosted service, as published in the membership table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedService {
    /// The service identity
    pub identity: Identity,
    /// Its interface name
    pub service_type: String,
    /// Instance metadata
    pub metadata: Vec<u8>,
}

/// Registry of the activations hosted by one silo
#[derive(Default)]
pub struct ActivationDirectory {
    activations: DashMap<Identity, Arc<Activation>>,
    started: [AtomicBool; 3],
}

fn slot(priority: Priority) -> usize {
    match priority {
        Priority::Core => 0,
        Priority::System => 1,
        Priority::User => 2,
    }
}

impl ActivationDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an activation. Duplicate identities are rejected.
    pub fn register(&self, activation: Activation) -> Result<Arc<Activation>, RegistrationErr> {
        match self.activations.entry(activation.identity()) {
            Occupied(occupied) => Err(RegistrationErr::DuplicateIdentity(*occupied.key())),
            Vacant(vacancy) => {
                let activation = Arc::new(activation);
                vacancy.insert(activation.clone());
                Ok(activation)
            }
        }
    }

    /// Register an activation and, if its priority has already started,
    /// activate it immediately. A failed activation is unregistered again.
    pub async fn register_and_activate(
        &self,
        activation: Activation,
    ) -> Result<Arc<Activation>, ActivationErr> {
        let activation = self.register(activation)?;
        if self.is_started(activation.priority()) {
            if let Err(err) = activation.invoker().on_activate().await {
                self.activations.remove(&activation.identity());
                return Err(ActivationErr::ActivationFailed(activation.identity(), err));
            }
        }
        Ok(activation)
    }

    /// Look up an activation
    pub fn get(&self, identity: &Identity) -> Option<Arc<Activation>> {
        self.activations.get(identity).map(|v| v.value().clone())
    }

    /// Returns [true] if the identity is hosted here
    pub fn contains(&self, identity: &Identity) -> bool {
        self.activations.contains_key(identity)
    }

    /// Remove an activation without running its deactivation hook
    pub fn remove(&self, identity: &Identity) -> Option<Arc<Activation>> {
        self.activations.remove(identity).map(|(_, activation)| activation)
    }

    /// Remove an activation, flag it as killed and run its deactivation hook.
    /// Queued messages stay with the activation's drain loop, which refuses
    /// them. Returns [false] if it was not hosted here.
    pub async fn kill(&self, identity: &Identity) -> bool {
        let Some(activation) = self.remove(identity) else {
            return false;
        };
        activation.mark_killed();
        let queued = activation.mailbox().len();
        if queued > 0 {
            log::debug!("Killed activation {identity} still has {queued} queued message(s)");
        }
        if let Err(err) = activation.invoker().on_deactivate().await {
            log::warn!("Deactivation of {identity} failed: {err}");
        }
        true
    }

    /// Number of hosted activations
    pub fn len(&self) -> usize {
        self.activations.len()
    }

    /// Returns [true] if nothing is hosted
    pub fn is_empty(&self) -> bool {
        self.activations.is_empty()
    }

    /// Every activation of a priority
    pub fn by_priority(&self, priority: Priority) -> Vec<Arc<Activation>> {
        self.activations
            .iter()
            .filter(|kvp| kvp.value().priority() == priority)
            .map(|kvp| kvp.value().clone())
            .collect()
    }

    /// Every activation
    pub fn activations(&self) -> Vec<Arc<Activation>> {
        self.activations.iter().map(|kvp| kvp.value().clone()).collect()
    }

    /// The user services hosted here, as membership rows
    pub fn hosted_services(&self) -> Vec<HostedService> {
        let mut services = self
            .activations
            .iter()
            .filter(|kvp| !kvp.key().is_system_target())
            .map(|kvp| HostedService {
                identity: *kvp.key(),
                service_type: kvp.value().descriptor().name().to_string(),
                metadata: kvp.value().invoker().metadata(),
            })
            .collect::<Vec<_>>();
        services.sort_by_key(|service| service.identity);
        services
    }

    /// Returns [true] once the priority's lifecycle stage has started
    pub fn is_started(&self, priority: Priority) -> bool {
        self.started[slot(priority)].load(Ordering::Acquire)
    }

    /// Activate every entry of a priority. The first failure is returned
    /// after every activation hook has run.
    pub async fn start(&self, priority: Priority) -> Result<(), SiloProcessingErr> {
        self.started[slot(priority)].store(true, Ordering::Release);
        let activations = self.by_priority(priority);
        let results = join_all(activations.iter().map(|activation| async move {
            activation
                .invoker()
                .on_activate()
                .await
                .map_err(|err| ActivationErr::ActivationFailed(activation.identity(), err))
        }))
        .await;
        match results.into_iter().find_map(Result::err) {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// Deactivate and remove every entry of a priority, logging failures
    pub async fn stop(&self, priority: Priority) {
        self.started[slot(priority)].store(false, Ordering::Release);
        let identities = self
            .by_priority(priority)
            .iter()
            .map(|activation| activation.identity())
            .collect::<Vec<_>>();
        join_all(identities.iter().map(|identity| self.kill(identity))).await;
    }

    /// The lifecycle observer which starts and stops one priority
    pub fn lifecycle_participant(
        self: &Arc<Self>,
        priority: Priority,
    ) -> Arc<dyn LifecycleObserver> {
        Arc::new(DirectoryStage {
            directory: self.clone(),
            priority,
        })
    }
}

/// Maps a lifecycle stage onto one directory priority
struct DirectoryStage {
    directory: Arc<ActivationDirectory>,
    priority: Priority,
}

#[async_trait::async_trait]
impl LifecycleObserver for DirectoryStage {
    async fn on_start(&self, _stage: LifecycleStage) -> Result<(), SiloProcessingErr> {
        self.directory.start(self.priority).await
    }

    async fn on_stop(&self, _stage: LifecycleStage) -> Result<(), SiloProcessingErr> {
        self.directory.stop(self.priority).await;
        Ok(())
    }
}
