// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Routing targets behind generated references: system targets at a fixed
//! address, and services located through the directory and membership.

use std::sync::Arc;

use silo::contract::InvokeOptions;
use silo::{Address, CallContext, CallErr, Identity, InvokeRequest, Message, ReferenceTarget};

use crate::membership::contracts::{ClusterMembership, ClusterMembershipReference};
use crate::membership::manager::MembershipManager;
use crate::message_center::MessageCenter;

/// Send one invocation to `identity` at `address`, stamping the caller's
/// identity from the call context
async fn deliver(
    center: &MessageCenter,
    address: Address,
    identity: Identity,
    request: InvokeRequest,
    options: &InvokeOptions,
) -> Result<Option<Vec<u8>>, CallErr> {
    let sender = CallContext::current().map(|context| context.identity());
    if options.one_way {
        let message = Message::one_way(address, identity, request).with_sending_identity(sender);
        center.send_message(message).await?;
        return Ok(None);
    }
    let timeout = options.timeout.or(request.timeout);
    let message = Message::request(address, identity, request).with_sending_identity(sender);
    center
        .send_request(message, timeout)
        .await?
        .into_result(identity)
}

/// A system target at a known silo address
pub struct SystemTarget {
    center: MessageCenter,
    address: Address,
    identity: Identity,
}

impl SystemTarget {
    /// Target `identity` on the silo at `address`
    pub fn new(center: MessageCenter, address: Address, identity: Identity) -> Self {
        Self {
            center,
            address,
            identity,
        }
    }
}

#[async_trait::async_trait]
impl ReferenceTarget for SystemTarget {
    fn identity(&self) -> Identity {
        self.identity
    }

    async fn invoke(
        &self,
        request: InvokeRequest,
        options: InvokeOptions,
    ) -> Result<Option<Vec<u8>>, CallErr> {
        deliver(&self.center, self.address, self.identity, request, &options).await
    }
}

/// Resolves where a service lives on every call
pub struct ServiceTarget {
    center: MessageCenter,
    identity: Identity,
    membership: Arc<MembershipManager>,
    coordinator: Option<ClusterMembershipReference>,
}

impl ServiceTarget {
    /// Target a service. Without a coordinator the cache is never refreshed.
    pub fn new(
        center: MessageCenter,
        identity: Identity,
        membership: Arc<MembershipManager>,
        coordinator: Option<ClusterMembershipReference>,
    ) -> Self {
        Self {
            center,
            identity,
            membership,
            coordinator,
        }
    }

    /// The hosting silo: this one if the directory has the service, else the
    /// cached locator
    pub fn locate(&self) -> Option<Address> {
        if self.center.directory().contains(&self.identity) {
            return Some(self.center.silo_address());
        }
        self.membership
            .resolve(&self.identity)
            .map(|locator| locator.address)
    }

    async fn refresh(&self) {
        let Some(coordinator) = &self.coordinator else {
            return;
        };
        match coordinator.create_snapshot().await {
            Ok(snapshot) => {
                if self.membership.apply_snapshot(snapshot) {
                    log::debug!("Refreshed membership while routing to {}", self.identity);
                }
            }
            Err(err) => log::debug!("Failed to refresh membership: {err}"),
        }
    }
}

#[async_trait::async_trait]
impl ReferenceTarget for ServiceTarget {
    fn identity(&self) -> Identity {
        self.identity
    }

    async fn invoke(
        &self,
        request: InvokeRequest,
        options: InvokeOptions,
    ) -> Result<Option<Vec<u8>>, CallErr> {
        let address = match self.locate() {
            Some(address) => address,
            None => {
                // an unknown identity may just be newer than the cache
                self.refresh().await;
                self.locate().ok_or(CallErr::NotFound(self.identity))?
            }
        };

        let result = deliver(&self.center, address, self.identity, request, &options).await;
        if let Err(err) = &result {
            if matches!(err, CallErr::Transport(_)) || err.is_not_found() {
                self.membership.forget(&self.identity);
                self.refresh().await;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use silo::concurrency::Duration;
    use silo::{InvocationPolicy, ServiceContract};

    use super::*;
    use crate::common_test::{host_probe, networked_center, periodic_check, Probe, ProbeContract};
    use crate::membership::types::{
        MembershipEntry, MembershipRow, MembershipSnapshot, MembershipTable,
    };

    fn snapshot(version: u64, address: Address, identity: Identity) -> MembershipSnapshot {
        MembershipSnapshot {
            version,
            tables: vec![MembershipTable {
                entry: MembershipEntry::gateway(address),
                version: 1,
                rows: vec![MembershipRow {
                    identity,
                    service_type: "test.Probe".to_string(),
                    metadata: vec![],
                }],
            }],
        }
    }

    #[silo::concurrency::test]
    async fn local_services_are_called_in_process() {
        let center = networked_center(|options| options);
        let (identity, probe) = host_probe(&center, InvocationPolicy::Multi);
        let target = ServiceTarget::new(center.clone(), identity, Arc::default(), None);
        assert_eq!(Some(center.silo_address()), target.locate());

        let reference = ProbeContract::reference(Arc::new(target));
        assert_eq!(identity, reference.identity());
        assert_eq!(Ok("hi".to_string()), reference.echo("hi".to_string()).await);
        reference.poke(3).await.expect("poke failed");
        periodic_check(|| probe.pokes() == vec![3], Duration::from_secs(5)).await;
    }

    #[silo::concurrency::test]
    async fn remote_services_are_located_through_membership() {
        let host = networked_center(|options| options);
        let caller = networked_center(|options| options);
        let (identity, probe) = host_probe(&host, InvocationPolicy::Single);

        let membership = Arc::new(MembershipManager::new());
        let target = ServiceTarget::new(caller.clone(), identity, membership.clone(), None);
        let reference = ProbeContract::reference(Arc::new(target));
        assert_eq!(Err(CallErr::NotFound(identity)), reference.echo("x".to_string()).await);

        membership.apply_snapshot(snapshot(1, host.silo_address(), identity));
        assert_eq!(Ok(7u64), reference.hold(7).await);
        assert_eq!(1, probe.invocations.load(Ordering::SeqCst));
    }

    #[silo::concurrency::test]
    async fn stale_locators_are_dropped_on_not_found() {
        let host = networked_center(|options| options);
        let caller = networked_center(|options| options);
        let identity = Identity::service();

        let membership = Arc::new(MembershipManager::new());
        membership.apply_snapshot(snapshot(1, host.silo_address(), identity));
        let reference = ProbeContract::reference(Arc::new(ServiceTarget::new(
            caller.clone(),
            identity,
            membership.clone(),
            None,
        )));

        let err = reference
            .echo("x".to_string())
            .await
            .expect_err("Called a service nobody hosts");
        assert!(err.is_not_found());
        assert!(membership.resolve(&identity).is_none());
    }

    #[silo::concurrency::test]
    async fn system_targets_use_their_fixed_address() {
        let center = networked_center(|options| options);
        let (identity, _probe) = host_probe(&center, InvocationPolicy::Multi);
        let target = SystemTarget::new(center.clone(), center.silo_address(), identity);
        let reference = ProbeContract::reference(Arc::new(target));

        // invocations run in the callee's context
        assert_eq!(Ok(Some(identity)), reference.caller().await);

        let elsewhere =
            SystemTarget::new(center.clone(), center.silo_address(), Identity::service());
        let reference = ProbeContract::reference(Arc::new(elsewhere));
        let err = reference.caller().await.expect_err("Reached a missing target");
        assert!(err.is_not_found());
    }
}
