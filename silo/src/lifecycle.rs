// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Staged startup and shutdown of a silo.
//!
//! Observers subscribe to a [LifecycleStage] under a name. [LifecycleObservable::start]
//! runs the stages in ascending order, every observer of one stage concurrently,
//! and aborts at the first failure. [LifecycleObservable::stop] walks the stages
//! that were started in descending order and only logs failures, so shutdown
//! always runs to completion.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::join_all;

use crate::concurrency::{watch, WatchReceiver, WatchSender};
use crate::errors::SiloProcessingErr;

/// Ordered startup stages
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub enum LifecycleStage {
    /// Runtime internals
    Core,
    /// System targets
    System,
    /// Cluster membership registration
    Joining,
    /// User services
    User,
}

impl LifecycleStage {
    /// Every stage, in start order
    pub const ALL: [LifecycleStage; 4] = [
        LifecycleStage::Core,
        LifecycleStage::System,
        LifecycleStage::Joining,
        LifecycleStage::User,
    ];
}

impl Display for LifecycleStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A participant in staged startup/shutdown
#[async_trait::async_trait]
pub trait LifecycleObserver: Send + Sync + 'static {
    /// The stage is starting
    async fn on_start(&self, stage: LifecycleStage) -> Result<(), SiloProcessingErr>;

    /// The stage is stopping
    async fn on_stop(&self, _stage: LifecycleStage) -> Result<(), SiloProcessingErr> {
        Ok(())
    }
}

/// Startup failures
#[derive(Debug)]
pub enum LifecycleErr {
    /// [LifecycleObservable::start] was called twice
    AlreadyStarted,
    /// An observer failed, aborting startup
    StageFailed {
        /// The stage being started
        stage: LifecycleStage,
        /// The observer's subscription name
        observer: String,
        /// Its error
        source: SiloProcessingErr,
    },
}

impl std::error::Error for LifecycleErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::StageFailed { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl Display for LifecycleErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyStarted => write!(f, "Lifecycle already started"),
            Self::StageFailed {
                stage,
                observer,
                source,
            } => write!(f, "Observer '{observer}' failed to start stage {stage}: {source}"),
        }
    }
}

type Subscribers = BTreeMap<LifecycleStage, Vec<(String, Arc<dyn LifecycleObserver>)>>;

/// Staged pub/sub sequencing startup and shutdown
#[derive(Default)]
pub struct LifecycleObservable {
    observers: Mutex<Subscribers>,
    started: Mutex<Vec<LifecycleStage>>,
    starting: AtomicBool,
}

impl LifecycleObservable {
    /// Create an empty observable
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `observer` to `stage` under `name`
    pub fn subscribe(
        &self,
        name: impl Into<String>,
        stage: LifecycleStage,
        observer: Arc<dyn LifecycleObserver>,
    ) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(stage)
            .or_default()
            .push((name.into(), observer));
    }

    fn observers_of(&self, stage: LifecycleStage) -> Vec<(String, Arc<dyn LifecycleObserver>)> {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&stage)
            .cloned()
            .unwrap_or_default()
    }

    /// Stages started so far, in start order
    pub fn started_stages(&self) -> Vec<LifecycleStage> {
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns [true] once `stage` has completed its start
    pub fn is_started(&self, stage: LifecycleStage) -> bool {
        self.started_stages().contains(&stage)
    }

    /// Start every stage in ascending order
    pub async fn start(&self) -> Result<(), LifecycleErr> {
        if self.starting.swap(true, Ordering::AcqRel) {
            return Err(LifecycleErr::AlreadyStarted);
        }
        for stage in LifecycleStage::ALL {
            let observers = self.observers_of(stage);
            log::debug!("Starting lifecycle stage {stage} ({} observer(s))", observers.len());
            let results = join_all(observers.iter().map(|(name, observer)| async move {
                (name, observer.on_start(stage).await)
            }))
            .await;
            // the stage counts as started even when it fails, so a later stop
            // gives its observers a chance to clean up
            self.started
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(stage);
            for (name, result) in results {
                if let Err(source) = result {
                    return Err(LifecycleErr::StageFailed {
                        stage,
                        observer: name.clone(),
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    /// Stop every started stage in descending order, logging failures
    pub async fn stop(&self) {
        let stages = std::mem::take(
            &mut *self
                .started
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for stage in stages.into_iter().rev() {
            let observers = self.observers_of(stage);
            log::debug!("Stopping lifecycle stage {stage}");
            let results = join_all(observers.iter().map(|(name, observer)| async move {
                (name, observer.on_stop(stage).await)
            }))
            .await;
            for (name, result) in results {
                if let Err(err) = result {
                    log::warn!("Observer '{name}' failed to stop stage {stage}: {err}");
                }
            }
        }
    }
}

/// Process-wide cancellation flag raised at the start of shutdown
#[derive(Clone)]
pub struct ShutdownSignal {
    sender: Arc<WatchSender<bool>>,
    receiver: WatchReceiver<bool>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        let (sender, receiver) = watch(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }
}

impl std::fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ShutdownSignal({})", self.is_cancelled())
    }
}

impl ShutdownSignal {
    /// A fresh, un-raised signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Returns [true] once raised
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once the signal is raised
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        while !*receiver.borrow_and_update() {
            if receiver.changed().await.is_err() {
                return;
            }
        }
    }
}
