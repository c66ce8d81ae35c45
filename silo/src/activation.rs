// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Activations: the per-instance state the dispatcher needs to run messages
//! against a hosted service or system target.
//!
//! An [Activation] couples the instance's [MethodInvoker] with its
//! [InvocationPolicy], an in-flight counter used for overload protection, a
//! [Mailbox] used to serialize `Single` policy execution, and running
//! statistics of the time spent executing messages.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::concurrency::Duration;
use crate::contract::ServiceDescriptor;
use crate::invoker::MethodInvoker;
use crate::Identity;

/// Start/stop ordering class of an activation
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub enum Priority {
    /// Runtime internals, started first and stopped last
    Core,
    /// Runtime system targets (membership, ...)
    System,
    /// User services
    User,
}

/// How concurrent messages to one activation are executed
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub enum InvocationPolicy {
    /// Every message runs as soon as it arrives, with no ordering
    Multi,
    /// Messages run one at a time, in arrival order
    Single,
}

struct MailboxState<T> {
    queue: VecDeque<T>,
    in_sending: bool,
}

/// FIFO queue with an "is being drained" flag, both guarded by one lock so a
/// producer and the drain loop always agree on who owns the drain.
pub struct Mailbox<T> {
    state: Mutex<MailboxState<T>>,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(MailboxState {
                queue: VecDeque::new(),
                in_sending: false,
            }),
        }
    }
}

impl<T> Mailbox<T> {
    fn lock(&self) -> MutexGuard<'_, MailboxState<T>> {
        // the state stays consistent across a panic, there is no multi-step
        // mutation
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an item. Returns [true] if the mailbox flipped from idle to
    /// draining, in which case the caller must start the (single) drain loop.
    pub fn enqueue(&self, item: T) -> bool {
        let mut state = self.lock();
        state.queue.push_back(item);
        if state.in_sending {
            false
        } else {
            state.in_sending = true;
            true
        }
    }

    /// Take the next item for the drain loop. When the queue is empty the
    /// mailbox returns to idle and [None] tells the loop to exit.
    pub fn next(&self) -> Option<T> {
        let mut state = self.lock();
        let item = state.queue.pop_front();
        if item.is_none() {
            state.in_sending = false;
        }
        item
    }

    /// Take every queued item and return to idle. The caller owns the
    /// returned items and must answer them.
    pub fn abandon(&self) -> Vec<T> {
        let mut state = self.lock();
        state.in_sending = false;
        state.queue.drain(..).collect()
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Returns [true] if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns [true] while a drain loop owns the mailbox
    pub fn is_draining(&self) -> bool {
        self.lock().in_sending
    }
}

/// Cumulative execution time of an activation
#[derive(Debug, Default)]
pub struct ConsumingTime {
    total_nanos: AtomicU64,
    completed: AtomicU64,
}

impl ConsumingTime {
    /// Record one finished execution
    pub fn record(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.total_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Total time spent executing messages
    pub fn total(&self) -> Duration {
        Duration::from_nanos(self.total_nanos.load(Ordering::Relaxed))
    }

    /// Number of executions recorded
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Mean execution time, [None] before the first execution
    pub fn average(&self) -> Option<Duration> {
        let completed = self.completed();
        (completed > 0)
            .then(|| Duration::from_nanos(self.total_nanos.load(Ordering::Relaxed) / completed))
    }
}

/// Marks one admitted message as in flight until dropped
pub struct InFlightGuard {
    activation: Arc<Activation>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.activation.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for InFlightGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "InFlightGuard({})", self.activation.identity)
    }
}

/// Mailbox item of a `Single` policy activation
pub type QueuedMessage = (crate::Message, InFlightGuard);

/// A hosted instance as seen by the dispatcher
pub struct Activation {
    identity: Identity,
    invoker: Arc<dyn MethodInvoker>,
    descriptor: Arc<ServiceDescriptor>,
    priority: Priority,
    policy: InvocationPolicy,
    mailbox: Mailbox<QueuedMessage>,
    in_flight: AtomicUsize,
    killed: AtomicBool,
    consuming_time: ConsumingTime,
}

impl std::fmt::Debug for Activation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Activation")
            .field("identity", &self.identity)
            .field("interface", &self.descriptor.name())
            .field("priority", &self.priority)
            .field("policy", &self.policy)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl Activation {
    /// Create a new activation
    pub fn new(
        identity: Identity,
        invoker: Arc<dyn MethodInvoker>,
        priority: Priority,
        policy: InvocationPolicy,
    ) -> Self {
        let descriptor = invoker.descriptor();
        Self {
            identity,
            invoker,
            descriptor,
            priority,
            policy,
            mailbox: Mailbox::default(),
            in_flight: AtomicUsize::new(0),
            killed: AtomicBool::new(false),
            consuming_time: ConsumingTime::default(),
        }
    }

    /// The activation's identity
    pub fn identity(&self) -> Identity {
        self.identity
    }

    /// The invoker of the hosted instance
    pub fn invoker(&self) -> &Arc<dyn MethodInvoker> {
        &self.invoker
    }

    /// The interface served
    pub fn descriptor(&self) -> &Arc<ServiceDescriptor> {
        &self.descriptor
    }

    /// Start/stop priority
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Invocation policy
    pub fn policy(&self) -> InvocationPolicy {
        self.policy
    }

    /// The `Single` policy mailbox
    pub fn mailbox(&self) -> &Mailbox<QueuedMessage> {
        &self.mailbox
    }

    /// Messages admitted and not yet finished
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Flag the activation as removed from its directory. Messages still
    /// queued are refused by the drain loop instead of executed.
    pub fn mark_killed(&self) {
        self.killed.store(true, Ordering::Release);
    }

    /// Returns [true] once the activation was killed
    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    /// Execution statistics
    pub fn consuming_time(&self) -> &ConsumingTime {
        &self.consuming_time
    }

    /// Admit one message unless `threshold` (> 0) messages are already in
    /// flight. A threshold of 0 never rejects.
    pub fn try_admit(self: &Arc<Self>, threshold: usize) -> Option<InFlightGuard> {
        let mut current = self.in_flight.load(Ordering::Acquire);
        loop {
            if threshold > 0 && current >= threshold {
                return None;
            }
            match self.in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(InFlightGuard {
                        activation: self.clone(),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }
}
