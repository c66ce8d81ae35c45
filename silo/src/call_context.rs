// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The identity on whose behalf the current task is running. The dispatcher
//! scopes a [CallContext] around every invocation so nested calls made by a
//! method carry the activation's identity as their sender.

use std::future::Future;

use crate::Identity;

tokio::task_local! {
    static CURRENT_CALL: CallContext;
}

/// Per-invocation ambient state
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CallContext {
    identity: Identity,
}

impl CallContext {
    /// A context for calls made on behalf of `identity`
    pub fn new(identity: Identity) -> Self {
        Self { identity }
    }

    /// The calling identity
    pub fn identity(&self) -> Identity {
        self.identity
    }

    /// The context of the current task, if inside an invocation
    pub fn current() -> Option<CallContext> {
        CURRENT_CALL.try_with(|ctx| *ctx).ok()
    }

    /// Run `future` with this context installed
    pub async fn scope<F: Future>(self, future: F) -> F::Output {
        CURRENT_CALL.scope(self, future).await
    }
}
