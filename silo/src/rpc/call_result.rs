// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! This module contains the [CallResult] of a request/response exchange and
//! its supported operations

use crate::errors::CallErr;
use crate::message::{Body, Message, RejectionType, RemoteException, ResultKind};
use crate::Identity;

/// The outcome of sending a request and awaiting its response
#[derive(Debug, Eq, PartialEq)]
pub enum CallResult<TResult> {
    /// Success, with the result
    Success(TResult),
    /// The target silo refused the request
    Rejected(RejectionType, String),
    /// The method ran and raised an exception
    Failed(RemoteException),
    /// No response within the timeout
    Timeout,
    /// The correlation context was dropped without a response
    SenderError,
}

impl CallResult<Option<Vec<u8>>> {
    /// Classify a response message
    pub fn from_response(response: Message) -> Self {
        match (response.result, response.body) {
            (ResultKind::Success, Body::Value(value)) => Self::Success(value),
            (ResultKind::Error, Body::Exception(exception)) => Self::Failed(exception),
            (ResultKind::Rejection, Body::Rejection(reason)) => Self::Rejected(
                response
                    .rejection_type
                    .unwrap_or(RejectionType::Unrecoverable),
                reason,
            ),
            (result, body) => Self::Rejected(
                RejectionType::Unrecoverable,
                format!("Malformed response: {result:?} with {body:?}"),
            ),
        }
    }
}

impl<T> CallResult<T> {
    /// Determine if the [CallResult] is a [CallResult::Success]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Determine if the [CallResult] is a [CallResult::Timeout]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// Determine if the [CallResult] is a [CallResult::Rejected]
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(..))
    }

    /// Determine if the [CallResult] is a [CallResult::SenderError]
    pub fn is_send_error(&self) -> bool {
        matches!(self, Self::SenderError)
    }

    /// Maps the success value of the [CallResult] to another type
    pub fn map<O, F>(self, mapping: F) -> CallResult<O>
    where
        F: FnOnce(T) -> O,
    {
        match self {
            Self::Success(t) => CallResult::Success(mapping(t)),
            Self::Rejected(kind, reason) => CallResult::Rejected(kind, reason),
            Self::Failed(exception) => CallResult::Failed(exception),
            Self::Timeout => CallResult::Timeout,
            Self::SenderError => CallResult::SenderError,
        }
    }

    /// Transforms the [CallResult] into a [Result], naming `target` when the
    /// correlation context was lost
    pub fn into_result(self, target: Identity) -> Result<T, CallErr> {
        match self {
            Self::Success(t) => Ok(t),
            Self::Rejected(kind, reason) => Err(CallErr::Rejected { kind, reason }),
            Self::Failed(exception) => Err(CallErr::Remote(exception)),
            Self::Timeout => Err(CallErr::Timeout),
            Self::SenderError => Err(CallErr::Transport(format!(
                "Response context for '{target}' was dropped"
            ))),
        }
    }
}
