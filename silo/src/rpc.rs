// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Request/response outcomes

pub mod call_result;

pub use call_result::CallResult;
