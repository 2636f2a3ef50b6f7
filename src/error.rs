// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Benjamin Chess
//! Error types for the region key-value engine.

use thiserror::Error;

/// The error type returned by fallible engine operations.
///
/// `LockConflict` is deliberately absent here: a losing `try_lock`/
/// `release_lock` call is a *successful* call whose [`crate::lock_manager::Owner`]
/// response carries `success = false`, never a thrown error.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A caller-supplied argument violates an operation's contract,
    /// e.g. a negative `step` to `get_sequence`.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An unexpected failure from an underlying container or backend
    /// (a poisoned lock, a snapshot I/O failure).
    #[error("internal store failure: {0}")]
    Internal(String),
}

/// A specialized `Result` for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
