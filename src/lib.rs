// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Benjamin Chess
//! An in-memory, region-partitioned raw key-value engine meant to sit behind
//! a replicated-log apply loop: an ordered byte-keyed primary store, a
//! sequence allocator, a fencing-token allocator, a reentrant distributed
//! lock manager with lease expiry, and a region-scoped snapshot engine.
//!
//! See `DESIGN.md` at the repository root for the full design rationale.
//! This crate has no RPC, WAL, or persistence surface of its own — callers
//! own replication, durability, and transport; `Engine` (in [`request`]) is
//! the single entry point meant to be driven from an apply loop.

pub mod comparator;
pub mod error;
pub mod fencing;
pub mod lock_manager;
mod metrics;
pub mod primary_store;
pub mod region;
pub mod request;
pub mod sequence;
pub mod snapshot;

pub use error::{EngineError, Result};
pub use request::Engine;

/// Registers every metric up front so the first scrape after startup
/// already carries every series. Embedding binaries should call this once
/// at startup, before serving traffic.
pub fn init_metrics() {
    metrics::Metrics::init();
}
