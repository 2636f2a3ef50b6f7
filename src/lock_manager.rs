// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Benjamin Chess
//! Distributed-lock protocol: reentrant try-lock / release-lock with lease
//! expiry and fencing-token issuance.
//!
//! Safety here depends on the assumption that local clocks on participating
//! processes advance at approximately the same rate, with error small
//! relative to lease duration. The manager never reads the
//! system clock itself — `now_millis` always comes from the caller — so
//! replaying the same sequence of calls against a replicated log is
//! deterministic.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::fencing::FencingStore;
use crate::metrics;

type ByteArray = Vec<u8>;

/// Sentinel `remaining_millis` values. Part of the wire contract with
/// downstream callers — preserved as named constants rather than collapsed
/// into an enum, since the numeric code is what they key off of.
/// All are negative so they never collide with a real `deadline - now`
/// remaining-time value, which is always >= 0 on the fail-different-owner
/// path.
pub const KEEP_LEASE_FAIL: i64 = -1;
pub const KEEP_LEASE_SUCCESS: i64 = -2;
pub const FIRST_TIME_SUCCESS: i64 = -3;
pub const NEW_ACQUIRE_SUCCESS: i64 = -4;
pub const REENTRANT_SUCCESS: i64 = -5;

/// The acquirer side of a lock request.
#[derive(Clone, Debug)]
pub struct Acquirer {
    pub id: ByteArray,
    pub lease_millis: i64,
    pub now_millis: i64,
    pub context: ByteArray,
}

/// The in-store record describing a lock's current holder, and the
/// response shape for every lock operation.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Owner {
    pub id: ByteArray,
    pub deadline_millis: i64,
    /// Either a real `deadline - now` remaining-time value (fail,
    /// different acquirer) or one of the sentinel constants above.
    pub remaining_millis: i64,
    pub fencing_token: i64,
    pub acquires: i32,
    pub context: ByteArray,
    pub success: bool,
}

/// Holds one [`Owner`] per locked key and coordinates with a
/// [`FencingStore`] to mint fencing tokens on each new acquisition.
pub struct LockManager {
    owners: DashMap<ByteArray, Owner>,
    fencing: Arc<FencingStore>,
}

impl LockManager {
    pub fn new(fencing: Arc<FencingStore>) -> Self {
        LockManager {
            owners: DashMap::new(),
            fencing,
        }
    }

    /// Attempts to acquire (or renew, or reenter) the lock on `key`. Outcome
    /// depends on whether a prior owner exists, whether it has expired,
    /// whether the caller matches it, and whether `keep_lease` was set: see
    /// the match arms below for the full table.
    pub fn try_lock(
        &self,
        key: ByteArray,
        fencing_key: &[u8],
        keep_lease: bool,
        acquirer: Acquirer,
    ) -> Owner {
        let lock_time = std::time::Instant::now();
        metrics::LOCK_COUNT.with_label_values(&["try_lock"]).inc();
        metrics::REQUEST_COUNT
            .with_label_values(&["try_lock"])
            .inc();

        let result = match self.owners.entry(key) {
            Entry::Vacant(vac) => {
                if keep_lease {
                    Owner {
                        id: acquirer.id,
                        deadline_millis: 0,
                        remaining_millis: KEEP_LEASE_FAIL,
                        fencing_token: 0,
                        acquires: 0,
                        context: acquirer.context,
                        success: false,
                    }
                } else {
                    let token = self.fencing.next_fencing_token(fencing_key);
                    let owner = Owner {
                        id: acquirer.id,
                        deadline_millis: acquirer.now_millis + acquirer.lease_millis,
                        remaining_millis: FIRST_TIME_SUCCESS,
                        fencing_token: token,
                        acquires: 1,
                        context: acquirer.context,
                        success: true,
                    };
                    vac.insert(owner.clone());
                    owner
                }
            }
            Entry::Occupied(mut occ) => {
                let prev = occ.get().clone();
                let expired = prev.deadline_millis < acquirer.now_millis;
                let same_acquirer = prev.id == acquirer.id;

                if expired {
                    if keep_lease {
                        Owner {
                            id: prev.id,
                            deadline_millis: prev.deadline_millis,
                            remaining_millis: KEEP_LEASE_FAIL,
                            fencing_token: prev.fencing_token,
                            acquires: prev.acquires,
                            context: prev.context,
                            success: false,
                        }
                    } else {
                        let token = self.fencing.next_fencing_token(fencing_key);
                        let owner = Owner {
                            id: acquirer.id,
                            deadline_millis: acquirer.now_millis + acquirer.lease_millis,
                            remaining_millis: NEW_ACQUIRE_SUCCESS,
                            fencing_token: token,
                            acquires: 1,
                            context: acquirer.context,
                            success: true,
                        };
                        *occ.get_mut() = owner.clone();
                        owner
                    }
                } else if same_acquirer {
                    if keep_lease {
                        let owner = Owner {
                            id: prev.id,
                            deadline_millis: acquirer.now_millis + acquirer.lease_millis,
                            remaining_millis: KEEP_LEASE_SUCCESS,
                            fencing_token: prev.fencing_token,
                            acquires: prev.acquires,
                            context: prev.context,
                            success: true,
                        };
                        *occ.get_mut() = owner.clone();
                        owner
                    } else {
                        let owner = Owner {
                            id: prev.id,
                            deadline_millis: acquirer.now_millis + acquirer.lease_millis,
                            remaining_millis: REENTRANT_SUCCESS,
                            fencing_token: prev.fencing_token,
                            acquires: prev.acquires + 1,
                            context: acquirer.context,
                            success: true,
                        };
                        *occ.get_mut() = owner.clone();
                        owner
                    }
                } else {
                    Owner {
                        id: prev.id,
                        deadline_millis: prev.deadline_millis,
                        remaining_millis: prev.deadline_millis - acquirer.now_millis,
                        fencing_token: prev.fencing_token,
                        acquires: prev.acquires,
                        context: prev.context,
                        success: false,
                    }
                }
            }
        };
        metrics::LOCK_TIME_SECONDS
            .with_label_values(&["try_lock"])
            .inc_by(lock_time.elapsed().as_secs_f64());
        result
    }

    /// Releases one reentrant acquisition of the lock on `key`. Removes the
    /// record once `acquires` reaches zero.
    pub fn release_lock(&self, key: &[u8], acquirer: Acquirer) -> Owner {
        metrics::LOCK_COUNT
            .with_label_values(&["release_lock"])
            .inc();
        metrics::REQUEST_COUNT
            .with_label_values(&["release_lock"])
            .inc();

        match self.owners.entry(key.to_vec()) {
            Entry::Vacant(_) => {
                log::warn!(
                    "release_lock: no owner record for key {:?}; treating as already released",
                    String::from_utf8_lossy(key)
                );
                Owner {
                    id: acquirer.id,
                    deadline_millis: 0,
                    remaining_millis: 0,
                    fencing_token: 0,
                    acquires: 0,
                    context: acquirer.context,
                    success: true,
                }
            }
            Entry::Occupied(mut occ) => {
                let prev = occ.get().clone();
                if prev.id != acquirer.id {
                    return Owner {
                        success: false,
                        ..prev
                    };
                }
                let remaining_acquires = prev.acquires - 1;
                if remaining_acquires <= 0 {
                    occ.remove();
                    Owner {
                        acquires: 0,
                        success: true,
                        ..prev
                    }
                } else {
                    let owner = Owner {
                        acquires: remaining_acquires,
                        success: true,
                        ..prev
                    };
                    *occ.get_mut() = owner.clone();
                    owner
                }
            }
        }
    }

    pub(crate) fn snapshot_in(&self, predicate: impl Fn(&[u8]) -> bool) -> Vec<(ByteArray, Owner)> {
        self.owners
            .iter()
            .filter(|e| predicate(e.key()))
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub(crate) fn merge_from(&self, entries: Vec<(ByteArray, Owner)>) {
        for (key, owner) in entries {
            self.owners.insert(key, owner);
        }
    }
}
