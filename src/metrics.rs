// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Benjamin Chess
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter_vec, register_int_gauge,
    CounterVec, HistogramVec, IntCounterVec, IntGauge,
};

/// A collection of Prometheus metrics for this engine.
pub struct Metrics;

impl Metrics {
    /// Force initialization of all static metrics. Call once at startup
    /// of the embedding process to ensure they're registered even before
    /// the first operation runs.
    pub fn init() {
        let _ = &*REQUEST_COUNT;
        let _ = &*REQUEST_LATENCY;
        let _ = &*LOCK_COUNT;
        let _ = &*LOCK_TIME_SECONDS;
        let _ = &*PRIMARY_STORE_SIZE_BYTES;
        let _ = &*PRIMARY_STORE_KEYS;
    }
}

/// Tracks the count of requests by operation name.
pub static REQUEST_COUNT: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "region_kv_requests_total",
        "Total requests received, labeled by operation name",
        &["op"]
    )
    .expect("cannot create metric: region_kv_requests_total")
});

/// Tracks the latency of requests, labeled by operation name.
pub static REQUEST_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "region_kv_request_latency_seconds",
        "Request latency distribution",
        &["op"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]
    )
    .expect("cannot create metric: region_kv_request_latency_seconds")
});

pub static LOCK_COUNT: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "region_kv_lock_count",
        "Number of times a per-key critical section was entered, labeled by operation",
        &["op"]
    )
    .expect("cannot create metric: region_kv_lock_count")
});

pub static LOCK_TIME_SECONDS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "region_kv_lock_seconds",
        "Accumulated time spent waiting to enter a per-key critical section",
        &["op"]
    )
    .expect("cannot create metric: region_kv_lock_seconds")
});

/// Approximate total size in bytes of values held in the primary store.
pub static PRIMARY_STORE_SIZE_BYTES: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "region_kv_primary_store_size_bytes",
        "Approximate total size (in bytes) of values in the primary store"
    )
    .expect("cannot create metric: region_kv_primary_store_size_bytes")
});

/// Current number of keys held in the primary store.
pub static PRIMARY_STORE_KEYS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "region_kv_primary_store_keys",
        "Current number of keys stored in the primary store"
    )
    .expect("cannot create metric: region_kv_primary_store_keys")
});
