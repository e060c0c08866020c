//! Connection pool settings and metrics.

use crate::config::DatabaseSettings;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Settings applied to each per-credential pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_size: u32,
    pub connection_timeout: Duration,
    pub query_timeout: Duration,
    pub recycle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            connection_timeout: Duration::from_secs(10),
            query_timeout: Duration::from_secs(30),
            recycle_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&DatabaseSettings> for PoolConfig {
    fn from(settings: &DatabaseSettings) -> Self {
        Self {
            max_size: settings.pool_size,
            connection_timeout: settings.connect_timeout,
            query_timeout: settings.query_timeout,
            ..Default::default()
        }
    }
}

/// Pool metrics for monitoring.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    pub pools_created: AtomicU32,
    pub pools_evicted: AtomicU32,
    pub connection_errors: AtomicU32,
    pub plans_requested: AtomicU32,
    pub queries_executed: AtomicU32,
    pub query_errors: AtomicU32,
}

impl PoolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_pool_created(&self) {
        self.pools_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pool_evicted(&self) {
        self.pools_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_error(&self) {
        self.connection_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_plan_requested(&self) {
        self.plans_requested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query_executed(&self) {
        self.queries_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query_error(&self) {
        self.query_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            pools_created: self.pools_created.load(Ordering::Relaxed),
            pools_evicted: self.pools_evicted.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            plans_requested: self.plans_requested.load(Ordering::Relaxed),
            queries_executed: self.queries_executed.load(Ordering::Relaxed),
            query_errors: self.query_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of pool metrics.
#[derive(Debug, Clone, Serialize)]
pub struct PoolMetricsSnapshot {
    pub pools_created: u32,
    pub pools_evicted: u32,
    pub connection_errors: u32,
    pub plans_requested: u32,
    pub queries_executed: u32,
    pub query_errors: u32,
}
