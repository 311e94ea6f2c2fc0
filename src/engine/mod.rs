//! Booking workflow engine.
//!
//! Owns the request → approve/reject lifecycle and the invariant that no two
//! confirmed rows on one facility overlap. Each mutating operation runs its
//! conflict check and its writes inside one store transaction. Everything up to
//! the commit is bounded by [`Config::op_timeout`].

mod conflict;
mod error;
mod mutations;
mod queries;

pub use error::EngineError;

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::observability;
use crate::store::{BookingStore, StoreError};

pub struct Engine {
    store: Arc<dyn BookingStore>,
    config: Config,
}

impl Engine {
    pub fn new(store: Arc<dyn BookingStore>, config: Config) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn BookingStore> {
        &self.store
    }

    /// Run one workflow operation and record its metrics.
    async fn timed<T, F>(&self, operation: &'static str, fut: F) -> Result<T, EngineError>
    where
        F: Future<Output = Result<T, EngineError>>,
    {
        let started = Instant::now();
        let result = fut.await;

        let status = observability::status_label(&result);
        metrics::counter!(observability::OPERATIONS_TOTAL, "operation" => operation, "status" => status)
            .increment(1);
        metrics::histogram!(observability::OPERATION_DURATION_SECONDS, "operation" => operation)
            .record(started.elapsed().as_secs_f64());
        if let Err(EngineError::Conflict { .. }) = &result {
            metrics::counter!(observability::CONFLICTS_TOTAL, "operation" => operation).increment(1);
        }
        result
    }

    /// Bound the part of an operation that runs before its commit: lock
    /// acquisition, checks and staged writes. On elapse the future is dropped,
    /// which rolls back any open transaction. Commits are never run under this
    /// bound, so an operation that reached the WAL is not reported as failed.
    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, EngineError>
    where
        F: Future<Output = Result<T, EngineError>>,
    {
        match tokio::time::timeout(self.config.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(operation, timeout = ?self.config.op_timeout, "operation timed out");
                Err(EngineError::Storage(StoreError::Timeout))
            }
        }
    }
}
