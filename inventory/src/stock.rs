//! Stock deduction and rollback.
//!
//! Every change to a SKU's stock holds the SKU's lock (`stock:{sku_id}`) and
//! commits through the versioned executor. The lock serializes callers across
//! processes; the version check still catches writers that bypass the lock,
//! such as the price adapter.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use stockguard_common::{
    BatchId, CancelSignal, EntityId, FailureKind, OperationResult, Result, StockGuardError,
};
use stockguard_lock::LockCoordinator;
use stockguard_versioning::{RetryPolicy, VersionSource, VersionedUpdateExecutor};

use crate::audit::{AuditRecord, AuditSink, StockChangeType, StockLog};
use crate::model::Sku;

/// Stock adapter configuration.
#[derive(Debug, Clone)]
pub struct StockConfig {
    /// Lease on the per-SKU lock.
    pub lock_lease: Duration,
    /// How long to wait for the per-SKU lock.
    pub lock_timeout: Duration,
    /// Retry policy for the versioned commit.
    pub retry: RetryPolicy,
}

impl Default for StockConfig {
    fn default() -> Self {
        Self {
            lock_lease: stockguard_common::constants::DEFAULT_LEASE,
            lock_timeout: stockguard_common::constants::DEFAULT_ACQUIRE_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

/// A requested stock change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockOperation {
    pub sku_id: EntityId,
    pub quantity: u32,
    pub order_no: String,
    pub operator: Option<String>,
}

impl StockOperation {
    pub fn new(sku_id: impl Into<EntityId>, quantity: u32, order_no: impl Into<String>) -> Self {
        Self {
            sku_id: sku_id.into(),
            quantity,
            order_no: order_no.into(),
            operator: None,
        }
    }

    /// Set the operator recorded in the audit log.
    pub fn with_operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = Some(operator.into());
        self
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.quantity == 0 {
            return Err("quantity must be greater than zero".to_string());
        }
        if self.order_no.trim().is_empty() {
            return Err("order number must not be empty".to_string());
        }
        Ok(())
    }
}

/// Outcome of one stock change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockOperationResult {
    pub sku_id: EntityId,
    pub outcome: OperationResult,
    pub old_stock: Option<u32>,
    pub new_stock: Option<u32>,
    /// Audit record id, when one was written.
    pub log_id: Option<Uuid>,
}

impl StockOperationResult {
    pub fn is_success(&self) -> bool {
        self.outcome.success
    }

    fn failed(sku_id: &EntityId, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            sku_id: sku_id.clone(),
            outcome: OperationResult::failure(kind, message, 0),
            old_stock: None,
            new_stock: None,
            log_id: None,
        }
    }
}

/// Outcome of a batch of stock changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStockResult {
    pub batch_id: BatchId,
    pub success: bool,
    pub message: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Per-operation results, in execution order. Compensations are not listed.
    pub results: Vec<StockOperationResult>,
}

/// Stock deduction and rollback over locked, versioned SKUs.
pub struct StockService {
    locks: Arc<LockCoordinator>,
    executor: VersionedUpdateExecutor,
    source: Arc<dyn VersionSource<Sku>>,
    audit: Arc<dyn AuditSink>,
    config: StockConfig,
}

impl StockService {
    /// Create a new stock service.
    pub fn new(
        locks: Arc<LockCoordinator>,
        source: Arc<dyn VersionSource<Sku>>,
        audit: Arc<dyn AuditSink>,
        config: StockConfig,
    ) -> Self {
        Self {
            locks,
            executor: VersionedUpdateExecutor::new(config.retry.clone()),
            source,
            audit,
            config,
        }
    }

    /// Executor used for commits, for its metrics.
    pub fn executor(&self) -> &VersionedUpdateExecutor {
        &self.executor
    }

    /// Take `op.quantity` units from the SKU's stock.
    ///
    /// Insufficient stock is a rejection, checked against the freshly
    /// committed SKU inside the versioned update.
    ///
    /// # Errors
    ///
    /// Store and source failures; business outcomes are in the result.
    #[instrument(skip(self), fields(sku_id = %op.sku_id, quantity = op.quantity, order_no = %op.order_no))]
    pub async fn deduct_stock(&self, op: &StockOperation) -> Result<StockOperationResult> {
        self.change_stock(op, StockChangeType::Deduct).await
    }

    /// Return `op.quantity` units to the SKU's stock.
    #[instrument(skip(self), fields(sku_id = %op.sku_id, quantity = op.quantity, order_no = %op.order_no))]
    pub async fn rollback_stock(&self, op: &StockOperation) -> Result<StockOperationResult> {
        self.change_stock(op, StockChangeType::Rollback).await
    }

    /// Deduct every operation in order, all or nothing.
    ///
    /// All operations are validated before any is applied. The first failure
    /// stops the batch and the deductions already applied are rolled back in
    /// reverse order.
    pub async fn batch_deduct(&self, ops: &[StockOperation]) -> Result<BatchStockResult> {
        let batch_id = BatchId::new();

        if ops.is_empty() {
            return Ok(BatchStockResult {
                batch_id,
                success: false,
                message: "operation list must not be empty".to_string(),
                total: 0,
                succeeded: 0,
                failed: 0,
                results: Vec::new(),
            });
        }

        for (index, op) in ops.iter().enumerate() {
            if let Err(reason) = op.validate() {
                warn!(%batch_id, index, %reason, "Batch rejected before execution");
                return Ok(BatchStockResult {
                    batch_id,
                    success: false,
                    message: format!("operation {}: {reason}", index + 1),
                    total: ops.len(),
                    succeeded: 0,
                    failed: ops.len(),
                    results: Vec::new(),
                });
            }
        }

        info!(%batch_id, total = ops.len(), "Starting batch deduction");

        let mut results = Vec::with_capacity(ops.len());
        let mut applied: Vec<&StockOperation> = Vec::new();

        for op in ops {
            let result = match self.deduct_stock(op).await {
                Ok(result) => result,
                Err(err) => {
                    self.compensate(&batch_id, &applied).await;
                    return Err(err);
                }
            };

            let ok = result.is_success();
            results.push(result);

            if ok {
                applied.push(op);
            } else {
                warn!(%batch_id, sku_id = %op.sku_id, "Batch deduction failed, compensating");
                self.compensate(&batch_id, &applied).await;
                break;
            }
        }

        let failed = results.iter().filter(|r| !r.is_success()).count();
        let succeeded = results.len() - failed;
        let success = failed == 0;

        info!(%batch_id, succeeded, failed, "Batch deduction finished");

        Ok(BatchStockResult {
            batch_id,
            success,
            message: if success {
                format!("deducted {succeeded} operations")
            } else {
                format!("batch aborted after {succeeded} operations, compensated")
            },
            total: ops.len(),
            succeeded,
            failed,
            results,
        })
    }

    /// Roll back every operation independently.
    pub async fn batch_rollback(&self, ops: &[StockOperation]) -> Result<BatchStockResult> {
        let batch_id = BatchId::new();
        let mut results = Vec::with_capacity(ops.len());

        for op in ops {
            results.push(self.rollback_stock(op).await?);
        }

        let failed = results.iter().filter(|r| !r.is_success()).count();
        let succeeded = results.len() - failed;

        Ok(BatchStockResult {
            batch_id,
            success: failed == 0,
            message: format!("rolled back {succeeded}, failed {failed}"),
            total: ops.len(),
            succeeded,
            failed,
            results,
        })
    }

    async fn compensate(&self, batch_id: &BatchId, applied: &[&StockOperation]) {
        for op in applied.iter().rev() {
            match self.rollback_stock(op).await {
                Ok(result) if result.is_success() => {
                    debug!(%batch_id, sku_id = %op.sku_id, "Compensated deduction");
                }
                Ok(result) => {
                    error!(
                        %batch_id,
                        sku_id = %op.sku_id,
                        quantity = op.quantity,
                        outcome = %result.outcome,
                        "Compensation failed, stock needs manual correction"
                    );
                }
                Err(err) => {
                    error!(
                        %batch_id,
                        sku_id = %op.sku_id,
                        quantity = op.quantity,
                        error = %err,
                        "Compensation failed, stock needs manual correction"
                    );
                }
            }
        }
    }

    async fn change_stock(
        &self,
        op: &StockOperation,
        change: StockChangeType,
    ) -> Result<StockOperationResult> {
        if let Err(reason) = op.validate() {
            return Ok(StockOperationResult::failed(
                &op.sku_id,
                FailureKind::InvalidInput,
                reason,
            ));
        }

        let key = Sku::stock_lock_key(&op.sku_id);
        let locked = self
            .locks
            .with_lock(&key, self.config.lock_lease, self.config.lock_timeout, || {
                self.apply(op, change)
            })
            .await;

        match locked {
            Ok(result) => result,
            Err(StockGuardError::AcquisitionTimeout { waited_ms, .. }) => {
                warn!(sku_id = %op.sku_id, waited_ms, "Stock lock busy");
                Ok(StockOperationResult::failed(
                    &op.sku_id,
                    FailureKind::LockUnavailable,
                    "system busy, please retry",
                ))
            }
            Err(StockGuardError::Cancelled(_)) => Ok(StockOperationResult::failed(
                &op.sku_id,
                FailureKind::Interrupted,
                "cancelled while waiting for stock lock",
            )),
            Err(err) => Err(err),
        }
    }

    async fn apply(
        &self,
        op: &StockOperation,
        change: StockChangeType,
    ) -> Result<StockOperationResult> {
        let quantity = op.quantity;
        let mut old_stock = None;

        let (outcome, sku) = self
            .executor
            .execute_by_id(
                self.source.as_ref(),
                &op.sku_id,
                |sku: &mut Sku| {
                    let available = sku.stock;
                    old_stock = Some(available);
                    sku.stock = match change {
                        StockChangeType::Deduct => available.checked_sub(quantity).ok_or_else(|| {
                            StockGuardError::MutationRejected(format!(
                                "insufficient stock: available {available}, requested {quantity}"
                            ))
                        })?,
                        StockChangeType::Rollback => available.checked_add(quantity).ok_or_else(|| {
                            StockGuardError::MutationRejected("stock overflow".to_string())
                        })?,
                    };
                    Ok(true)
                },
                &CancelSignal::never(),
            )
            .await?;

        let Some(sku) = sku.filter(|_| outcome.success) else {
            debug!(sku_id = %op.sku_id, outcome = %outcome, "Stock change not applied");
            return Ok(StockOperationResult {
                sku_id: op.sku_id.clone(),
                outcome,
                old_stock: None,
                new_stock: None,
                log_id: None,
            });
        };

        let old = old_stock.unwrap_or(sku.stock);
        let signed = i64::from(quantity);
        let log = StockLog {
            id: Uuid::now_v7(),
            sku_id: sku.id.clone(),
            product_id: sku.product_id.clone(),
            old_stock: old,
            new_stock: sku.stock,
            change_quantity: match change {
                StockChangeType::Deduct => -signed,
                StockChangeType::Rollback => signed,
            },
            change_type: change,
            order_no: op.order_no.clone(),
            operator: op.operator.clone(),
            version: sku.version,
            recorded_at: stockguard_common::now(),
        };
        let log_id = log.id;

        let log_id = match self.audit.record(AuditRecord::Stock(log)).await {
            Ok(()) => Some(log_id),
            Err(err) => {
                error!(sku_id = %sku.id, error = %err, "Stock log not written");
                None
            }
        };

        info!(
            sku_id = %sku.id,
            change = ?change,
            old_stock = old,
            new_stock = sku.stock,
            version = sku.version,
            "Stock changed"
        );

        Ok(StockOperationResult {
            sku_id: sku.id,
            outcome,
            old_stock: Some(old),
            new_stock: Some(sku.stock),
            log_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditSink;
    use rust_decimal_macros::dec;
    use stockguard_lock::{LockConfig, MemoryStore};
    use stockguard_versioning::InMemoryVersionSource;

    struct Fixture {
        service: StockService,
        source: Arc<InMemoryVersionSource<Sku>>,
        audit: Arc<InMemoryAuditSink>,
    }

    fn fixture(stock: &[(&str, u32)]) -> Fixture {
        let source = Arc::new(InMemoryVersionSource::new());
        for (id, units) in stock {
            source.insert(Sku::new(*id, "p-1", "Widget", *units, dec!(10)));
        }
        let audit = Arc::new(InMemoryAuditSink::new());
        let locks = Arc::new(LockCoordinator::new(
            Arc::new(MemoryStore::new()),
            LockConfig::default(),
        ));
        let service = StockService::new(locks, source.clone(), audit.clone(), StockConfig::default());

        Fixture {
            service,
            source,
            audit,
        }
    }

    fn stock_of(fixture: &Fixture, id: &str) -> u32 {
        fixture.source.get(&EntityId::new(id)).unwrap().stock
    }

    #[tokio::test]
    async fn test_deduct_writes_stock_log() {
        let f = fixture(&[("1001", 10)]);

        let result = f
            .service
            .deduct_stock(&StockOperation::new("1001", 3, "ORD-1").with_operator("alice"))
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.old_stock, Some(10));
        assert_eq!(result.new_stock, Some(7));
        assert_eq!(stock_of(&f, "1001"), 7);

        let logs = f.audit.stock_logs(&EntityId::new("1001"));
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].change_quantity, -3);
        assert_eq!(logs[0].version, 1);
        assert_eq!(logs[0].operator.as_deref(), Some("alice"));
        assert_eq!(result.log_id, Some(logs[0].id));
    }

    #[tokio::test]
    async fn test_insufficient_stock_is_rejected() {
        let f = fixture(&[("1001", 2)]);

        let result = f
            .service
            .deduct_stock(&StockOperation::new("1001", 5, "ORD-1"))
            .await
            .unwrap();

        assert!(result.outcome.is_rejected());
        assert!(result.outcome.message.contains("insufficient stock"));
        assert_eq!(stock_of(&f, "1001"), 2);
        assert!(f.audit.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_operation_never_touches_stock() {
        let f = fixture(&[("1001", 2)]);

        let zero = f
            .service
            .deduct_stock(&StockOperation::new("1001", 0, "ORD-1"))
            .await
            .unwrap();
        assert_eq!(zero.outcome.failure, Some(FailureKind::InvalidInput));

        let no_order = f
            .service
            .rollback_stock(&StockOperation::new("1001", 1, "  "))
            .await
            .unwrap();
        assert_eq!(no_order.outcome.failure, Some(FailureKind::InvalidInput));
        assert_eq!(stock_of(&f, "1001"), 2);
    }

    #[tokio::test]
    async fn test_unknown_sku_reports_missing_entity() {
        let f = fixture(&[]);

        let result = f
            .service
            .deduct_stock(&StockOperation::new("404", 1, "ORD-1"))
            .await
            .unwrap();

        assert_eq!(result.outcome.failure, Some(FailureKind::MissingEntity));
    }

    #[tokio::test]
    async fn test_rollback_adds_stock_back() {
        let f = fixture(&[("1001", 4)]);

        let result = f
            .service
            .rollback_stock(&StockOperation::new("1001", 6, "ORD-1"))
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(stock_of(&f, "1001"), 10);
        assert_eq!(
            f.audit.stock_logs(&EntityId::new("1001"))[0].change_type,
            StockChangeType::Rollback
        );
    }

    #[tokio::test]
    async fn test_batch_failure_compensates_applied_deductions() {
        let f = fixture(&[("a", 5), ("b", 5), ("c", 1)]);
        let ops = vec![
            StockOperation::new("a", 2, "ORD-9"),
            StockOperation::new("b", 3, "ORD-9"),
            StockOperation::new("c", 4, "ORD-9"),
        ];

        let batch = f.service.batch_deduct(&ops).await.unwrap();

        assert!(!batch.success);
        assert_eq!(batch.succeeded, 2);
        assert_eq!(batch.failed, 1);
        assert_eq!(batch.results.len(), 3);
        assert_eq!(stock_of(&f, "a"), 5);
        assert_eq!(stock_of(&f, "b"), 5);
        assert_eq!(stock_of(&f, "c"), 1);

        let b_logs = f.audit.stock_logs(&EntityId::new("b"));
        assert_eq!(b_logs[0].change_type, StockChangeType::Rollback);
    }

    #[tokio::test]
    async fn test_batch_prevalidation_applies_nothing() {
        let f = fixture(&[("a", 5)]);
        let ops = vec![
            StockOperation::new("a", 1, "ORD-1"),
            StockOperation::new("a", 0, "ORD-1"),
        ];

        let batch = f.service.batch_deduct(&ops).await.unwrap();

        assert!(!batch.success);
        assert!(batch.message.starts_with("operation 2"));
        assert_eq!(stock_of(&f, "a"), 5);
    }

    #[tokio::test]
    async fn test_batch_rollback_counts_each_operation() {
        let f = fixture(&[("a", 0)]);
        let ops = vec![
            StockOperation::new("a", 1, "ORD-1"),
            StockOperation::new("missing", 1, "ORD-1"),
        ];

        let batch = f.service.batch_rollback(&ops).await.unwrap();

        assert!(!batch.success);
        assert_eq!(batch.succeeded, 1);
        assert_eq!(batch.failed, 1);
        assert_eq!(stock_of(&f, "a"), 1);
    }
}
