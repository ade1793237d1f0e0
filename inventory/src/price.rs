//! Price adjustment.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};
use uuid::Uuid;

use stockguard_common::{
    CancelSignal, EntityId, FailureKind, OperationResult, Result, StockGuardError,
};
use stockguard_versioning::{RetryPolicy, VersionSource, VersionedUpdateExecutor};

use crate::audit::{AuditRecord, AuditSink, PriceHistory};
use crate::model::Sku;

/// Price adapter configuration.
#[derive(Debug, Clone, Default)]
pub struct PriceConfig {
    pub retry: RetryPolicy,
}

/// A requested price change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceAdjustment {
    pub sku_id: EntityId,
    pub new_price: Decimal,
    pub reason: String,
    pub operator: String,
}

impl PriceAdjustment {
    pub fn new(
        sku_id: impl Into<EntityId>,
        new_price: Decimal,
        reason: impl Into<String>,
        operator: impl Into<String>,
    ) -> Self {
        Self {
            sku_id: sku_id.into(),
            new_price,
            reason: reason.into(),
            operator: operator.into(),
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.new_price <= Decimal::ZERO {
            return Err("price must be greater than zero".to_string());
        }
        if self.reason.trim().is_empty() {
            return Err("adjustment reason must not be empty".to_string());
        }
        if self.operator.trim().is_empty() {
            return Err("operator must not be empty".to_string());
        }
        Ok(())
    }
}

/// Outcome of one price change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceAdjustmentResult {
    pub sku_id: EntityId,
    pub outcome: OperationResult,
    pub old_price: Option<Decimal>,
    pub new_price: Option<Decimal>,
    /// SKU version carrying the new price.
    pub price_version: Option<u64>,
    pub history_id: Option<Uuid>,
}

impl PriceAdjustmentResult {
    pub fn is_success(&self) -> bool {
        self.outcome.success
    }
}

/// Outcome of a batch of price changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPriceResult {
    pub success: bool,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<PriceAdjustmentResult>,
}

/// Price changes through versioned updates only; no lock is taken.
pub struct PriceService {
    executor: VersionedUpdateExecutor,
    source: Arc<dyn VersionSource<Sku>>,
    audit: Arc<dyn AuditSink>,
}

impl PriceService {
    pub fn new(
        source: Arc<dyn VersionSource<Sku>>,
        audit: Arc<dyn AuditSink>,
        config: PriceConfig,
    ) -> Self {
        Self {
            executor: VersionedUpdateExecutor::new(config.retry),
            source,
            audit,
        }
    }

    /// Set a SKU's price. Setting the current price again is a rejection.
    #[instrument(skip(self), fields(sku_id = %adj.sku_id, new_price = %adj.new_price))]
    pub async fn adjust_price(&self, adj: &PriceAdjustment) -> Result<PriceAdjustmentResult> {
        if let Err(reason) = adj.validate() {
            return Ok(PriceAdjustmentResult {
                sku_id: adj.sku_id.clone(),
                outcome: OperationResult::failure(FailureKind::InvalidInput, reason, 0),
                old_price: None,
                new_price: None,
                price_version: None,
                history_id: None,
            });
        }

        let new_price = adj.new_price;
        let mut old_price = None;

        let (outcome, sku) = self
            .executor
            .execute_by_id(
                self.source.as_ref(),
                &adj.sku_id,
                |sku: &mut Sku| {
                    old_price = Some(sku.price);
                    if sku.price == new_price {
                        return Err(StockGuardError::MutationRejected(
                            "new price equals current price".to_string(),
                        ));
                    }
                    sku.price = new_price;
                    Ok(true)
                },
                &CancelSignal::never(),
            )
            .await?;

        let Some(sku) = sku.filter(|_| outcome.success) else {
            return Ok(PriceAdjustmentResult {
                sku_id: adj.sku_id.clone(),
                outcome,
                old_price: None,
                new_price: None,
                price_version: None,
                history_id: None,
            });
        };

        let old = old_price.unwrap_or(sku.price);
        let history = PriceHistory {
            id: Uuid::now_v7(),
            sku_id: sku.id.clone(),
            product_id: sku.product_id.clone(),
            old_price: old,
            new_price: sku.price,
            reason: adj.reason.clone(),
            operator: adj.operator.clone(),
            price_version: sku.version,
            recorded_at: stockguard_common::now(),
        };
        let history_id = history.id;

        let history_id = match self.audit.record(AuditRecord::Price(history)).await {
            Ok(()) => Some(history_id),
            Err(err) => {
                error!(sku_id = %sku.id, error = %err, "Price history not written");
                None
            }
        };

        info!(
            sku_id = %sku.id,
            old_price = %old,
            new_price = %sku.price,
            version = sku.version,
            operator = %adj.operator,
            "Price adjusted"
        );

        Ok(PriceAdjustmentResult {
            sku_id: sku.id,
            outcome,
            old_price: Some(old),
            new_price: Some(sku.price),
            price_version: Some(sku.version),
            history_id,
        })
    }

    /// Apply adjustments independently. Succeeds if any adjustment succeeded.
    pub async fn batch_adjust(&self, adjustments: &[PriceAdjustment]) -> Result<BatchPriceResult> {
        let mut results = Vec::with_capacity(adjustments.len());
        for adj in adjustments {
            results.push(self.adjust_price(adj).await?);
        }

        let succeeded = results.iter().filter(|r| r.is_success()).count();
        Ok(BatchPriceResult {
            success: succeeded > 0,
            total: adjustments.len(),
            succeeded,
            failed: results.len() - succeeded,
            results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditSink;
    use rust_decimal_macros::dec;
    use stockguard_versioning::InMemoryVersionSource;

    fn service() -> (PriceService, Arc<InMemoryVersionSource<Sku>>, Arc<InMemoryAuditSink>) {
        let source = Arc::new(InMemoryVersionSource::new());
        source.insert(Sku::new("1001", "p-1", "Widget", 10, dec!(19.90)));
        let audit = Arc::new(InMemoryAuditSink::new());
        let service = PriceService::new(source.clone(), audit.clone(), PriceConfig::default());
        (service, source, audit)
    }

    #[tokio::test]
    async fn test_adjust_records_history_with_version() {
        let (service, source, audit) = service();

        let result = service
            .adjust_price(&PriceAdjustment::new("1001", dec!(17.50), "promotion", "ops"))
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.old_price, Some(dec!(19.90)));
        assert_eq!(result.price_version, Some(1));
        assert_eq!(source.get(&EntityId::new("1001")).unwrap().price, dec!(17.50));

        let history = audit.price_history(&EntityId::new("1001"));
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].reason, "promotion");
        assert_eq!(result.history_id, Some(history[0].id));
    }

    #[tokio::test]
    async fn test_same_price_is_rejected() {
        let (service, source, audit) = service();

        let result = service
            .adjust_price(&PriceAdjustment::new("1001", dec!(19.90), "noop", "ops"))
            .await
            .unwrap();

        assert!(result.outcome.is_rejected());
        assert_eq!(source.get(&EntityId::new("1001")).unwrap().version, 0);
        assert!(audit.is_empty());
    }

    #[tokio::test]
    async fn test_validation() {
        let (service, _source, _audit) = service();

        for adj in [
            PriceAdjustment::new("1001", dec!(0), "free", "ops"),
            PriceAdjustment::new("1001", dec!(5), " ", "ops"),
            PriceAdjustment::new("1001", dec!(5), "cut", ""),
        ] {
            let result = service.adjust_price(&adj).await.unwrap();
            assert_eq!(result.outcome.failure, Some(FailureKind::InvalidInput));
        }
    }

    #[tokio::test]
    async fn test_batch_succeeds_if_any_succeeds() {
        let (service, _source, _audit) = service();

        let batch = service
            .batch_adjust(&[
                PriceAdjustment::new("404", dec!(1), "typo", "ops"),
                PriceAdjustment::new("1001", dec!(21), "raise", "ops"),
            ])
            .await
            .unwrap();

        assert!(batch.success);
        assert_eq!(batch.succeeded, 1);
        assert_eq!(batch.failed, 1);
    }
}
