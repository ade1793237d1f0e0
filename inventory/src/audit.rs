//! Audit records written after successful stock and price changes.

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use stockguard_common::{EntityId, Result, StockGuardError, Timestamp};

/// Direction of a stock change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockChangeType {
    /// Stock taken for an order.
    Deduct,
    /// Stock returned from a cancelled order.
    Rollback,
}

/// One committed stock change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLog {
    pub id: Uuid,
    pub sku_id: EntityId,
    pub product_id: String,
    pub old_stock: u32,
    pub new_stock: u32,
    /// Signed change: negative for deductions.
    pub change_quantity: i64,
    pub change_type: StockChangeType,
    pub order_no: String,
    pub operator: Option<String>,
    /// SKU version after the change.
    pub version: u64,
    pub recorded_at: Timestamp,
}

/// One committed price change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceHistory {
    pub id: Uuid,
    pub sku_id: EntityId,
    pub product_id: String,
    pub old_price: Decimal,
    pub new_price: Decimal,
    pub reason: String,
    pub operator: String,
    /// SKU version after the change.
    pub price_version: u64,
    pub recorded_at: Timestamp,
}

/// Any audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditRecord {
    Stock(StockLog),
    Price(PriceHistory),
}

impl AuditRecord {
    /// Record identifier.
    pub fn id(&self) -> Uuid {
        match self {
            AuditRecord::Stock(log) => log.id,
            AuditRecord::Price(history) => history.id,
        }
    }

    /// SKU the record is about.
    pub fn sku_id(&self) -> &EntityId {
        match self {
            AuditRecord::Stock(log) => &log.sku_id,
            AuditRecord::Price(history) => &history.sku_id,
        }
    }
}

/// Receives finished audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist `record`.
    async fn record(&self, record: AuditRecord) -> Result<()>;
}

/// Keeps records in memory, oldest first.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records, oldest first.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    /// Stock logs for `sku_id`, newest first.
    pub fn stock_logs(&self, sku_id: &EntityId) -> Vec<StockLog> {
        self.records
            .lock()
            .iter()
            .rev()
            .filter_map(|record| match record {
                AuditRecord::Stock(log) if &log.sku_id == sku_id => Some(log.clone()),
                _ => None,
            })
            .collect()
    }

    /// Price history for `sku_id`, newest first.
    pub fn price_history(&self, sku_id: &EntityId) -> Vec<PriceHistory> {
        self.records
            .lock()
            .iter()
            .rev()
            .filter_map(|record| match record {
                AuditRecord::Price(history) if &history.sku_id == sku_id => Some(history.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, record: AuditRecord) -> Result<()> {
        self.records.lock().push(record);
        Ok(())
    }
}

/// Emits each record as a JSON `info` event on the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: AuditRecord) -> Result<()> {
        let json = serde_json::to_string(&record)
            .map_err(|e| StockGuardError::InternalError(format!("audit encoding failed: {e}")))?;
        info!(target: "audit", record_id = %record.id(), sku_id = %record.sku_id(), record = %json);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn stock_log(sku: &str, new_stock: u32) -> AuditRecord {
        AuditRecord::Stock(StockLog {
            id: Uuid::now_v7(),
            sku_id: EntityId::new(sku),
            product_id: "p-1".to_string(),
            old_stock: new_stock + 1,
            new_stock,
            change_quantity: -1,
            change_type: StockChangeType::Deduct,
            order_no: "ORD-1".to_string(),
            operator: None,
            version: 1,
            recorded_at: stockguard_common::now(),
        })
    }

    #[tokio::test]
    async fn test_in_memory_sink_filters_newest_first() {
        let sink = InMemoryAuditSink::new();
        sink.record(stock_log("a", 9)).await.unwrap();
        sink.record(stock_log("b", 4)).await.unwrap();
        sink.record(stock_log("a", 8)).await.unwrap();

        let logs = sink.stock_logs(&EntityId::new("a"));
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].new_stock, 8);
        assert!(sink.price_history(&EntityId::new("a")).is_empty());
        assert_eq!(sink.len(), 3);
    }

    #[test]
    fn test_record_serializes_with_kind_tag() {
        let record = AuditRecord::Price(PriceHistory {
            id: Uuid::now_v7(),
            sku_id: EntityId::new("a"),
            product_id: "p-1".to_string(),
            old_price: dec!(10.00),
            new_price: dec!(12.50),
            reason: "promo end".to_string(),
            operator: "ops".to_string(),
            price_version: 3,
            recorded_at: stockguard_common::now(),
        });

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "price");
        assert_eq!(json["price_version"], 3);
    }

    #[tokio::test]
    async fn test_tracing_sink_accepts_records() {
        assert!(TracingAuditSink.record(stock_log("a", 1)).await.is_ok());
    }
}
