//! StockGuard Inventory Adapters
//!
//! Stock and price operations on [`Sku`] records. Stock changes hold a per-SKU
//! lock and commit through the versioned executor; price changes rely on the
//! versioned executor alone. Successful changes are written to an
//! [`AuditSink`].

pub mod audit;
pub mod model;
pub mod price;
pub mod stock;

pub use audit::{
    AuditRecord, AuditSink, InMemoryAuditSink, PriceHistory, StockChangeType, StockLog,
    TracingAuditSink,
};
pub use model::Sku;
pub use price::{BatchPriceResult, PriceAdjustment, PriceAdjustmentResult, PriceConfig, PriceService};
pub use stock::{BatchStockResult, StockConfig, StockOperation, StockOperationResult, StockService};
