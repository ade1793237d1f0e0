//! Inventory records.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockguard_common::EntityId;
use stockguard_versioning::VersionedEntity;

/// A stock-keeping unit: the unit of stock and price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sku {
    /// SKU identifier.
    pub id: EntityId,
    /// Owning product.
    pub product_id: String,
    /// Display name.
    pub name: String,
    /// Units on hand.
    pub stock: u32,
    /// Unit price.
    pub price: Decimal,
    /// Optimistic version.
    pub version: u64,
}

impl Sku {
    /// Create a SKU at version 0.
    pub fn new(
        id: impl Into<EntityId>,
        product_id: impl Into<String>,
        name: impl Into<String>,
        stock: u32,
        price: Decimal,
    ) -> Self {
        Self {
            id: id.into(),
            product_id: product_id.into(),
            name: name.into(),
            stock,
            price,
            version: 0,
        }
    }

    /// Lock key guarding this SKU's stock.
    pub fn stock_lock_key(id: &EntityId) -> String {
        format!("stock:{id}")
    }
}

impl VersionedEntity for Sku {
    fn entity_id(&self) -> &EntityId {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}
