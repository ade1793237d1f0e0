//! Scripted simulation scenarios.

use serde::{Deserialize, Serialize};

/// A simulation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// SKUs to seed, named `SKU-0`, `SKU-1`, ...
    pub skus: usize,
    /// Units each SKU starts with.
    pub initial_stock: u32,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// A step in a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScenarioStep {
    /// Wait for a duration.
    Wait { millis: u64 },
    /// Run a burst of concurrent single-unit orders against one SKU.
    Burst { sku: String, orders: usize },
    /// Deduct stock once.
    Deduct { sku: String, quantity: u32 },
    /// Return stock once.
    Rollback { sku: String, quantity: u32 },
    /// Change a price.
    AdjustPrice { sku: String, price: String },
    /// Inject a fault.
    InjectFault { fault_type: FaultType },
    /// Clear all faults.
    ClearFaults,
    /// Assert a condition.
    Assert { condition: AssertCondition },
}

/// Types of faults that can be injected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FaultType {
    /// Lock store stops answering.
    StoreOutage,
    /// Lock store fails the next few calls.
    StoreFlaps { failures: u32 },
}

/// Conditions that can be asserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AssertCondition {
    /// SKU stock equals.
    StockEquals { sku: String, stock: u32 },
    /// SKU price equals.
    PriceEquals { sku: String, price: String },
    /// SKU version equals.
    VersionEquals { sku: String, version: u64 },
}

impl Scenario {
    /// Load a scenario by name.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "flash-sale" => Ok(Self::flash_sale()),
            "store-outage" => Ok(Self::store_outage()),
            "reprice-under-load" => Ok(Self::reprice_under_load()),
            _ => Err(anyhow::anyhow!("Unknown scenario: {}", name)),
        }
    }

    /// More buyers than units on one SKU.
    fn flash_sale() -> Self {
        Self {
            name: "flash-sale".to_string(),
            description: "50 buyers race for 20 units".to_string(),
            skus: 1,
            initial_stock: 20,
            steps: vec![
                ScenarioStep::Burst {
                    sku: "SKU-0".to_string(),
                    orders: 50,
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::StockEquals {
                        sku: "SKU-0".to_string(),
                        stock: 0,
                    },
                },
                ScenarioStep::Rollback {
                    sku: "SKU-0".to_string(),
                    quantity: 5,
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::StockEquals {
                        sku: "SKU-0".to_string(),
                        stock: 5,
                    },
                },
            ],
        }
    }

    /// Orders keep flowing while the lock store is down.
    fn store_outage() -> Self {
        Self {
            name: "store-outage".to_string(),
            description: "Lock store outage mid-run, local fallback keeps one process safe"
                .to_string(),
            skus: 1,
            initial_stock: 20,
            steps: vec![
                ScenarioStep::Deduct {
                    sku: "SKU-0".to_string(),
                    quantity: 2,
                },
                ScenarioStep::InjectFault {
                    fault_type: FaultType::StoreOutage,
                },
                ScenarioStep::Burst {
                    sku: "SKU-0".to_string(),
                    orders: 10,
                },
                ScenarioStep::ClearFaults,
                ScenarioStep::InjectFault {
                    fault_type: FaultType::StoreFlaps { failures: 2 },
                },
                ScenarioStep::Deduct {
                    sku: "SKU-0".to_string(),
                    quantity: 1,
                },
                ScenarioStep::ClearFaults,
                ScenarioStep::Assert {
                    condition: AssertCondition::StockEquals {
                        sku: "SKU-0".to_string(),
                        stock: 7,
                    },
                },
            ],
        }
    }

    /// Price changes racing stock changes on the same SKU.
    fn reprice_under_load() -> Self {
        Self {
            name: "reprice-under-load".to_string(),
            description: "Price adjustments interleaved with order bursts".to_string(),
            skus: 1,
            initial_stock: 100,
            steps: vec![
                ScenarioStep::Burst {
                    sku: "SKU-0".to_string(),
                    orders: 5,
                },
                ScenarioStep::AdjustPrice {
                    sku: "SKU-0".to_string(),
                    price: "12.50".to_string(),
                },
                ScenarioStep::Wait { millis: 10 },
                ScenarioStep::Burst {
                    sku: "SKU-0".to_string(),
                    orders: 5,
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::PriceEquals {
                        sku: "SKU-0".to_string(),
                        price: "12.50".to_string(),
                    },
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::VersionEquals {
                        sku: "SKU-0".to_string(),
                        version: 11,
                    },
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_known_scenarios() {
        for name in ["flash-sale", "store-outage", "reprice-under-load"] {
            let scenario = Scenario::load(name).unwrap();
            assert_eq!(scenario.name, name);
            assert!(!scenario.steps.is_empty());
        }
        assert!(Scenario::load("nope").is_err());
    }
}
