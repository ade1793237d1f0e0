//! Simulation controller.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use stockguard_common::EntityId;
use stockguard_inventory::{
    InMemoryAuditSink, PriceAdjustment, PriceConfig, PriceService, Sku, StockChangeType,
    StockConfig, StockOperation, StockService,
};
use stockguard_lock::{LockConfig, LockCoordinator, LockMetricsSnapshot, MemoryStore};
use stockguard_versioning::{ExecutorMetricsSnapshot, InMemoryVersionSource};

use crate::metrics::SimulationMetrics;
use crate::scenario::{AssertCondition, FaultType, Scenario, ScenarioStep};

/// Controls the simulation.
pub struct SimulationController {
    /// Number of SKUs.
    sku_count: usize,
    /// Units each SKU starts with.
    initial_stock: u32,
    /// Random number generator.
    rng: Arc<Mutex<StdRng>>,
    /// Lock store, switchable for fault injection.
    store: Arc<MemoryStore>,
    /// Lock coordinator shared by all workers.
    locks: Arc<LockCoordinator>,
    /// SKU records.
    source: Arc<InMemoryVersionSource<Sku>>,
    /// Audit trail.
    audit: Arc<InMemoryAuditSink>,
    /// Stock adapter.
    stock: Arc<StockService>,
    /// Price adapter.
    price: Arc<PriceService>,
    /// Simulation metrics.
    metrics: Arc<RwLock<SimulationMetrics>>,
}

impl SimulationController {
    /// Create a new simulation controller.
    ///
    /// With `degraded` set the coordinator has no store at all and every lock
    /// is process-local.
    pub fn new(
        sku_count: usize,
        initial_stock: u32,
        degraded: bool,
        seed: Option<u64>,
    ) -> anyhow::Result<Self> {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        let lock_config = LockConfig::from_env();
        lock_config
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid lock configuration: {e}"))?;

        let store = Arc::new(MemoryStore::new());
        let locks = if degraded {
            Arc::new(LockCoordinator::local_only(lock_config))
        } else {
            Arc::new(LockCoordinator::new(store.clone(), lock_config))
        };

        let source = Arc::new(InMemoryVersionSource::new());
        let audit = Arc::new(InMemoryAuditSink::new());
        let stock = Arc::new(StockService::new(
            locks.clone(),
            source.clone(),
            audit.clone(),
            StockConfig::default(),
        ));
        let price = Arc::new(PriceService::new(
            source.clone(),
            audit.clone(),
            PriceConfig::default(),
        ));

        Ok(Self {
            sku_count,
            initial_stock,
            rng: Arc::new(Mutex::new(rng)),
            store,
            locks,
            source,
            audit,
            stock,
            price,
            metrics: Arc::new(RwLock::new(SimulationMetrics::new())),
        })
    }

    /// Seed the SKUs.
    pub fn initialize(&self) {
        info!(
            "Initializing simulation with {} SKUs of {} units",
            self.sku_count, self.initial_stock
        );

        for (index, id) in self.sku_ids().into_iter().enumerate() {
            let price = Decimal::new(999, 2) + Decimal::from(index);
            self.source
                .insert(Sku::new(id, "PRODUCT-1", format!("Item {index}"), self.initial_stock, price));
        }
    }

    fn sku_ids(&self) -> Vec<String> {
        (0..self.sku_count).map(|i| format!("SKU-{i}")).collect()
    }

    /// Run `workers` concurrent buyers, each placing `orders` random orders.
    pub async fn run(&self, workers: usize, orders: usize, max_quantity: u32) -> anyhow::Result<()> {
        info!(workers, orders, "Running simulation");

        let skus = Arc::new(self.sku_ids());
        let mut handles = Vec::with_capacity(workers);

        for worker in 0..workers {
            let stock = self.stock.clone();
            let metrics = self.metrics.clone();
            let rng = self.rng.clone();
            let skus = skus.clone();

            handles.push(tokio::spawn(async move {
                for n in 0..orders {
                    let (sku, quantity) = {
                        let mut rng = rng.lock().await;
                        let sku = skus[rng.gen_range(0..skus.len())].clone();
                        (sku, rng.gen_range(1..=max_quantity.max(1)))
                    };

                    let op = StockOperation::new(sku, quantity, format!("ORD-{worker}-{n}"))
                        .with_operator(format!("worker-{worker}"));
                    place_order(&stock, &metrics, &op).await;
                }
            }));
        }

        for joined in futures::future::join_all(handles).await {
            joined.context("worker panicked")?;
        }

        Ok(())
    }

    /// Run a scenario.
    pub async fn run_scenario(&self, scenario: Scenario) -> anyhow::Result<()> {
        info!("Running scenario: {} - {}", scenario.name, scenario.description);

        for step in &scenario.steps {
            self.execute_step(step).await?;
        }

        Ok(())
    }

    /// Execute a single scenario step.
    async fn execute_step(&self, step: &ScenarioStep) -> anyhow::Result<()> {
        match step {
            ScenarioStep::Wait { millis } => {
                tokio::time::sleep(Duration::from_millis(*millis)).await;
            }
            ScenarioStep::Burst { sku, orders } => {
                info!("Burst of {} orders on {}", orders, sku);

                let mut handles = Vec::with_capacity(*orders);
                for n in 0..*orders {
                    let stock = self.stock.clone();
                    let metrics = self.metrics.clone();
                    let op = StockOperation::new(sku.as_str(), 1, format!("BURST-{sku}-{n}"));
                    handles.push(tokio::spawn(async move {
                        place_order(&stock, &metrics, &op).await;
                    }));
                }
                for joined in futures::future::join_all(handles).await {
                    joined.context("burst order panicked")?;
                }
            }
            ScenarioStep::Deduct { sku, quantity } => {
                let op = StockOperation::new(sku.as_str(), *quantity, "SCENARIO");
                place_order(&self.stock, &self.metrics, &op).await;
            }
            ScenarioStep::Rollback { sku, quantity } => {
                let op = StockOperation::new(sku.as_str(), *quantity, "SCENARIO");
                let result = self.stock.rollback_stock(&op).await?;
                if !result.is_success() {
                    bail!("rollback on {sku} failed: {}", result.outcome);
                }
            }
            ScenarioStep::AdjustPrice { sku, price } => {
                let price = Decimal::from_str(price).context("invalid price in scenario")?;
                let adj = PriceAdjustment::new(sku.as_str(), price, "scenario", "simulator");
                let result = self.price.adjust_price(&adj).await?;
                info!("Price adjustment on {}: {}", sku, result.outcome);
            }
            ScenarioStep::InjectFault { fault_type } => {
                info!("Injecting fault {:?}", fault_type);
                match fault_type {
                    FaultType::StoreOutage => self.store.set_available(false),
                    FaultType::StoreFlaps { failures } => self.store.fail_next(*failures),
                }
            }
            ScenarioStep::ClearFaults => {
                info!("Clearing faults");
                self.store.set_available(true);
                self.store.fail_next(0);
            }
            ScenarioStep::Assert { condition } => self.check(condition)?,
        }

        Ok(())
    }

    fn check(&self, condition: &AssertCondition) -> anyhow::Result<()> {
        let load = |sku: &str| {
            self.source
                .get(&EntityId::new(sku))
                .with_context(|| format!("unknown SKU {sku}"))
        };

        match condition {
            AssertCondition::StockEquals { sku, stock } => {
                let actual = load(sku)?.stock;
                if actual != *stock {
                    bail!("{sku}: expected stock {stock}, found {actual}");
                }
            }
            AssertCondition::PriceEquals { sku, price } => {
                let expected = Decimal::from_str(price).context("invalid price in scenario")?;
                let actual = load(sku)?.price;
                if actual != expected {
                    bail!("{sku}: expected price {expected}, found {actual}");
                }
            }
            AssertCondition::VersionEquals { sku, version } => {
                let actual = load(sku)?.version;
                if actual != *version {
                    bail!("{sku}: expected version {version}, found {actual}");
                }
            }
        }

        info!("Assertion passed: {:?}", condition);
        Ok(())
    }

    /// Check that every unit is accounted for: current stock plus audited
    /// deductions minus audited rollbacks equals the initial stock.
    pub fn verify(&self) -> anyhow::Result<()> {
        for id in self.sku_ids() {
            let sku_id = EntityId::new(id.as_str());
            let sku = self
                .source
                .get(&sku_id)
                .with_context(|| format!("SKU {id} vanished"))?;

            let mut deducted: i64 = 0;
            let mut returned: i64 = 0;
            for log in self.audit.stock_logs(&sku_id) {
                match log.change_type {
                    StockChangeType::Deduct => deducted += -log.change_quantity,
                    StockChangeType::Rollback => returned += log.change_quantity,
                }
            }

            let accounted = i64::from(sku.stock) + deducted - returned;
            if accounted != i64::from(self.initial_stock) {
                bail!(
                    "{id}: stock {} + deducted {deducted} - returned {returned} != initial {}",
                    sku.stock,
                    self.initial_stock
                );
            }

            info!(
                sku_id = %id,
                stock = sku.stock,
                deducted,
                returned,
                version = sku.version,
                "SKU verified"
            );
        }

        Ok(())
    }

    /// Get simulation metrics.
    pub async fn get_metrics(&self) -> SimulationMetrics {
        self.metrics.read().await.clone()
    }

    /// Lock coordinator counters.
    pub fn lock_metrics(&self) -> LockMetricsSnapshot {
        self.locks.metrics().snapshot()
    }

    /// Versioned update counters from the stock adapter.
    pub fn executor_metrics(&self) -> ExecutorMetricsSnapshot {
        self.stock.executor().metrics().snapshot()
    }
}

async fn place_order(
    stock: &StockService,
    metrics: &RwLock<SimulationMetrics>,
    op: &StockOperation,
) {
    let started = Instant::now();
    let result = stock.deduct_stock(op).await;
    let latency = started.elapsed();

    match result {
        Ok(result) => {
            if !result.is_success() && !result.outcome.is_rejected() {
                warn!(sku_id = %op.sku_id, outcome = %result.outcome, "Order failed");
            }
            metrics
                .write()
                .await
                .record(op.quantity, &result.outcome, latency);
        }
        Err(err) => {
            warn!(sku_id = %op.sku_id, error = %err, "Order errored");
            metrics.write().await.record_error(err.error_code(), latency);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_random_run_accounts_for_every_unit() {
        let controller = SimulationController::new(3, 15, false, Some(7)).unwrap();
        controller.initialize();

        controller.run(6, 10, 3).await.unwrap();
        controller.verify().unwrap();

        let metrics = controller.get_metrics().await;
        assert_eq!(metrics.orders, 60);
        assert_eq!(metrics.sold + metrics.out_of_stock + metrics.failed(), 60);
        assert!(metrics.units_sold <= 45);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_builtin_scenarios_pass() {
        for name in ["flash-sale", "store-outage", "reprice-under-load"] {
            let scenario = Scenario::load(name).unwrap();
            let controller = SimulationController::new(
                scenario.skus,
                scenario.initial_stock,
                false,
                Some(1),
            )
            .unwrap();
            controller.initialize();

            controller.run_scenario(scenario).await.unwrap();
            controller.verify().unwrap();
        }
    }
}
