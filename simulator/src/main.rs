//! StockGuard Simulator
//!
//! Drives concurrent buyers against locked, versioned stock and checks that
//! no unit is sold twice.

use std::time::Instant;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod controller;
mod metrics;
mod scenario;

use controller::SimulationController;
use metrics::degraded_share;
use scenario::Scenario;

/// StockGuard Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "StockGuard contention simulator")]
struct Args {
    /// Number of concurrent buyers
    #[arg(short, long, default_value = "8")]
    workers: usize,

    /// Orders placed by each buyer
    #[arg(short, long, default_value = "25")]
    orders: usize,

    /// Number of SKUs to seed
    #[arg(long, default_value = "4")]
    skus: usize,

    /// Initial stock per SKU
    #[arg(long, default_value = "100")]
    stock: u32,

    /// Largest quantity per order
    #[arg(long, default_value = "3")]
    max_quantity: u32,

    /// Run without a lock store (process-local locks only)
    #[arg(long)]
    degraded: bool,

    /// Scenario to run instead of random load
    #[arg(short, long)]
    scenario: Option<String>,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if args.skus == 0 {
        anyhow::bail!("--skus must be at least 1");
    }

    info!("Starting StockGuard Simulator");

    let started = Instant::now();

    let controller = if let Some(scenario_name) = &args.scenario {
        let scenario = Scenario::load(scenario_name)?;
        let controller = SimulationController::new(
            scenario.skus,
            scenario.initial_stock,
            args.degraded,
            args.seed,
        )?;
        controller.initialize();

        info!("Running scenario: {}", scenario_name);
        controller.run_scenario(scenario).await?;
        controller
    } else {
        let controller =
            SimulationController::new(args.skus, args.stock, args.degraded, args.seed)?;
        controller.initialize();

        info!("Workers: {}, orders each: {}", args.workers, args.orders);
        controller
            .run(args.workers, args.orders, args.max_quantity)
            .await?;
        controller
    };

    let elapsed = started.elapsed().as_secs_f64();

    controller.verify()?;

    // Print metrics
    let metrics = controller.get_metrics().await;
    let locks = controller.lock_metrics();
    info!("Simulation complete, no oversell detected");
    info!(
        "Orders: {} placed, {} sold ({} units), {} out of stock, {} failed",
        metrics.orders,
        metrics.sold,
        metrics.units_sold,
        metrics.out_of_stock,
        metrics.failed()
    );
    for (code, count) in &metrics.failures {
        info!("  {}: {}", code, count);
    }
    info!(
        "Throughput: {:.1} orders/s",
        metrics.orders as f64 / elapsed.max(f64::EPSILON)
    );
    info!(
        "Retries: {:.2} per order, {} at most",
        metrics.retries_per_order(),
        metrics.max_retries
    );
    for (bucket, count) in metrics.latency_histogram() {
        info!("  latency {}: {}", bucket, count);
    }
    info!(
        "Degraded acquisitions: {:.1}%",
        degraded_share(&locks) * 100.0
    );
    info!("Lock metrics: {:?}", locks);
    info!("Versioned update metrics: {:?}", controller.executor_metrics());
    info!("Summary: {}", serde_json::to_string(&metrics)?);

    Ok(())
}
