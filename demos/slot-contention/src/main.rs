//! Slot Contention Demo
//!
//! Races many callers for the same charter slot and reports how each attempt
//! ended. Exactly one caller should come away with a booking.
//!
//! # Running the Example
//!
//! ```bash
//! cargo run -p slot-contention
//! ```
//!
//! Set `DATABASE_URL` to run against `PostgreSQL` instead of the in-memory
//! store. Pool sizing comes from the `CHARTERBOOK_POOL_*` variables, and
//! `SLOT_CONTENTION_CALLERS` sets how many callers race (default 20).

#![allow(missing_docs)]

use anyhow::Context;
use charterbook_core::environment::SystemClock;
use charterbook_core::types::{SlotKey, Version};
use charterbook_core::VersionedResourceStore;
use charterbook_postgres::PostgresStore;
use charterbook_runtime::metrics::MetricsExporter;
use charterbook_runtime::{CoordinatorConfig, PoolConfig, TransactionCoordinator};
use charterbook_testing::InMemoryStore;
use chrono::NaiveDate;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CALLERS: usize = 20;

async fn open_store(
    key: &SlotKey,
    pool: &PoolConfig,
) -> anyhow::Result<Arc<dyn VersionedResourceStore>> {
    if let Ok(url) = std::env::var("DATABASE_URL") {
        let store = PostgresStore::connect(&url, pool).await?;
        store.migrate().await?;
        store.seed_availability(key, true, Version::INITIAL).await?;
        tracing::info!("✓ Using PostgreSQL store");
        return Ok(Arc::new(store));
    }

    // A little latency so callers actually overlap.
    let store = InMemoryStore::new().with_latency(Duration::from_millis(2));
    store.seed(key.clone(), true, Version::INITIAL);
    tracing::info!("✓ Using in-memory store");
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    // 1. Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,charterbook_runtime=info,slot_contention=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Slot Contention Demo");

    // 2. Install Prometheus recorder
    let mut exporter = MetricsExporter::new();
    exporter.install()?;

    // 3. Build the coordinator
    let config = CoordinatorConfig::from_env();
    let callers = std::env::var("SLOT_CONTENTION_CALLERS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_CALLERS);
    let date = NaiveDate::from_ymd_opt(2025, 7, 14).context("invalid demo date")?;
    let key = SlotKey::new("boat-7", date);

    let store = open_store(&key, &config.pool).await?;
    let coordinator = Arc::new(TransactionCoordinator::new(
        store,
        Arc::new(SystemClock),
        config,
    )?);

    tracing::info!(callers, slot = %key, "✓ Coordinator ready, racing callers");

    // 4. Race
    let attempts = (0..callers).map(|caller| {
        let coordinator = Arc::clone(&coordinator);
        let key = key.clone();
        tokio::spawn(async move {
            coordinator
                .reserve(key.resource_id, key.date, json!({ "caller": caller, "guests": 4 }))
                .await
        })
    });
    let results = futures::future::join_all(attempts).await;

    // 5. Report
    let mut outcomes: BTreeMap<&'static str, usize> = BTreeMap::new();
    for result in results {
        match result? {
            Ok(booking) => {
                tracing::info!(booking_id = %booking.id, payload = %booking.payload, "Winner");
                *outcomes.entry("reserved").or_default() += 1;
            }
            Err(err) => *outcomes.entry(err.error.kind()).or_default() += 1,
        }
    }

    tracing::info!(?outcomes, "Contention finished");
    tracing::info!(stats = ?coordinator.pool_stats(), "Pool after run");

    println!("{}", serde_json::to_string_pretty(&outcomes)?);
    println!("{}", serde_json::to_string_pretty(&coordinator.pool_stats())?);

    if let Some(rendered) = exporter.render() {
        println!("{rendered}");
    }

    Ok(())
}
