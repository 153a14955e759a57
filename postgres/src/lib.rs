//! `PostgreSQL` versioned resource store for Charterbook.
//!
//! This crate provides a PostgreSQL-based store that implements the
//! `AvailabilityRepository` and `BookingRepository` traits from
//! `charterbook-core`. It uses sqlx with runtime-checked queries and supports:
//!
//! - Versioned availability records with single-statement compare-and-swap
//! - Booking rows with JSONB payloads
//! - Connection pooling sized from [`PoolConfig`]
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE slot_availability (
//!     resource_id TEXT NOT NULL,
//!     slot_date DATE NOT NULL,
//!     is_available BOOLEAN NOT NULL,
//!     version BIGINT NOT NULL,
//!     PRIMARY KEY (resource_id, slot_date)
//! );
//!
//! CREATE TABLE slot_bookings (
//!     id UUID PRIMARY KEY,
//!     resource_id TEXT NOT NULL,
//!     slot_date DATE NOT NULL,
//!     payload JSONB NOT NULL,
//!     status TEXT NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL
//! );
//! ```
//!
//! # Example
//!
//! ```ignore
//! use charterbook_postgres::PostgresStore;
//! use charterbook_runtime::PoolConfig;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresStore::connect("postgres://localhost/charters", &PoolConfig::from_env()).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use charterbook_core::store::{AvailabilityRepository, BookingRepository, StoreError, StoreFuture};
use charterbook_core::types::{
    AvailabilityRecord, AvailabilityState, BookingId, BookingRecord, BookingStatus, ResourceId,
    SlotKey, Version,
};
use charterbook_runtime::PoolConfig;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

const MIGRATIONS: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS slot_availability (
        resource_id TEXT NOT NULL,
        slot_date DATE NOT NULL,
        is_available BOOLEAN NOT NULL,
        version BIGINT NOT NULL,
        PRIMARY KEY (resource_id, slot_date)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS slot_bookings (
        id UUID PRIMARY KEY,
        resource_id TEXT NOT NULL,
        slot_date DATE NOT NULL,
        payload JSONB NOT NULL,
        status TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_slot_bookings_slot ON slot_bookings(resource_id, slot_date)",
];

const BOOKING_COLUMNS: &str = "id, resource_id, slot_date, payload, status, created_at";

type BookingRow = (Uuid, String, NaiveDate, serde_json::Value, String, DateTime<Utc>);

/// PostgreSQL-backed versioned resource store.
///
/// Cloning is cheap; clones share the underlying connection pool.
#[derive(Clone, Debug)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to `database_url` with a pool sized from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the configuration is invalid or the
    /// connection fails.
    pub async fn connect(database_url: &str, config: &PoolConfig) -> Result<Self, StoreError> {
        config
            .validate()
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout())
            .idle_timeout(config.idle_timeout())
            .connect(database_url)
            .await
            .map_err(backend("Failed to connect"))?;

        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connected to PostgreSQL"
        );

        Ok(Self::from_pool(pool))
    }

    /// Create a store using an existing connection pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the availability and booking tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if a statement fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in MIGRATIONS {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(backend("Migration failed"))?;
        }
        Ok(())
    }

    /// Insert or overwrite an availability record.
    ///
    /// Onboarding of slots happens outside the reservation path; this exists
    /// for operators and tests.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the write fails.
    pub async fn seed_availability(
        &self,
        key: &SlotKey,
        is_available: bool,
        version: Version,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO slot_availability (resource_id, slot_date, is_available, version)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (resource_id, slot_date) DO UPDATE
             SET is_available = EXCLUDED.is_available, version = EXCLUDED.version",
        )
        .bind(key.resource_id.as_str())
        .bind(key.date)
        .bind(is_available)
        .bind(to_db_version(version)?)
        .execute(&self.pool)
        .await
        .map_err(backend("Failed to seed availability"))?;
        Ok(())
    }

    async fn current_version(&self, key: &SlotKey) -> Result<Option<Version>, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT version FROM slot_availability WHERE resource_id = $1 AND slot_date = $2",
        )
        .bind(key.resource_id.as_str())
        .bind(key.date)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend("Failed to read version"))?;

        row.map(|(v,)| from_db_version(v)).transpose()
    }
}

impl AvailabilityRepository for PostgresStore {
    fn get(&self, key: SlotKey) -> StoreFuture<'_, AvailabilityRecord> {
        Box::pin(async move {
            let row: Option<(bool, i64)> = sqlx::query_as(
                "SELECT is_available, version FROM slot_availability
                 WHERE resource_id = $1 AND slot_date = $2",
            )
            .bind(key.resource_id.as_str())
            .bind(key.date)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend("Failed to read availability"))?;

            let Some((is_available, version)) = row else {
                return Err(StoreError::NotFound(key));
            };
            Ok(AvailabilityRecord::new(key, is_available, from_db_version(version)?))
        })
    }

    fn compare_and_swap(
        &self,
        key: SlotKey,
        expected: Version,
        new_state: AvailabilityState,
    ) -> StoreFuture<'_, Version> {
        Box::pin(async move {
            // Compare and write in one statement; the row lock serializes racers.
            let swapped: Option<(i64,)> = sqlx::query_as(
                "UPDATE slot_availability
                 SET is_available = $3, version = version + 1
                 WHERE resource_id = $1 AND slot_date = $2 AND version = $4
                 RETURNING version",
            )
            .bind(key.resource_id.as_str())
            .bind(key.date)
            .bind(new_state.is_available)
            .bind(to_db_version(expected)?)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend("Failed to swap availability"))?;

            if let Some((version,)) = swapped {
                return from_db_version(version);
            }

            match self.current_version(&key).await? {
                None => Err(StoreError::NotFound(key)),
                Some(actual) => {
                    tracing::debug!(slot = %key, expected = %expected, actual = %actual, "CAS lost");
                    Err(StoreError::VersionConflict {
                        key,
                        expected,
                        actual,
                    })
                }
            }
        })
    }
}

impl BookingRepository for PostgresStore {
    fn insert_booking(&self, record: BookingRecord) -> StoreFuture<'_, BookingRecord> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO slot_bookings (id, resource_id, slot_date, payload, status, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(*record.id.as_uuid())
            .bind(record.key.resource_id.as_str())
            .bind(record.key.date)
            .bind(&record.payload)
            .bind(record.status.as_str())
            .bind(record.created_at)
            .execute(&self.pool)
            .await
            .map_err(backend("Failed to insert booking"))?;

            Ok(record)
        })
    }

    fn delete_booking(&self, id: BookingId) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("DELETE FROM slot_bookings WHERE id = $1")
                .bind(*id.as_uuid())
                .execute(&self.pool)
                .await
                .map_err(backend("Failed to delete booking"))?;
            Ok(())
        })
    }

    fn update_booking_status(
        &self,
        id: BookingId,
        status: BookingStatus,
    ) -> StoreFuture<'_, BookingRecord> {
        Box::pin(async move {
            let query = format!(
                "UPDATE slot_bookings SET status = $2 WHERE id = $1 RETURNING {BOOKING_COLUMNS}"
            );
            let row: Option<BookingRow> = sqlx::query_as(&query)
                .bind(*id.as_uuid())
                .bind(status.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(backend("Failed to update booking"))?;

            row.map(booking_from_row)
                .transpose()?
                .ok_or(StoreError::BookingNotFound(id))
        })
    }

    fn get_booking(&self, id: BookingId) -> StoreFuture<'_, Option<BookingRecord>> {
        Box::pin(async move {
            let query = format!("SELECT {BOOKING_COLUMNS} FROM slot_bookings WHERE id = $1");
            let row: Option<BookingRow> = sqlx::query_as(&query)
                .bind(*id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(backend("Failed to load booking"))?;

            row.map(booking_from_row).transpose()
        })
    }
}

fn backend(context: &'static str) -> impl Fn(sqlx::Error) -> StoreError {
    move |e| StoreError::Backend(format!("{context}: {e}"))
}

fn to_db_version(version: Version) -> Result<i64, StoreError> {
    i64::try_from(version.value())
        .map_err(|_| StoreError::Backend(format!("version {version} exceeds BIGINT range")))
}

fn from_db_version(version: i64) -> Result<Version, StoreError> {
    u64::try_from(version)
        .map(Version::new)
        .map_err(|_| StoreError::Backend(format!("negative version {version} in database")))
}

fn booking_from_row(row: BookingRow) -> Result<BookingRecord, StoreError> {
    let (id, resource_id, date, payload, status, created_at) = row;
    let status = BookingStatus::parse(&status).map_err(StoreError::Backend)?;
    Ok(BookingRecord {
        id: BookingId::from_uuid(id),
        key: SlotKey::new(ResourceId::new(resource_id), date),
        payload,
        status,
        created_at,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn versions_round_trip_through_bigint() {
        let v = Version::new(42);
        assert_eq!(from_db_version(to_db_version(v).unwrap()).unwrap(), v);
    }

    #[test]
    fn negative_db_version_is_backend_error() {
        assert!(matches!(from_db_version(-1), Err(StoreError::Backend(_))));
    }

    #[test]
    fn oversized_version_is_rejected() {
        assert!(to_db_version(Version::new(u64::MAX)).is_err());
    }

    #[test]
    fn row_with_unknown_status_is_rejected() {
        let row: BookingRow = (
            Uuid::new_v4(),
            "boat-1".to_string(),
            NaiveDate::from_ymd_opt(2025, 7, 14).unwrap(),
            json!({}),
            "cancelled".to_string(),
            Utc::now(),
        );
        assert!(matches!(booking_from_row(row), Err(StoreError::Backend(_))));
    }

    #[test]
    fn row_maps_to_record() {
        let id = Uuid::new_v4();
        let row: BookingRow = (
            id,
            "boat-1".to_string(),
            NaiveDate::from_ymd_opt(2025, 7, 14).unwrap(),
            json!({ "guests": 4 }),
            "committed".to_string(),
            Utc::now(),
        );
        let record = booking_from_row(row).unwrap();
        assert_eq!(record.id, BookingId::from_uuid(id));
        assert_eq!(record.key.resource_id.as_str(), "boat-1");
        assert!(record.is_committed());
    }
}
