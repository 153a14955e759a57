//! In-memory versioned store for testing
//!
//! Provides fast, deterministic storage for coordinator tests:
//! - [`InMemoryStore`]: `HashMap`-backed availability and booking tables
//! - [`CallCounts`]: per-method call counters for "no writes happened" assertions
//! - Failure injection and an optional read barrier to force interleavings

use charterbook_core::store::{AvailabilityRepository, BookingRepository, StoreError, StoreFuture};
use charterbook_core::types::{
    AvailabilityRecord, AvailabilityState, BookingId, BookingRecord, BookingStatus, SlotKey,
    Version,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Barrier;

/// How many times each store method has been called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// `get`
    pub get: usize,
    /// `compare_and_swap`
    pub compare_and_swap: usize,
    /// `insert_booking`
    pub insert_booking: usize,
    /// `delete_booking`
    pub delete_booking: usize,
    /// `update_booking_status`
    pub update_booking_status: usize,
    /// `get_booking`
    pub get_booking: usize,
}

impl CallCounts {
    /// Number of calls that may have mutated state.
    #[must_use]
    pub const fn writes(&self) -> usize {
        self.compare_and_swap + self.insert_booking + self.delete_booking + self.update_booking_status
    }
}

/// Remaining injected failures per method.
#[derive(Debug, Default)]
struct Failures {
    insert: u32,
    swap: u32,
    delete: u32,
    update: u32,
}

impl Failures {
    fn take(counter: &mut u32, op: &str) -> Result<(), StoreError> {
        if *counter == 0 {
            return Ok(());
        }
        *counter -= 1;
        Err(StoreError::Backend(format!("injected {op} failure")))
    }
}

#[derive(Debug, Default)]
struct Tables {
    slots: HashMap<SlotKey, AvailabilityRecord>,
    bookings: HashMap<BookingId, BookingRecord>,
    calls: CallCounts,
    failures: Failures,
}

struct ReadBarrier {
    barrier: Barrier,
    parties: usize,
}

/// In-memory store for fast, deterministic testing.
///
/// Implements both repository traits with the same contract as the
/// Postgres store: CAS bumps the version by exactly one, deletes are
/// idempotent, and conflicts carry the current version.
///
/// # Example
///
/// ```
/// use charterbook_testing::InMemoryStore;
/// use charterbook_core::store::AvailabilityRepository;
/// use charterbook_core::types::{AvailabilityState, SlotKey, Version};
/// use chrono::NaiveDate;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryStore::new();
/// let key = SlotKey::new("boat-1", NaiveDate::from_ymd_opt(2025, 6, 1).ok_or("date")?);
/// store.seed(key.clone(), true, Version::new(3));
///
/// let v4 = store.compare_and_swap(key, Version::new(3), AvailabilityState::TAKEN).await?;
/// assert_eq!(v4, Version::new(4));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
    read_barrier: Option<Arc<ReadBarrier>>,
    latency: Option<Duration>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("calls", &self.calls())
            .field("latency", &self.latency)
            .finish_non_exhaustive()
    }
}

impl InMemoryStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the first `parties` reads until all of them have happened.
    ///
    /// Forces concurrent reservations to observe the same version before any
    /// of them writes. Later reads are not held.
    #[must_use]
    pub fn with_read_barrier(mut self, parties: usize) -> Self {
        self.read_barrier = Some(Arc::new(ReadBarrier {
            barrier: Barrier::new(parties),
            parties,
        }));
        self
    }

    /// Delay every call by `latency` (uses `tokio::time`, so paused clocks apply).
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Insert or overwrite an availability record.
    pub fn seed(&self, key: SlotKey, is_available: bool, version: Version) {
        let record = AvailabilityRecord::new(key.clone(), is_available, version);
        self.lock().slots.insert(key, record);
    }

    /// Current availability record for `key`, bypassing counters and failures.
    #[must_use]
    pub fn availability(&self, key: &SlotKey) -> Option<AvailabilityRecord> {
        self.lock().slots.get(key).cloned()
    }

    /// All booking rows for `key`, oldest first.
    #[must_use]
    pub fn bookings_for(&self, key: &SlotKey) -> Vec<BookingRecord> {
        let mut rows: Vec<BookingRecord> = self
            .lock()
            .bookings
            .values()
            .filter(|b| &b.key == key)
            .cloned()
            .collect();
        rows.sort_by_key(|b| b.created_at);
        rows
    }

    /// Total number of booking rows.
    #[must_use]
    pub fn booking_count(&self) -> usize {
        self.lock().bookings.len()
    }

    /// Snapshot of the call counters.
    #[must_use]
    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    /// Fail the next `n` `insert_booking` calls with a backend error.
    pub fn fail_next_inserts(&self, n: u32) {
        self.lock().failures.insert = n;
    }

    /// Fail the next `n` `compare_and_swap` calls with a backend error.
    pub fn fail_next_swaps(&self, n: u32) {
        self.lock().failures.swap = n;
    }

    /// Fail the next `n` `delete_booking` calls with a backend error.
    pub fn fail_next_deletes(&self, n: u32) {
        self.lock().failures.delete = n;
    }

    /// Fail the next `n` `update_booking_status` calls with a backend error.
    pub fn fail_next_updates(&self, n: u32) {
        self.lock().failures.update = n;
    }
}

impl AvailabilityRepository for InMemoryStore {
    fn get(&self, key: SlotKey) -> StoreFuture<'_, AvailabilityRecord> {
        Box::pin(async move {
            self.delay().await;
            let (record, nth) = {
                let mut tables = self.lock();
                tables.calls.get += 1;
                (tables.slots.get(&key).cloned(), tables.calls.get)
            };

            if let Some(gate) = &self.read_barrier {
                if nth <= gate.parties {
                    gate.barrier.wait().await;
                }
            }

            record.ok_or(StoreError::NotFound(key))
        })
    }

    fn compare_and_swap(
        &self,
        key: SlotKey,
        expected: Version,
        new_state: AvailabilityState,
    ) -> StoreFuture<'_, Version> {
        Box::pin(async move {
            self.delay().await;
            let mut tables = self.lock();
            tables.calls.compare_and_swap += 1;
            Failures::take(&mut tables.failures.swap, "compare_and_swap")?;

            let record = tables
                .slots
                .get_mut(&key)
                .ok_or_else(|| StoreError::NotFound(key.clone()))?;

            if record.version != expected {
                return Err(StoreError::VersionConflict {
                    key,
                    expected,
                    actual: record.version,
                });
            }

            record.is_available = new_state.is_available;
            record.version = expected.next();
            Ok(record.version)
        })
    }
}

impl BookingRepository for InMemoryStore {
    fn insert_booking(&self, record: BookingRecord) -> StoreFuture<'_, BookingRecord> {
        Box::pin(async move {
            self.delay().await;
            let mut tables = self.lock();
            tables.calls.insert_booking += 1;
            Failures::take(&mut tables.failures.insert, "insert_booking")?;

            if tables.bookings.contains_key(&record.id) {
                return Err(StoreError::Backend(format!(
                    "duplicate booking id {}",
                    record.id
                )));
            }
            tables.bookings.insert(record.id, record.clone());
            Ok(record)
        })
    }

    fn delete_booking(&self, id: BookingId) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.delay().await;
            let mut tables = self.lock();
            tables.calls.delete_booking += 1;
            Failures::take(&mut tables.failures.delete, "delete_booking")?;

            tables.bookings.remove(&id);
            Ok(())
        })
    }

    fn update_booking_status(
        &self,
        id: BookingId,
        status: BookingStatus,
    ) -> StoreFuture<'_, BookingRecord> {
        Box::pin(async move {
            self.delay().await;
            let mut tables = self.lock();
            tables.calls.update_booking_status += 1;
            Failures::take(&mut tables.failures.update, "update_booking_status")?;

            let row = tables
                .bookings
                .get_mut(&id)
                .ok_or(StoreError::BookingNotFound(id))?;
            row.status = status;
            Ok(row.clone())
        })
    }

    fn get_booking(&self, id: BookingId) -> StoreFuture<'_, Option<BookingRecord>> {
        Box::pin(async move {
            self.delay().await;
            let mut tables = self.lock();
            tables.calls.get_booking += 1;
            Ok(tables.bookings.get(&id).cloned())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use serde_json::json;

    fn key() -> SlotKey {
        SlotKey::new("boat-1", NaiveDate::from_ymd_opt(2025, 6, 1).unwrap())
    }

    #[tokio::test]
    async fn get_unknown_slot_is_not_found() {
        let store = InMemoryStore::new();
        let err = store.get(key()).await.unwrap_err();
        assert_eq!(err, StoreError::NotFound(key()));
    }

    #[tokio::test]
    async fn cas_increments_version_by_one() {
        let store = InMemoryStore::new();
        store.seed(key(), true, Version::new(3));

        let v = store
            .compare_and_swap(key(), Version::new(3), AvailabilityState::TAKEN)
            .await
            .unwrap();

        assert_eq!(v, Version::new(4));
        let record = store.availability(&key()).unwrap();
        assert!(!record.is_available);
        assert_eq!(record.version, Version::new(4));
    }

    #[tokio::test]
    async fn stale_cas_reports_actual_version_and_writes_nothing() {
        let store = InMemoryStore::new();
        store.seed(key(), true, Version::new(4));

        let err = store
            .compare_and_swap(key(), Version::new(3), AvailabilityState::TAKEN)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            StoreError::VersionConflict {
                key: key(),
                expected: Version::new(3),
                actual: Version::new(4),
            }
        );
        assert!(store.availability(&key()).unwrap().is_available);
    }

    #[tokio::test]
    async fn cas_on_unknown_slot_is_not_found() {
        let store = InMemoryStore::new();
        let err = store
            .compare_and_swap(key(), Version::INITIAL, AvailabilityState::TAKEN)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = InMemoryStore::new();
        let booking = BookingRecord::provisional(key(), json!({}), Utc::now());
        let id = booking.id;
        store.insert_booking(booking).await.unwrap();

        store.delete_booking(id).await.unwrap();
        store.delete_booking(id).await.unwrap();

        assert_eq!(store.booking_count(), 0);
        assert_eq!(store.calls().delete_booking, 2);
    }

    #[tokio::test]
    async fn update_status_of_missing_booking_fails() {
        let store = InMemoryStore::new();
        let id = BookingId::generate();
        let err = store
            .update_booking_status(id, BookingStatus::Committed)
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::BookingNotFound(id));
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = InMemoryStore::new();
        store.fail_next_inserts(1);

        let first = store
            .insert_booking(BookingRecord::provisional(key(), json!({}), Utc::now()))
            .await;
        let second = store
            .insert_booking(BookingRecord::provisional(key(), json!({}), Utc::now()))
            .await;

        assert!(matches!(first, Err(StoreError::Backend(_))));
        assert!(second.is_ok());
        assert_eq!(store.calls().insert_booking, 2);
        assert_eq!(store.booking_count(), 1);
    }

    #[tokio::test]
    async fn read_barrier_releases_once_all_parties_read() {
        let store = InMemoryStore::new().with_read_barrier(2);
        store.seed(key(), true, Version::INITIAL);

        let (a, b) = tokio::join!(store.get(key()), store.get(key()));
        assert_eq!(a.unwrap().version, b.unwrap().version);

        // Reads past the barrier's party count are not held.
        assert!(store.get(key()).await.is_ok());
        assert_eq!(store.calls().get, 3);
    }

    #[test]
    fn writes_sum_mutating_calls() {
        let calls = CallCounts {
            get: 5,
            compare_and_swap: 1,
            insert_booking: 1,
            delete_booking: 1,
            update_booking_status: 1,
            get_booking: 2,
        };
        assert_eq!(calls.writes(), 4);
    }
}
