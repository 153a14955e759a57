//! Transaction coordinator: saga execution and slot reservation.
//!
//! `reserve()` is built from the generic [`execute`](TransactionCoordinator::execute)
//! primitive:
//!
//! ```text
//! PENDING ── read availability ──► taken? ──► NOT_AVAILABLE
//!    │
//!    ├─ A: insert provisional booking      (undo: delete booking)
//!    ├─ B: CAS slot to taken @ read version (undo: CAS back if still ours)
//!    └─ C: promote booking to committed
//!           │
//!           ├─ all ok ──────────────────► RESERVED
//!           └─ B fails ── undo A ───────► CONFLICT
//! ```
//!
//! The store's CAS is the only arbiter between concurrent callers: of all
//! attempts presenting the same version, exactly one succeeds.

use crate::config::CoordinatorConfig;
use crate::pool::{ConnectionPool, PoolStats, PooledConnection};
use crate::saga::{self, Step, StepError, TransactionError};
use charterbook_core::environment::Clock;
use charterbook_core::{
    AvailabilityState, BookingError, BookingId, BookingRecord, BookingStatus, ConflictResolver,
    ResourceId, SlotKey, StoreError, Version, VersionedResourceStore,
};
use chrono::NaiveDate;
use crate::metrics;
use ::metrics::counter;
use std::sync::Arc;

/// Result of a reservation attempt.
pub type ReservationResult = Result<BookingRecord, TransactionError<BookingError>>;

/// What each reservation step produced.
#[derive(Debug, Clone)]
enum ReservationEffect {
    BookingInserted(BookingRecord),
    SlotClaimed { key: SlotKey, version: Version },
    BookingCommitted(BookingRecord),
}

type Handle<S> = Arc<PooledConnection<S>>;

/// Coordinates multi-step writes against a versioned store.
///
/// # Example
///
/// ```rust,no_run
/// use charterbook_core::environment::SystemClock;
/// use charterbook_core::VersionedResourceStore;
/// use charterbook_runtime::{CoordinatorConfig, TransactionCoordinator};
/// use chrono::NaiveDate;
/// use std::sync::Arc;
///
/// # async fn example(store: Arc<dyn VersionedResourceStore>) -> Result<(), Box<dyn std::error::Error>> {
/// let coordinator =
///     TransactionCoordinator::new(store, Arc::new(SystemClock), CoordinatorConfig::default())?;
///
/// let booking = coordinator
///     .reserve(
///         "boat-42".parse()?,
///         NaiveDate::from_ymd_opt(2025, 7, 14).ok_or("bad date")?,
///         serde_json::json!({ "guests": 6 }),
///     )
///     .await?;
/// assert!(booking.is_committed());
/// # Ok(())
/// # }
/// ```
pub struct TransactionCoordinator<S: ?Sized> {
    pool: ConnectionPool<S>,
    clock: Arc<dyn Clock>,
    config: CoordinatorConfig,
}

impl<S: ?Sized + Send + Sync> std::fmt::Debug for TransactionCoordinator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("pool", &self.pool)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S> TransactionCoordinator<S>
where
    S: VersionedResourceStore + ?Sized + 'static,
{
    /// Create a coordinator over `store`.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Validation`] if the pool configuration is invalid.
    pub fn new(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        config: CoordinatorConfig,
    ) -> Result<Self, BookingError> {
        let pool = ConnectionPool::new(store, &config.pool)?;
        Ok(Self {
            pool,
            clock,
            config,
        })
    }

    /// Run `steps` in order, compensating completed steps in reverse if one fails.
    ///
    /// # Errors
    ///
    /// Returns the failing step's original error plus any compensation failures.
    pub async fn execute<T, E>(&self, steps: Vec<Step<T, E>>) -> Result<Vec<T>, TransactionError<E>>
    where
        T: Clone + Send + Sync + 'static,
        E: StepError,
    {
        saga::run(steps, &self.config.compensation_retry).await
    }

    /// Pool occupancy.
    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Reserve one slot for one caller.
    ///
    /// Waiting for a pool handle is cancellable. Once the handle is granted and
    /// the slot has been read as available, the steps run on a detached task and
    /// always reach a terminal state: either both writes are kept or the booking
    /// row is removed again.
    ///
    /// # Errors
    ///
    /// - `Validation`: blank resource ID or non-object payload; nothing was read
    /// - `PoolTimeout`: no store handle within the acquire timeout
    /// - `NotFound` / `NotAvailable`: the slot is unknown or already taken; nothing was written
    /// - `Conflict`: a concurrent caller claimed the slot first; the provisional booking was removed
    #[tracing::instrument(skip_all, fields(resource_id = %resource_id, date = %date))]
    pub async fn reserve(
        &self,
        resource_id: ResourceId,
        date: NaiveDate,
        payload: serde_json::Value,
    ) -> ReservationResult {
        let outcome = self.try_reserve(resource_id, date, payload).await;

        let label = match &outcome {
            Ok(_) => "reserved",
            Err(err) => err.error.kind(),
        };
        counter!(metrics::RESERVATIONS_TOTAL, "outcome" => label).increment(1);

        match &outcome {
            Ok(booking) => tracing::info!(booking_id = %booking.id, "Slot reserved"),
            Err(err) if err.is_clean() => {
                tracing::info!(outcome = label, error = %err.error, "Reservation not made");
            }
            Err(err) => tracing::error!(
                outcome = label,
                error = %err.error,
                failures = ?err.compensation_failures,
                "Reservation rolled back with compensation failures"
            ),
        }

        outcome
    }

    async fn try_reserve(
        &self,
        resource_id: ResourceId,
        date: NaiveDate,
        payload: serde_json::Value,
    ) -> ReservationResult {
        validate(&resource_id, &payload)?;
        let key = SlotKey::new(resource_id, date);

        let conn: Handle<S> = Arc::new(self.pool.acquire().await?);
        let current = ConflictResolver::resolve_read(conn.get(key.clone()).await)?;

        let booking = BookingRecord::provisional(key, payload, self.clock.now());
        let steps = reservation_steps(&conn, booking, current.version);
        let policy = self.config.compensation_retry.clone();

        let task = tokio::spawn(async move {
            let result = saga::run(steps, &policy).await;
            drop(conn);
            result
        });

        let effects = task
            .await
            .map_err(|e| BookingError::Aborted(e.to_string()))??;

        effects
            .into_iter()
            .find_map(|effect| match effect {
                ReservationEffect::BookingCommitted(record) => Some(record),
                _ => None,
            })
            .ok_or_else(|| {
                BookingError::Aborted("reservation finished without a committed booking".into())
                    .into()
            })
    }
}

fn validate(resource_id: &ResourceId, payload: &serde_json::Value) -> Result<(), BookingError> {
    if !resource_id.is_valid() {
        return Err(BookingError::Validation(
            "resource ID cannot be empty".to_string(),
        ));
    }
    if !(payload.is_object() || payload.is_null()) {
        return Err(BookingError::Validation(
            "booking payload must be a JSON object".to_string(),
        ));
    }
    Ok(())
}

fn reservation_steps<S>(
    conn: &Handle<S>,
    booking: BookingRecord,
    read_version: Version,
) -> Vec<Step<ReservationEffect, BookingError>>
where
    S: VersionedResourceStore + ?Sized + 'static,
{
    let key = booking.key.clone();
    vec![
        insert_booking_step(conn, booking),
        claim_slot_step(conn, key, read_version),
        commit_booking_step(conn),
    ]
}

fn insert_booking_step<S>(
    conn: &Handle<S>,
    booking: BookingRecord,
) -> Step<ReservationEffect, BookingError>
where
    S: VersionedResourceStore + ?Sized + 'static,
{
    let store = Arc::clone(conn);
    let undo_store = Arc::clone(conn);

    Step::new(
        "insert_booking",
        move |_: &[ReservationEffect]| async move {
            let stored = store.insert_booking(booking).await?;
            Ok::<_, BookingError>(ReservationEffect::BookingInserted(stored))
        },
        move |effect| {
            let store = Arc::clone(&undo_store);
            async move {
                if let ReservationEffect::BookingInserted(record) = effect {
                    store.delete_booking(record.id).await?;
                }
                Ok::<(), BookingError>(())
            }
        },
    )
}

fn claim_slot_step<S>(
    conn: &Handle<S>,
    key: SlotKey,
    read_version: Version,
) -> Step<ReservationEffect, BookingError>
where
    S: VersionedResourceStore + ?Sized + 'static,
{
    let store = Arc::clone(conn);
    let undo_store = Arc::clone(conn);

    Step::new(
        "claim_slot",
        move |_: &[ReservationEffect]| async move {
            let swapped = store
                .compare_and_swap(key.clone(), read_version, AvailabilityState::TAKEN)
                .await;
            let version = ConflictResolver::resolve_swap(swapped)?;
            Ok::<_, BookingError>(ReservationEffect::SlotClaimed { key, version })
        },
        move |effect| {
            let store = Arc::clone(&undo_store);
            async move {
                if let ReservationEffect::SlotClaimed { key, version } = effect {
                    release_slot(&**store, key, version).await?;
                }
                Ok::<(), BookingError>(())
            }
        },
    )
}

fn commit_booking_step<S>(conn: &Handle<S>) -> Step<ReservationEffect, BookingError>
where
    S: VersionedResourceStore + ?Sized + 'static,
{
    let store = Arc::clone(conn);

    Step::irreversible("commit_booking", move |prior: &[ReservationEffect]| {
        let id = inserted_booking_id(prior);
        async move {
            let id = id.ok_or_else(|| {
                BookingError::Aborted("no provisional booking to commit".to_string())
            })?;
            let committed = store
                .update_booking_status(id, BookingStatus::Committed)
                .await?;
            Ok::<_, BookingError>(ReservationEffect::BookingCommitted(committed))
        }
    })
}

fn inserted_booking_id(prior: &[ReservationEffect]) -> Option<BookingId> {
    prior.iter().find_map(|effect| match effect {
        ReservationEffect::BookingInserted(record) => Some(record.id),
        _ => None,
    })
}

/// Undo a successful claim, but only while the slot is still as the claim left it.
///
/// Restoring unconditionally could overwrite a newer legitimate write, so the
/// current version is re-read and the swap back presents the claimed version.
/// A slot that has moved on is left alone and reported as skipped. A slot that
/// is available at exactly `claimed.next()` is the result of an earlier run of
/// this compensation and counts as done.
async fn release_slot<S>(store: &S, key: SlotKey, claimed: Version) -> Result<(), BookingError>
where
    S: VersionedResourceStore + ?Sized,
{
    let current = store.get(key.clone()).await?;

    if current.is_available && current.version == claimed.next() {
        return Ok(());
    }
    if current.is_available || current.version != claimed {
        tracing::warn!(
            slot = %key,
            claimed = %claimed,
            current = %current.version,
            "Slot moved on since it was claimed; leaving it untouched"
        );
        return Err(BookingError::CompensationSkipped {
            key,
            current: current.version,
        });
    }

    match store
        .compare_and_swap(key.clone(), claimed, AvailabilityState::AVAILABLE)
        .await
    {
        Ok(_) => Ok(()),
        Err(StoreError::VersionConflict { actual, .. }) => {
            Err(BookingError::CompensationSkipped { key, current: actual })
        }
        Err(other) => Err(other.into()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use charterbook_core::AvailabilityRepository;
    use charterbook_testing::InMemoryStore;
    use serde_json::json;

    #[test]
    fn validation_rejects_blank_resource() {
        let err = validate(&ResourceId::new(" "), &json!({})).unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));
    }

    #[test]
    fn validation_rejects_scalar_payload() {
        assert!(validate(&ResourceId::new("boat-1"), &json!(42)).is_err());
        assert!(validate(&ResourceId::new("boat-1"), &json!(["a"])).is_err());
    }

    #[test]
    fn validation_accepts_object_or_null() {
        assert!(validate(&ResourceId::new("boat-1"), &json!({ "guests": 4 })).is_ok());
        assert!(validate(&ResourceId::new("boat-1"), &serde_json::Value::Null).is_ok());
    }

    #[test]
    fn commit_finds_inserted_booking() {
        let key = SlotKey::new("boat-1", NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        let record = BookingRecord::provisional(key.clone(), json!({}), chrono::Utc::now());
        let prior = vec![
            ReservationEffect::BookingInserted(record.clone()),
            ReservationEffect::SlotClaimed {
                key,
                version: Version::new(4),
            },
        ];
        assert_eq!(inserted_booking_id(&prior), Some(record.id));
        assert_eq!(inserted_booking_id(&[]), None);
    }

    fn slot() -> SlotKey {
        SlotKey::new("boat-1", NaiveDate::from_ymd_opt(2025, 1, 1).unwrap())
    }

    #[tokio::test]
    async fn releasing_a_claim_twice_has_no_further_effect() {
        let store = InMemoryStore::new();
        store.seed(slot(), true, Version::new(3));
        let claimed = store
            .compare_and_swap(slot(), Version::new(3), AvailabilityState::TAKEN)
            .await
            .unwrap();

        release_slot(&store, slot(), claimed).await.unwrap();
        release_slot(&store, slot(), claimed).await.unwrap();

        let record = store.availability(&slot()).unwrap();
        assert!(record.is_available);
        assert_eq!(record.version, Version::new(5));
        assert_eq!(store.calls().compare_and_swap, 2);
    }

    #[tokio::test]
    async fn release_leaves_moved_on_slot_alone() {
        let store = InMemoryStore::new();
        store.seed(slot(), false, Version::new(7));

        let err = release_slot(&store, slot(), Version::new(4)).await.unwrap_err();

        assert_eq!(
            err,
            BookingError::CompensationSkipped {
                key: slot(),
                current: Version::new(7),
            }
        );
        assert_eq!(store.calls().compare_and_swap, 0);
        assert_eq!(store.availability(&slot()).unwrap().version, Version::new(7));
    }
}
