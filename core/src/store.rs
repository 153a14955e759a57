//! Versioned resource store traits and related types.
//!
//! This module defines the persistence abstraction the reservation core consumes:
//! versioned reads and compare-and-swap writes for availability records, plus plain
//! insert/delete/update for booking rows.
//!
//! # Implementations
//!
//! - `PostgresStore` (in `charterbook-postgres` crate): Production implementation
//! - `InMemoryStore` (in `charterbook-testing` crate): Fast, deterministic testing
//!
//! # Example
//!
//! ```no_run
//! use charterbook_core::store::{AvailabilityRepository, StoreError};
//! use charterbook_core::types::{AvailabilityState, SlotKey};
//! use chrono::NaiveDate;
//!
//! async fn claim<S: AvailabilityRepository>(store: &S) -> Result<(), StoreError> {
//!     let key = SlotKey::new("boat-42", NaiveDate::from_ymd_opt(2025, 7, 14).unwrap());
//!
//!     let record = store.get(key.clone()).await?;
//!     let new_version = store
//!         .compare_and_swap(key, record.version, AvailabilityState::TAKEN)
//!         .await?;
//!     assert_eq!(new_version, record.version.next());
//!     Ok(())
//! }
//! ```

use crate::types::{
    AvailabilityRecord, AvailabilityState, BookingId, BookingRecord, BookingStatus, SlotKey,
    Version,
};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by repository methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Errors that can occur during store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No availability record exists for the slot.
    #[error("Slot not found: {0}")]
    NotFound(SlotKey),

    /// Optimistic concurrency conflict: expected version doesn't match current version.
    ///
    /// Carries the *current* version so a caller can decide without a second round trip.
    #[error("Version conflict on {key}: expected version {expected}, found {actual}")]
    VersionConflict {
        /// The slot where the conflict occurred.
        key: SlotKey,
        /// The version the writer presented.
        expected: Version,
        /// The version currently stored.
        actual: Version,
    },

    /// No booking row with this ID.
    #[error("Booking not found: {0}")]
    BookingNotFound(BookingId),

    /// Database or transport failure.
    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether retrying the same call may succeed.
    ///
    /// Only backend failures are transient; the other variants describe facts about
    /// stored state that a blind retry will not change.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

/// Versioned access to availability records.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so that it can be used as a trait object (`Arc<dyn VersionedResourceStore>`).
pub trait AvailabilityRepository: Send + Sync {
    /// Read the current availability record for a slot.
    ///
    /// No side effects.
    ///
    /// # Errors
    ///
    /// - `NotFound`: The slot has never been onboarded
    /// - `Backend`: Database connection or query failed
    fn get(&self, key: SlotKey) -> StoreFuture<'_, AvailabilityRecord>;

    /// Atomically replace the slot's state if its version equals `expected`.
    ///
    /// On success the state is written and the version incremented by exactly one;
    /// the new version is returned. On mismatch nothing is written.
    ///
    /// # Errors
    ///
    /// - `VersionConflict`: Stored version differs from `expected` (carries the actual version)
    /// - `NotFound`: The slot does not exist
    /// - `Backend`: Database connection or query failed
    fn compare_and_swap(
        &self,
        key: SlotKey,
        expected: Version,
        new_state: AvailabilityState,
    ) -> StoreFuture<'_, Version>;
}

/// Booking row persistence.
pub trait BookingRepository: Send + Sync {
    /// Insert a new booking row and return it as stored.
    ///
    /// # Errors
    ///
    /// - `Backend`: Database connection or query failed (including duplicate IDs)
    fn insert_booking(&self, record: BookingRecord) -> StoreFuture<'_, BookingRecord>;

    /// Delete a booking row.
    ///
    /// Idempotent: deleting a non-existent ID is not an error.
    ///
    /// # Errors
    ///
    /// - `Backend`: Database connection or query failed
    fn delete_booking(&self, id: BookingId) -> StoreFuture<'_, ()>;

    /// Change a booking's status and return the updated row.
    ///
    /// # Errors
    ///
    /// - `BookingNotFound`: No row with this ID
    /// - `Backend`: Database connection or query failed
    fn update_booking_status(
        &self,
        id: BookingId,
        status: BookingStatus,
    ) -> StoreFuture<'_, BookingRecord>;

    /// Look up a booking row by ID.
    ///
    /// # Errors
    ///
    /// - `Backend`: Database connection or query failed
    fn get_booking(&self, id: BookingId) -> StoreFuture<'_, Option<BookingRecord>>;
}

/// A store offering both repositories, as consumed by the coordinator.
pub trait VersionedResourceStore: AvailabilityRepository + BookingRepository {}

impl<T> VersionedResourceStore for T where T: AvailabilityRepository + BookingRepository {}
