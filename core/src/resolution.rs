//! Classification of store responses into reservation outcomes.
//!
//! The coordinator never matches on `StoreError` shapes directly. Reads and CAS
//! results pass through [`ConflictResolver`], which separates the business fact
//! "slot already taken" from the race "someone wrote first". Both can surface on
//! the path around a CAS but callers must treat them differently.

use crate::error::BookingError;
use crate::store::StoreError;
use crate::types::{AvailabilityRecord, SlotKey, Version};

/// Outcome of a store call, as the coordinator sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<T> {
    /// The call did what was asked.
    Success(T),
    /// The slot does not exist.
    NotFound(SlotKey),
    /// The slot exists but is already taken.
    NotAvailable(SlotKey),
    /// A concurrent writer changed the slot.
    VersionConflict {
        /// The contended slot.
        key: SlotKey,
        /// Version the caller presented.
        expected: Version,
        /// Version the store holds.
        actual: Version,
    },
}

impl<T> Resolution<T> {
    /// Convert into the caller-facing result.
    ///
    /// # Errors
    ///
    /// Every non-success outcome maps onto its `BookingError` counterpart.
    pub fn into_result(self) -> Result<T, BookingError> {
        match self {
            Self::Success(value) => Ok(value),
            Self::NotFound(key) => Err(BookingError::NotFound(key)),
            Self::NotAvailable(key) => Err(BookingError::NotAvailable(key)),
            Self::VersionConflict {
                key,
                expected,
                actual,
            } => Err(BookingError::Conflict {
                key,
                expected,
                actual,
            }),
        }
    }
}

/// Pure, stateless classifier. No I/O.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    /// Classify the response of an availability read.
    ///
    /// A record that exists but is not available resolves to `NotAvailable`.
    ///
    /// # Errors
    ///
    /// Store errors with no outcome counterpart (backend failures) pass through.
    pub fn classify_read(
        response: Result<AvailabilityRecord, StoreError>,
    ) -> Result<Resolution<AvailabilityRecord>, StoreError> {
        match response {
            Ok(record) if record.is_available => Ok(Resolution::Success(record)),
            Ok(record) => Ok(Resolution::NotAvailable(record.key)),
            Err(StoreError::NotFound(key)) => Ok(Resolution::NotFound(key)),
            Err(StoreError::VersionConflict {
                key,
                expected,
                actual,
            }) => Ok(Resolution::VersionConflict {
                key,
                expected,
                actual,
            }),
            Err(other) => Err(other),
        }
    }

    /// Classify the response of a compare-and-swap.
    ///
    /// # Errors
    ///
    /// Store errors with no outcome counterpart (backend failures) pass through.
    pub fn classify_swap(
        response: Result<Version, StoreError>,
    ) -> Result<Resolution<Version>, StoreError> {
        match response {
            Ok(version) => Ok(Resolution::Success(version)),
            Err(StoreError::NotFound(key)) => Ok(Resolution::NotFound(key)),
            Err(StoreError::VersionConflict {
                key,
                expected,
                actual,
            }) => Ok(Resolution::VersionConflict {
                key,
                expected,
                actual,
            }),
            Err(other) => Err(other),
        }
    }

    /// Classify a read and convert straight into a `BookingError` result.
    ///
    /// # Errors
    ///
    /// See [`Resolution::into_result`]; backend failures become `BookingError::Store`.
    pub fn resolve_read(
        response: Result<AvailabilityRecord, StoreError>,
    ) -> Result<AvailabilityRecord, BookingError> {
        Self::classify_read(response)?.into_result()
    }

    /// Classify a CAS and convert straight into a `BookingError` result.
    ///
    /// # Errors
    ///
    /// See [`Resolution::into_result`]; backend failures become `BookingError::Store`.
    pub fn resolve_swap(response: Result<Version, StoreError>) -> Result<Version, BookingError> {
        Self::classify_swap(response)?.into_result()
    }
}
