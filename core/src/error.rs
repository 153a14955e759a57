//! Caller-facing error taxonomy for reservations.

use crate::store::StoreError;
use crate::types::{SlotKey, Version};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors returned by the reservation coordinator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    /// Malformed input. Never retried; no steps were attempted.
    #[error("Validation error: {0}")]
    Validation(String),

    /// No availability record exists for the slot.
    #[error("Slot not found: {0}")]
    NotFound(SlotKey),

    /// The slot is already taken. A business fact, not a race.
    #[error("Slot not available: {0}")]
    NotAvailable(SlotKey),

    /// Another writer changed the slot first. Retry with a fresh read.
    #[error("Concurrent modification of {key}: expected version {expected}, found {actual}")]
    Conflict {
        /// The contended slot.
        key: SlotKey,
        /// The version this attempt read.
        expected: Version,
        /// The version the store held at CAS time.
        actual: Version,
    },

    /// No pool handle was granted within the acquire timeout.
    #[error("Timed out after {waited:?} waiting for a store connection")]
    PoolTimeout {
        /// How long the caller waited.
        waited: Duration,
    },

    /// A compensating action found the record changed by someone else and left it alone.
    #[error("Compensation skipped for {key}: record moved on to version {current}")]
    CompensationSkipped {
        /// The slot being restored.
        key: SlotKey,
        /// The version found at compensation time.
        current: Version,
    },

    /// The detached reservation task panicked or was cancelled by the runtime.
    #[error("Reservation task aborted: {0}")]
    Aborted(String),

    /// Store failure not covered by the variants above.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BookingError {
    /// Whether a caller may retry the whole operation.
    ///
    /// `Conflict` and `PoolTimeout` are races or exhaustion; transient store
    /// failures may clear up. Everything else is final.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Conflict { .. } | Self::PoolTimeout { .. } => true,
            Self::Store(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Short label used for metrics and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::NotAvailable(_) => "not_available",
            Self::Conflict { .. } => "conflict",
            Self::PoolTimeout { .. } => "pool_timeout",
            Self::CompensationSkipped { .. } => "compensation_skipped",
            Self::Aborted(_) => "aborted",
            Self::Store(_) => "store",
        }
    }
}

/// A compensating action that could not undo its step.
///
/// Flagged for manual reconciliation. Never replaces the error that triggered rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationFailure {
    /// Name of the step whose compensation failed.
    pub step: String,
    /// How many times the compensation was invoked.
    pub attempts: u32,
    /// Display form of the last compensation error.
    pub reason: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn key() -> SlotKey {
        SlotKey::new("boat-3", NaiveDate::from_ymd_opt(2025, 6, 1).unwrap())
    }

    #[test]
    fn retryable_classification() {
        let conflict = BookingError::Conflict {
            key: key(),
            expected: Version::new(3),
            actual: Version::new(4),
        };
        assert!(conflict.is_retryable());
        assert!(BookingError::PoolTimeout { waited: Duration::from_millis(100) }.is_retryable());
        assert!(BookingError::Store(StoreError::Backend("reset".into())).is_retryable());

        assert!(!BookingError::NotAvailable(key()).is_retryable());
        assert!(!BookingError::Validation("empty".into()).is_retryable());
        assert!(!BookingError::Store(StoreError::NotFound(key())).is_retryable());
    }

    #[test]
    fn store_errors_convert_transparently() {
        let err: BookingError = StoreError::Backend("socket closed".into()).into();
        assert_eq!(err.to_string(), "Store backend error: socket closed");
        assert_eq!(err.kind(), "store");
    }
}
