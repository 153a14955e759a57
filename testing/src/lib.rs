//! # Charterbook Testing
//!
//! Testing utilities and helpers for the slot reservation coordinator.
//!
//! This crate provides:
//! - Mock implementations of Environment traits
//! - An in-memory versioned store with failure injection
//! - Test helpers and builders
//! - Property-based testing strategies
//!
//! ## Example
//!
//! ```ignore
//! use charterbook_testing::{InMemoryStore, helpers, test_clock};
//! use charterbook_runtime::{CoordinatorConfig, TransactionCoordinator};
//!
//! #[tokio::test]
//! async fn reserves_open_slot() {
//!     let store = Arc::new(InMemoryStore::new());
//!     let key = helpers::slot("boat-1", 2025, 7, 14);
//!     store.seed(key.clone(), true, Version::INITIAL);
//!
//!     let coordinator = TransactionCoordinator::new(
//!         store.clone(),
//!         Arc::new(test_clock()),
//!         CoordinatorConfig::default(),
//!     ).unwrap();
//!
//!     let booking = coordinator
//!         .reserve(key.resource_id.clone(), key.date, json!({}))
//!         .await
//!         .unwrap();
//!     assert!(booking.is_committed());
//! }
//! ```

use chrono::{DateTime, Utc};
use charterbook_core::environment::Clock;

mod store_mocks;

pub use store_mocks::{CallCounts, InMemoryStore};

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use charterbook_testing::mocks::FixedClock;
    /// use charterbook_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use charterbook_core::types::SlotKey;
    use chrono::NaiveDate;

    /// Build a slot key from a resource ID and a calendar date.
    ///
    /// # Panics
    ///
    /// Panics if the date is not a valid calendar date.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn slot(resource_id: &str, year: i32, month: u32, day: u32) -> SlotKey {
        SlotKey::new(
            resource_id,
            NaiveDate::from_ymd_opt(year, month, day).expect("valid calendar date"),
        )
    }

    /// Install a test-writer tracing subscriber honouring `RUST_LOG`.
    ///
    /// Safe to call from every test; only the first call installs.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing strategies using proptest.
pub mod properties {
    use charterbook_core::types::{ResourceId, SlotKey, Version};
    use chrono::NaiveDate;
    use proptest::prelude::*;

    /// Non-blank resource IDs such as `boat-17`.
    pub fn arb_resource_id() -> impl Strategy<Value = ResourceId> {
        "[a-z]{1,8}-[0-9]{1,4}".prop_map(ResourceId::new)
    }

    /// Versions well below overflow.
    pub fn arb_version() -> impl Strategy<Value = Version> {
        (0u64..1_000_000).prop_map(Version::new)
    }

    /// Slot keys within a few seasons.
    pub fn arb_slot_key() -> impl Strategy<Value = SlotKey> {
        (arb_resource_id(), 0i64..1_000).prop_map(|(resource_id, offset)| {
            let base = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap_or_default();
            let date = base
                .checked_add_signed(chrono::Duration::days(offset))
                .unwrap_or(base);
            SlotKey::new(resource_id, date)
        })
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn slot_helper_formats_key() {
        let key = helpers::slot("boat-3", 2025, 7, 14);
        assert_eq!(key.to_string(), "boat-3@2025-07-14");
    }

    proptest! {
        #[test]
        fn generated_resource_ids_are_valid(id in properties::arb_resource_id()) {
            prop_assert!(id.is_valid());
        }
    }
}
