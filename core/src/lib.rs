//! # Charterbook Core
//!
//! Core types and traits for the slot reservation coordinator.
//!
//! This crate provides the building blocks shared by the runtime, the store
//! implementations and tests:
//!
//! - **Types**: `SlotKey`, `Version`, `AvailabilityRecord`, `BookingRecord`
//! - **Store**: `AvailabilityRepository` / `BookingRepository` traits with versioned
//!   reads and compare-and-swap writes
//! - **Resolution**: `ConflictResolver`, the pure classifier from store responses to
//!   reservation outcomes
//! - **Errors**: the caller-facing `BookingError` taxonomy
//! - **Environment**: injected dependencies such as `Clock`
//!
//! ## Architecture Principles
//!
//! - Optimistic concurrency: the store's CAS is the only arbiter of who wins a slot
//! - Dependency injection: no hidden global client, every store is passed in
//! - Explicit compensation: multi-step writes are undone step by step on failure

pub mod error;
pub mod resolution;
pub mod store;
pub mod types;

pub use error::{BookingError, CompensationFailure};
pub use resolution::{ConflictResolver, Resolution};
pub use store::{
    AvailabilityRepository, BookingRepository, StoreError, StoreFuture, VersionedResourceStore,
};
pub use types::{
    AvailabilityRecord, AvailabilityState, BookingId, BookingRecord, BookingStatus, ResourceId,
    SlotKey, Version,
};

/// Environment module - Injected dependencies
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use charterbook_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let _now = clock.now();
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
