//! # Charterbook Runtime
//!
//! Runtime for reserving charter slots against a versioned store.
//!
//! This crate turns the storage contracts from `charterbook-core` into a
//! working reservation service.
//!
//! ## Core Components
//!
//! - **`ConnectionPool`**: Bounds concurrent store handles with a FIFO wait queue
//! - **Saga executor**: Runs ordered steps and compensates completed ones on failure
//! - **`TransactionCoordinator`**: Composes the two into `reserve()`
//!
//! ## Example
//!
//! ```ignore
//! use charterbook_runtime::{CoordinatorConfig, TransactionCoordinator};
//! use charterbook_core::environment::SystemClock;
//!
//! let coordinator = TransactionCoordinator::new(
//!     store,
//!     Arc::new(SystemClock),
//!     CoordinatorConfig::from_env(),
//! )?;
//!
//! let booking = coordinator
//!     .reserve("boat-7".into(), date, json!({ "guests": 6 }))
//!     .await?;
//! ```

/// Pool and coordinator configuration
pub mod config;

/// Slot reservation on top of the saga executor
pub mod coordinator;

/// Prometheus metrics for observability
pub mod metrics;

/// Bounded handle pool with a FIFO wait queue
pub mod pool;

/// Retry logic with exponential backoff
pub mod retry;

/// Ordered steps with reverse-order compensation
pub mod saga;

pub use config::{CoordinatorConfig, PoolConfig};
pub use coordinator::{ReservationResult, TransactionCoordinator};
pub use pool::{ConnectionPool, PoolStats, PooledConnection};
pub use retry::RetryPolicy;
pub use saga::{Step, StepError, StepFuture, TransactionError};
