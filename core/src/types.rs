//! Slot identification, versioning and record types.
//!
//! This module defines the strong types shared by every layer of the reservation
//! core: the slot key (`ResourceId` + date), the optimistic-concurrency `Version`,
//! and the two persisted records (`AvailabilityRecord`, `BookingRecord`).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Error type for `ResourceId` parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid resource ID: {0}")]
pub struct ParseResourceIdError(String);

/// Opaque identifier for a bookable resource (a boat, a cabin, a crew slot).
///
/// # Validation
///
/// - `FromStr::from_str()`: Validates input (rejects empty and whitespace-only strings)
/// - `From::from()` and `new()`: No validation (for internal use with trusted input)
///
/// Use `FromStr` when parsing external/user input.
///
/// # Examples
///
/// ```
/// use charterbook_core::types::ResourceId;
///
/// let resource = ResourceId::new("boat-42");
/// assert_eq!(resource.as_str(), "boat-42");
///
/// let parsed: ResourceId = "boat-7".parse().unwrap();
/// assert_eq!(parsed, ResourceId::new("boat-7"));
/// assert!("  ".parse::<ResourceId>().is_err());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(String);

impl ResourceId {
    /// Create a new `ResourceId` from a string without validation.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the resource ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this ID would be accepted by `FromStr`.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.0.trim().is_empty()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ResourceId {
    type Err = ParseResourceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(ParseResourceIdError(
                "Resource ID cannot be empty".to_string(),
            ));
        }
        Ok(Self(s.to_string()))
    }
}

impl From<String> for ResourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ResourceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for ResourceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Key of a single reservable slot: one resource on one calendar date.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotKey {
    /// The resource being booked.
    pub resource_id: ResourceId,
    /// The calendar date of the slot.
    pub date: NaiveDate,
}

impl SlotKey {
    /// Create a slot key.
    #[must_use]
    pub fn new(resource_id: impl Into<ResourceId>, date: NaiveDate) -> Self {
        Self {
            resource_id: resource_id.into(),
            date,
        }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.resource_id, self.date)
    }
}

/// Version stamp for optimistic concurrency control on availability records.
///
/// Every successful compare-and-swap moves the stored version to `next()`.
/// Writers present the version they last read; a mismatch never mutates state.
///
/// # Examples
///
/// ```
/// use charterbook_core::types::Version;
///
/// let v3 = Version::new(3);
/// assert_eq!(v3.next(), Version::new(4));
/// assert_eq!(v3.value(), 3);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// The version assigned when a slot is onboarded.
    pub const INITIAL: Self = Self(0);

    /// Create a new `Version` with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the version number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Get the next version (current + 1).
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Whether one resource is bookable on one date, at a given version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityRecord {
    /// The slot this record describes.
    pub key: SlotKey,
    /// `true` while the slot can still be reserved.
    pub is_available: bool,
    /// Current version stamp; changes only through a successful CAS.
    pub version: Version,
}

impl AvailabilityRecord {
    /// Create an availability record.
    #[must_use]
    pub const fn new(key: SlotKey, is_available: bool, version: Version) -> Self {
        Self {
            key,
            is_available,
            version,
        }
    }

    /// The state portion of this record, as presented to a CAS.
    #[must_use]
    pub const fn state(&self) -> AvailabilityState {
        AvailabilityState {
            is_available: self.is_available,
        }
    }
}

/// New state written by a compare-and-swap.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityState {
    /// Target availability flag.
    pub is_available: bool,
}

impl AvailabilityState {
    /// Slot is open for booking.
    pub const AVAILABLE: Self = Self { is_available: true };
    /// Slot has been claimed.
    pub const TAKEN: Self = Self {
        is_available: false,
    };
}

/// Unique identifier of a booking row.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BookingId(Uuid);

impl BookingId {
    /// Generate a fresh random booking ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for BookingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a booking row.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    /// Inserted, but the paired availability CAS has not completed yet.
    Provisional,
    /// The reservation transaction finished successfully.
    Committed,
}

impl BookingStatus {
    /// Get the status as its persisted string form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Provisional => "provisional",
            Self::Committed => "committed",
        }
    }

    /// Parse the persisted string form.
    ///
    /// # Errors
    ///
    /// Returns the unrecognised input if it is not a known status.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "provisional" => Ok(Self::Provisional),
            "committed" => Ok(Self::Committed),
            other => Err(format!("Unknown booking status: {other}")),
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reservation attempt's persisted intent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BookingRecord {
    /// Booking ID.
    pub id: BookingId,
    /// The slot being booked.
    pub key: SlotKey,
    /// Caller-supplied booking details (opaque to the core).
    pub payload: serde_json::Value,
    /// Provisional until the reservation commits.
    pub status: BookingStatus,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
}

impl BookingRecord {
    /// Create a provisional booking with a fresh ID.
    #[must_use]
    pub fn provisional(key: SlotKey, payload: serde_json::Value, created_at: DateTime<Utc>) -> Self {
        Self {
            id: BookingId::generate(),
            key,
            payload,
            status: BookingStatus::Provisional,
            created_at,
        }
    }

    /// Whether the booking has been committed.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.status == BookingStatus::Committed
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 14).unwrap()
    }

    #[test]
    fn resource_id_rejects_blank_input() {
        assert!("".parse::<ResourceId>().is_err());
        assert!(" \t".parse::<ResourceId>().is_err());
        assert!(!ResourceId::new("  ").is_valid());
        assert!(ResourceId::new("boat-1").is_valid());
    }

    #[test]
    fn slot_key_display() {
        let key = SlotKey::new("boat-1", date());
        assert_eq!(key.to_string(), "boat-1@2025-07-14");
    }

    #[test]
    fn version_ordering_and_next() {
        assert!(Version::new(3) < Version::new(4));
        assert_eq!(Version::INITIAL.next().next(), Version::new(2));
    }

    #[test]
    fn booking_status_string_forms() {
        for status in [BookingStatus::Provisional, BookingStatus::Committed] {
            assert_eq!(BookingStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(BookingStatus::parse("cancelled").is_err());

        let json = serde_json::to_string(&BookingStatus::Committed).unwrap();
        assert_eq!(json, "\"committed\"");
    }

    #[test]
    fn provisional_booking_gets_unique_id() {
        let key = SlotKey::new("boat-1", date());
        let a = BookingRecord::provisional(key.clone(), serde_json::Value::Null, Utc::now());
        let b = BookingRecord::provisional(key, serde_json::Value::Null, Utc::now());
        assert_ne!(a.id, b.id);
        assert_eq!(a.status, BookingStatus::Provisional);
        assert!(!a.is_committed());
    }

    proptest::proptest! {
        #[test]
        fn resource_id_parse_accepts_any_non_blank(s in "[a-z0-9-]{1,24}") {
            let parsed: ResourceId = s.parse().unwrap();
            proptest::prop_assert_eq!(parsed.as_str(), s.as_str());
        }

        #[test]
        fn version_next_is_strictly_greater(v in 0u64..u64::MAX) {
            proptest::prop_assert!(Version::new(v).next() > Version::new(v));
        }
    }
}
