//! Persisted and in-flight domain types.

use std::fmt;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use sqlx::FromRow;

use crate::detector::normalize_whitespace;

/// A (city, street, house) triple as typed by a subscriber.
///
/// Constructed values are always normalized: surrounding whitespace is trimmed
/// and inner runs collapse to a single space, so `"Кременчук "` and
/// `"Кременчук"` are the same address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Address {
    pub city: String,
    pub street: String,
    pub house: String,
}

impl Address {
    pub fn new(city: &str, street: &str, house: &str) -> Self {
        Self {
            city: normalize_whitespace(city),
            street: normalize_whitespace(street),
            house: normalize_whitespace(house),
        }
    }

    /// Whether any of the three parts is empty after normalization.
    pub fn is_incomplete(&self) -> bool {
        self.city.is_empty() || self.street.is_empty() || self.house.is_empty()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}, {}", self.city, self.street, self.house)
    }
}

/// One owner watching one address.
///
/// `last_fingerprint` is `None` until the first successful fetch. A row whose
/// `error_count` reached the configured threshold is quarantined and skipped by
/// [`SubscriptionTable::select_batch`](crate::repository::table::SubscriptionTable::select_batch).
#[derive(FromRow, Serialize, Default, Clone, Debug)]
pub struct SubscriptionModel {
    #[serde(default)]
    pub id: i64,
    /// Discord user id.
    #[sqlx(try_from = "i64")]
    #[serde(default)]
    pub owner_id: u64,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub house: String,
    #[serde(default)]
    pub last_fingerprint: Option<String>,
    #[serde(default)]
    pub last_checked_at: Option<DateTime<Utc>>,
    #[sqlx(try_from = "i64")]
    #[serde(default)]
    pub error_count: u32,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
}

impl SubscriptionModel {
    pub fn address(&self) -> Address {
        Address {
            city: self.city.clone(),
            street: self.street.clone(),
            house: self.house.clone(),
        }
    }
}

/// What a single check did to a subscription row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The fetch succeeded. `fingerprint` is the value to store, or `None` to
    /// keep the current one.
    Success { fingerprint: Option<String> },
    /// The fetch failed after all attempts.
    Failure,
}

/// Aggregates for the admin `/stats` command.
#[derive(FromRow, Serialize, Default, Clone, Debug, PartialEq)]
pub struct SubscriptionStats {
    /// Distinct owners.
    pub users: i64,
    /// Subscriptions still being scheduled.
    pub active: i64,
    pub quarantined: i64,
    pub average_errors: f64,
}
