//! Subscription management service.

use std::sync::Arc;

use crate::detector::normalize_whitespace;
use crate::entity::Address;
use crate::entity::SubscriptionModel;
use crate::entity::SubscriptionStats;
use crate::repository::Repository;
use crate::service::error::ServiceError;

/// Cities served by the utility, offered in autocomplete before anyone subscribes.
pub const DEFAULT_CITIES: &[&str] = &[
    "Кременчук",
    "Горішні Плавні",
    "Світловодськ",
    "Комсомольськ",
    "Глобине",
];

const MAX_SUGGESTIONS: usize = 25;
const MOST_FAILING_LIMIT: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeResult {
    Created { address: Address },
    AlreadySubscribed { address: Address },
}

/// Data behind the admin statistics view.
#[derive(Debug, Clone)]
pub struct StatsReport {
    pub stats: SubscriptionStats,
    pub error_threshold: u32,
    pub most_failing: Vec<SubscriptionModel>,
}

pub struct SubscriptionService {
    pub db: Arc<Repository>,
}

impl SubscriptionService {
    pub fn new(db: Arc<Repository>) -> Self {
        Self { db }
    }

    /// Subscribes `owner_id` to the normalized address. Subscribing twice is not an error.
    ///
    /// # Performance
    /// * DB calls: 1
    pub async fn subscribe(
        &self,
        owner_id: u64,
        city: &str,
        street: &str,
        house: &str,
    ) -> Result<SubscribeResult, ServiceError> {
        let address = Address::new(city, street, house);
        if address.is_incomplete() {
            return Err(ServiceError::InvalidAddress {
                message: format!("`{address}`"),
            });
        }

        if self.db.subscription.add(owner_id, &address).await? {
            Ok(SubscribeResult::Created { address })
        } else {
            Ok(SubscribeResult::AlreadySubscribed { address })
        }
    }

    /// Removes all subscriptions of `owner_id`.
    pub async fn unsubscribe_all(&self, owner_id: u64) -> Result<u64, ServiceError> {
        Ok(self.db.subscription.remove_all(owner_id).await?)
    }

    pub async fn list(&self, owner_id: u64) -> Result<Vec<SubscriptionModel>, ServiceError> {
        Ok(self.db.subscription.list(owner_id).await?)
    }

    /// # Performance
    /// * DB calls: 2
    pub async fn stats(&self) -> Result<StatsReport, ServiceError> {
        let stats = self.db.subscription.stats().await?;
        let most_failing = self
            .db
            .subscription
            .most_failing(MOST_FAILING_LIMIT)
            .await?;
        Ok(StatsReport {
            stats,
            error_threshold: self.db.subscription.error_threshold(),
            most_failing,
        })
    }

    /// Lifts quarantine for every subscription to the address.
    pub async fn reset_errors(
        &self,
        city: &str,
        street: &str,
        house: &str,
    ) -> Result<u64, ServiceError> {
        let address = Address::new(city, street, house);
        Ok(self.db.subscription.reset_errors(&address).await?)
    }

    /// Lifts quarantine for every subscription of `owner_id`.
    pub async fn reset_errors_for_owner(&self, owner_id: u64) -> Result<u64, ServiceError> {
        Ok(self.db.subscription.reset_errors_for_owner(owner_id).await?)
    }

    /// Known cities containing `partial`, defaults first, without duplicates.
    pub async fn city_suggestions(&self, partial: &str) -> Result<Vec<String>, ServiceError> {
        let needle = partial.trim().to_lowercase();
        let stored = self
            .db
            .subscription
            .distinct_cities(partial, MAX_SUGGESTIONS as u32)
            .await?;

        let mut suggestions: Vec<String> = DEFAULT_CITIES
            .iter()
            .filter(|city| city.to_lowercase().contains(&needle))
            .map(|city| city.to_string())
            .collect();
        for city in stored {
            if !suggestions.contains(&city) {
                suggestions.push(city);
            }
        }
        suggestions.truncate(MAX_SUGGESTIONS);
        Ok(suggestions)
    }

    /// Streets already subscribed to in `city` that contain `partial`.
    pub async fn street_suggestions(
        &self,
        city: &str,
        partial: &str,
    ) -> Result<Vec<String>, ServiceError> {
        Ok(self
            .db
            .subscription
            .distinct_streets(&normalize_whitespace(city), partial, MAX_SUGGESTIONS as u32)
            .await?)
    }
}
