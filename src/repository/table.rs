//! Database table operations and implementations.

use chrono::DateTime;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::entity::Address;
use crate::entity::CheckOutcome;
use crate::entity::SubscriptionModel;
use crate::entity::SubscriptionStats;
use crate::repository::error::DatabaseError;

/// Base table struct providing database pool access.
#[derive(Clone)]
pub struct BaseTable {
    pub pool: SqlitePool,
}

impl BaseTable {
    /// Creates a new base table with the given pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Trait for tables addressable by primary key.
#[async_trait::async_trait]
pub trait Table<T, ID> {
    async fn select_all(&self) -> Result<Vec<T>, DatabaseError>;
    async fn select(&self, id: &ID) -> Result<Option<T>, DatabaseError>;
}

// ============================================================================
// SubscriptionTable
// ============================================================================

/// The subscription store.
///
/// Rows are independent of each other, so every mutation here is a single
/// statement and needs no transaction.
#[derive(Clone)]
pub struct SubscriptionTable {
    base: BaseTable,
    error_threshold: u32,
}

impl SubscriptionTable {
    pub fn new(pool: SqlitePool, error_threshold: u32) -> Self {
        Self {
            base: BaseTable::new(pool),
            error_threshold,
        }
    }

    pub fn error_threshold(&self) -> u32 {
        self.error_threshold
    }

    /// Subscribes `owner_id` to `address`.
    ///
    /// Returns `false` when the same owner already watches the same address.
    pub async fn add(&self, owner_id: u64, address: &Address) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            INSERT INTO subscriptions (owner_id, city, street, house, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(owner_id, city, street, house) DO NOTHING
            "#,
        )
        .bind(owner_id as i64)
        .bind(&address.city)
        .bind(&address.street)
        .bind(&address.house)
        .bind(Utc::now())
        .execute(&self.base.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Removes every subscription of `owner_id`, returning how many were removed.
    pub async fn remove_all(&self, owner_id: u64) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE owner_id = ?")
            .bind(owner_id as i64)
            .execute(&self.base.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn list(&self, owner_id: u64) -> Result<Vec<SubscriptionModel>, DatabaseError> {
        Ok(sqlx::query_as::<_, SubscriptionModel>(
            "SELECT * FROM subscriptions WHERE owner_id = ? ORDER BY id",
        )
        .bind(owner_id as i64)
        .fetch_all(&self.base.pool)
        .await?)
    }

    /// Returns up to `limit` non-quarantined subscriptions, least recently checked first.
    ///
    /// Never-checked rows come before everything else; ties break on `id`.
    pub async fn select_batch(&self, limit: u32) -> Result<Vec<SubscriptionModel>, DatabaseError> {
        Ok(sqlx::query_as::<_, SubscriptionModel>(
            r#"
            SELECT * FROM subscriptions
            WHERE error_count < ?
            ORDER BY last_checked_at ASC NULLS FIRST, id ASC
            LIMIT ?
            "#,
        )
        .bind(self.error_threshold as i64)
        .bind(limit as i64)
        .fetch_all(&self.base.pool)
        .await?)
    }

    /// Records the outcome of a check made now. Returns the resulting `error_count`.
    pub async fn record_result(
        &self,
        id: i64,
        outcome: &CheckOutcome,
    ) -> Result<u32, DatabaseError> {
        self.record_result_at(id, outcome, Utc::now()).await
    }

    /// Records the outcome of a check made at `checked_at`.
    ///
    /// Success resets `error_count` to 0 and optionally replaces the
    /// fingerprint; failure increments `error_count` and leaves the fingerprint alone.
    pub async fn record_result_at(
        &self,
        id: i64,
        outcome: &CheckOutcome,
        checked_at: DateTime<Utc>,
    ) -> Result<u32, DatabaseError> {
        let row: Option<(i64,)> = match outcome {
            CheckOutcome::Success {
                fingerprint: Some(fingerprint),
            } => {
                sqlx::query_as(
                    r#"
                    UPDATE subscriptions
                    SET last_checked_at = ?, last_fingerprint = ?, error_count = 0
                    WHERE id = ?
                    RETURNING error_count
                    "#,
                )
                .bind(checked_at)
                .bind(fingerprint)
                .bind(id)
                .fetch_optional(&self.base.pool)
                .await?
            }
            CheckOutcome::Success { fingerprint: None } => {
                sqlx::query_as(
                    r#"
                    UPDATE subscriptions
                    SET last_checked_at = ?, error_count = 0
                    WHERE id = ?
                    RETURNING error_count
                    "#,
                )
                .bind(checked_at)
                .bind(id)
                .fetch_optional(&self.base.pool)
                .await?
            }
            CheckOutcome::Failure => {
                sqlx::query_as(
                    r#"
                    UPDATE subscriptions
                    SET last_checked_at = ?, error_count = error_count + 1
                    WHERE id = ?
                    RETURNING error_count
                    "#,
                )
                .bind(checked_at)
                .bind(id)
                .fetch_optional(&self.base.pool)
                .await?
            }
        };

        let (error_count,) = row.ok_or(DatabaseError::SubscriptionNotFound { id })?;
        u32::try_from(error_count).map_err(|e| DatabaseError::InternalError {
            message: format!("error_count {error_count} out of range: {e}"),
        })
    }

    /// Clears the failure counter of every subscription to `address`, lifting quarantine.
    pub async fn reset_errors(&self, address: &Address) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            "UPDATE subscriptions SET error_count = 0 WHERE city = ? AND street = ? AND house = ?",
        )
        .bind(&address.city)
        .bind(&address.street)
        .bind(&address.house)
        .execute(&self.base.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn reset_errors_for_owner(&self, owner_id: u64) -> Result<u64, DatabaseError> {
        let result = sqlx::query("UPDATE subscriptions SET error_count = 0 WHERE owner_id = ?")
            .bind(owner_id as i64)
            .execute(&self.base.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_active(&self) -> Result<i64, DatabaseError> {
        Ok(
            sqlx::query_scalar("SELECT COUNT(*) FROM subscriptions WHERE error_count < ?")
                .bind(self.error_threshold as i64)
                .fetch_one(&self.base.pool)
                .await?,
        )
    }

    pub async fn stats(&self) -> Result<SubscriptionStats, DatabaseError> {
        Ok(sqlx::query_as::<_, SubscriptionStats>(
            r#"
            SELECT
                COUNT(DISTINCT owner_id) AS users,
                COALESCE(SUM(CASE WHEN error_count < ? THEN 1 ELSE 0 END), 0) AS active,
                COALESCE(SUM(CASE WHEN error_count >= ? THEN 1 ELSE 0 END), 0) AS quarantined,
                CAST(COALESCE(AVG(error_count), 0) AS REAL) AS average_errors
            FROM subscriptions
            "#,
        )
        .bind(self.error_threshold as i64)
        .bind(self.error_threshold as i64)
        .fetch_one(&self.base.pool)
        .await?)
    }

    /// Subscriptions with at least one recent failure, worst first.
    pub async fn most_failing(&self, limit: u32) -> Result<Vec<SubscriptionModel>, DatabaseError> {
        Ok(sqlx::query_as::<_, SubscriptionModel>(
            r#"
            SELECT * FROM subscriptions
            WHERE error_count > 0
            ORDER BY error_count DESC, id ASC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.base.pool)
        .await?)
    }

    /// Stored city names containing `search`, case-insensitively.
    ///
    /// Matching happens here rather than in SQL because SQLite's `LOWER` only
    /// folds ASCII and city names are Cyrillic.
    pub async fn distinct_cities(
        &self,
        search: &str,
        limit: impl Into<Option<u32>>,
    ) -> Result<Vec<String>, DatabaseError> {
        let limit = limit.into().unwrap_or(25) as usize;
        let needle = search.trim().to_lowercase();
        let cities: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT city FROM subscriptions ORDER BY city")
                .fetch_all(&self.base.pool)
                .await?;
        Ok(cities
            .into_iter()
            .filter(|city| city.to_lowercase().contains(&needle))
            .take(limit)
            .collect())
    }

    /// Stored street names in `city` containing `search`, case-insensitively.
    ///
    /// An empty `city` matches streets in every city.
    pub async fn distinct_streets(
        &self,
        city: &str,
        search: &str,
        limit: u32,
    ) -> Result<Vec<String>, DatabaseError> {
        let city = city.trim().to_lowercase();
        let needle = search.trim().to_lowercase();
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT DISTINCT city, street FROM subscriptions ORDER BY street, city",
        )
        .fetch_all(&self.base.pool)
        .await?;

        let mut streets: Vec<String> = Vec::new();
        for (stored_city, street) in rows {
            if (city.is_empty() || stored_city.to_lowercase() == city)
                && street.to_lowercase().contains(&needle)
                && !streets.contains(&street)
            {
                streets.push(street);
            }
        }
        streets.truncate(limit as usize);
        Ok(streets)
    }
}

#[async_trait::async_trait]
impl Table<SubscriptionModel, i64> for SubscriptionTable {
    async fn select_all(&self) -> Result<Vec<SubscriptionModel>, DatabaseError> {
        Ok(
            sqlx::query_as::<_, SubscriptionModel>("SELECT * FROM subscriptions ORDER BY id")
                .fetch_all(&self.base.pool)
                .await?,
        )
    }

    async fn select(&self, id: &i64) -> Result<Option<SubscriptionModel>, DatabaseError> {
        Ok(
            sqlx::query_as::<_, SubscriptionModel>("SELECT * FROM subscriptions WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.base.pool)
                .await?,
        )
    }
}
