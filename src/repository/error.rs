#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DatabaseError {
    #[error("Internal database error: {0}")]
    BackendError(#[from] sqlx::Error),

    #[error("Subscription {id} not found")]
    SubscriptionNotFound { id: i64 },

    #[error("Internal database error: {message}")]
    InternalError { message: String },
}
