//! Top-level application errors.

use std::fmt::Display;

use log::error;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AppError {
    #[error("Missing config with key \"{key}\"")]
    MissingConfig { key: String },

    #[error("Configuration error: {msg}")]
    ConfigurationError { msg: String },

    #[error("Internal error (ref `{ref_id}`): {message}")]
    Internal { message: String, ref_id: String },
}

impl AppError {
    /// Logs `value` under a fresh reference id and wraps it.
    ///
    /// The reference id is safe to show to users; the details only go to the log.
    pub fn internal_with_ref(value: impl Display) -> Self {
        let message = value.to_string();
        let ref_id = Self::log_with_ref(&message);
        Self::Internal { message, ref_id }
    }

    /// Logs `value` with a short reference id and returns that id.
    pub fn log_with_ref(value: &(impl Display + ?Sized)) -> String {
        let ref_id = Self::new_ref_id();
        error!("[ref {ref_id}] {value}");
        ref_id
    }

    fn new_ref_id() -> String {
        Uuid::new_v4().simple().to_string()[..8].to_string()
    }
}
