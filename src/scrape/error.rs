use std::time::Duration;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ScrapeError {
    #[error("Page did not load within {timeout:?}.")]
    NavigationTimeout { timeout: Duration },

    #[error("Form field `{field}` not found (tried {tried:?}).")]
    FieldNotFound { field: String, tried: Vec<String> },

    #[error("Result container did not appear within {timeout:?}.")]
    ResultTimeout { timeout: Duration },

    #[error("Result container rendered only {len} characters.")]
    EmptyResult { len: usize },

    #[error("Site showed an error page (matched `{marker}`).")]
    SiteError { marker: String },

    #[error("Failed to launch browser: {0}")]
    BrowserLaunch(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("HTTP request failed: {0}")]
    Http(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Invalid CSS selector `{selector}`.")]
    InvalidSelector { selector: String },

    #[error("Browser pool is shut down.")]
    PoolClosed,
}

impl ScrapeError {
    /// Whether another attempt within the same fetch may succeed.
    ///
    /// A missing form field means the site markup changed and a launch failure
    /// will not heal within seconds, so neither is retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ScrapeError::NavigationTimeout { .. }
                | ScrapeError::ResultTimeout { .. }
                | ScrapeError::EmptyResult { .. }
                | ScrapeError::SiteError { .. }
                | ScrapeError::Browser(_)
                | ScrapeError::Http(_)
        )
    }
}

impl From<chromiumoxide::error::CdpError> for ScrapeError {
    fn from(e: chromiumoxide::error::CdpError) -> Self {
        ScrapeError::Browser(e.to_string())
    }
}

impl From<wreq::Error> for ScrapeError {
    fn from(e: wreq::Error) -> Self {
        ScrapeError::Http(Box::new(e))
    }
}
