//! Retrieval of the outage-schedule fragment for an address.

use std::future::Future;

use async_trait::async_trait;
use log::info;
use log::warn;

use crate::config::RetryPolicy;
use crate::entity::Address;
use crate::scrape::error::ScrapeError;

pub mod error;
pub mod form_scraper;
pub mod pool;
pub mod selectors;
pub mod static_scraper;

/// Text stored when the site says it has no schedule for the address.
pub const NO_SCHEDULE_FRAGMENT: &str =
    "Графік відключень для цієї адреси не знайдено або адреса не обслуговується.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    Schedule,
    /// The site answered but reported nothing for the address. Not an error.
    NoSchedule,
}

/// The extracted schedule snippet for one address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleFragment {
    pub kind: FragmentKind,
    pub html: String,
}

impl ScheduleFragment {
    pub fn schedule(html: impl Into<String>) -> Self {
        Self {
            kind: FragmentKind::Schedule,
            html: html.into(),
        }
    }

    pub fn no_schedule() -> Self {
        Self {
            kind: FragmentKind::NoSchedule,
            html: format!("<p>{NO_SCHEDULE_FRAGMENT}</p>"),
        }
    }

    pub fn is_no_schedule(&self) -> bool {
        self.kind == FragmentKind::NoSchedule
    }
}

pub type FetchResult = Result<ScheduleFragment, ScrapeError>;

/// Anything that can produce a schedule fragment for an address.
#[async_trait]
pub trait ScheduleSource: Send + Sync {
    async fn fetch(&self, address: &Address) -> FetchResult;

    /// Short name used in logs.
    fn name(&self) -> &str;
}

/// Runs `attempt` until it succeeds, fails with a non-transient error, or
/// `policy.attempts` is used up, sleeping `policy.delay` between tries.
pub async fn fetch_with_retry<F, Fut>(
    policy: &RetryPolicy,
    address: &Address,
    mut attempt: F,
) -> FetchResult
where
    F: FnMut() -> Fut,
    Fut: Future<Output = FetchResult>,
{
    let attempts = policy.attempts.max(1);
    let mut current = 1;
    loop {
        match attempt().await {
            Ok(fragment) => {
                if current > 1 {
                    info!("Fetched {address} on attempt {current}.");
                }
                return Ok(fragment);
            }
            Err(e) if e.is_transient() && current < attempts => {
                warn!(
                    "Attempt {current}/{attempts} for {address} failed: {e}. Retrying in {:?}.",
                    policy.delay
                );
                tokio::time::sleep(policy.delay).await;
                current += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
