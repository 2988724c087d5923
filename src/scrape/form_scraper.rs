//! Browser-driven scraper for the cascading city/street/house form.

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use log::warn;
use tokio::time::Instant;
use tokio::time::sleep;
use tokio::time::timeout;

use crate::config::ScraperConfig;
use crate::entity::Address;
use crate::scrape::FetchResult;
use crate::scrape::ScheduleFragment;
use crate::scrape::ScheduleSource;
use crate::scrape::fetch_with_retry;
use crate::scrape::error::ScrapeError;
use crate::scrape::pool::BrowserPage;
use crate::scrape::pool::PageSource;

/// Fills the address form on a fresh page per attempt and extracts the result table.
pub struct FormScraper {
    pages: Arc<dyn PageSource>,
    config: ScraperConfig,
}

impl FormScraper {
    pub fn new(pages: Arc<dyn PageSource>, config: ScraperConfig) -> Self {
        Self { pages, config }
    }

    async fn attempt(&self, address: &Address) -> FetchResult {
        let lease = self.pages.acquire_page().await?;
        let result = match lease.page() {
            Ok(page) => self.run_form(page, address).await,
            Err(e) => Err(e),
        };
        lease.release().await;
        result
    }

    async fn run_form(&self, page: &dyn BrowserPage, address: &Address) -> FetchResult {
        self.navigate(page).await?;

        let values = [&address.city, &address.street, &address.house];
        let mut last_field = String::new();
        for ((field, selectors), value) in self.config.selectors.fields().into_iter().zip(values) {
            last_field = self.fill_field(page, field, selectors, value).await?;
        }

        self.submit(page, &last_field).await?;
        self.await_result(page).await
    }

    async fn navigate(&self, page: &dyn BrowserPage) -> Result<(), ScrapeError> {
        let bound = self.config.navigation_timeout;
        timeout(bound, page.goto(&self.config.url))
            .await
            .map_err(|_| ScrapeError::NavigationTimeout { timeout: bound })??;
        sleep(self.config.settle_delay).await;
        Ok(())
    }

    /// Types `value` into the first visible field alternative and picks a suggestion.
    ///
    /// Returns the selector that resolved.
    async fn fill_field(
        &self,
        page: &dyn BrowserPage,
        field: &str,
        selectors: &[String],
        value: &str,
    ) -> Result<String, ScrapeError> {
        let selector = self
            .wait_for_visible(page, selectors, self.config.field_timeout)
            .await?
            .ok_or_else(|| ScrapeError::FieldNotFound {
                field: field.to_string(),
                tried: selectors.to_vec(),
            })?;

        page.clear(&selector).await?;
        page.type_text(&selector, value, self.config.keystroke_delay)
            .await?;

        match self.wait_for_suggestions(page).await? {
            Some((list_selector, texts)) => {
                let index = best_suggestion(&texts, value).unwrap_or(0);
                debug!(
                    "Picking suggestion {:?} for {field} `{value}`",
                    texts.get(index)
                );
                page.click(&list_selector, index).await?;
            }
            None => {
                debug!("No suggestions for {field} `{value}`, submitting field directly.");
                page.press_enter(&selector).await?;
            }
        }

        sleep(self.config.step_delay).await;
        Ok(selector)
    }

    async fn wait_for_visible(
        &self,
        page: &dyn BrowserPage,
        selectors: &[String],
        bound: std::time::Duration,
    ) -> Result<Option<String>, ScrapeError> {
        let deadline = Instant::now() + bound;
        loop {
            for selector in selectors {
                if page.is_visible(selector).await? {
                    return Ok(Some(selector.clone()));
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(self.config.poll_interval).await;
        }
    }

    async fn wait_for_suggestions(
        &self,
        page: &dyn BrowserPage,
    ) -> Result<Option<(String, Vec<String>)>, ScrapeError> {
        let deadline = Instant::now() + self.config.autocomplete_timeout;
        loop {
            for selector in &self.config.selectors.suggestions {
                let texts = page.texts(selector).await?;
                if !texts.is_empty() {
                    return Ok(Some((selector.clone(), texts)));
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(self.config.poll_interval).await;
        }
    }

    async fn submit(&self, page: &dyn BrowserPage, last_field: &str) -> Result<(), ScrapeError> {
        for selector in &self.config.selectors.submit {
            if page.is_visible(selector).await? {
                debug!("Submitting with `{selector}`");
                return page.click(selector, 0).await;
            }
        }
        debug!("No submit control found, pressing enter.");
        page.press_enter(last_field).await
    }

    async fn await_result(&self, page: &dyn BrowserPage) -> FetchResult {
        let bound = self.config.result_timeout;
        let selectors = &self.config.selectors.result;
        if let Some(selector) = self.wait_for_visible(page, selectors, bound).await? {
            sleep(self.config.step_delay).await;
            let html = page.inner_html(&selector).await?.unwrap_or_default();
            let html = html.trim();
            let len = html.chars().count();
            if len < self.config.min_fragment_len {
                return Err(ScrapeError::EmptyResult { len });
            }
            return Ok(ScheduleFragment::schedule(html));
        }

        let body = page.body_text().await?.to_lowercase();
        let markers = &self.config.selectors;
        if let Some(marker) = markers.error_marker_in(&body) {
            warn!("Site reported an error instead of a schedule.");
            return Err(ScrapeError::SiteError {
                marker: marker.to_string(),
            });
        }
        let not_found = markers
            .not_found_markers
            .iter()
            .any(|marker| body.contains(&marker.to_lowercase()));
        if not_found {
            Ok(ScheduleFragment::no_schedule())
        } else {
            Err(ScrapeError::ResultTimeout { timeout: bound })
        }
    }
}

#[async_trait]
impl ScheduleSource for FormScraper {
    async fn fetch(&self, address: &Address) -> FetchResult {
        fetch_with_retry(&self.config.retry, address, || self.attempt(address)).await
    }

    fn name(&self) -> &str {
        "browser-form"
    }
}

/// Index of the suggestion to pick for `typed`.
///
/// An exact case-insensitive match wins, then the first suggestion containing
/// the typed text, then the first suggestion. `None` only for an empty list.
pub fn best_suggestion(suggestions: &[String], typed: &str) -> Option<usize> {
    if suggestions.is_empty() {
        return None;
    }
    let typed = typed.trim().to_lowercase();
    let lowered: Vec<String> = suggestions.iter().map(|s| s.trim().to_lowercase()).collect();
    lowered
        .iter()
        .position(|s| *s == typed)
        .or_else(|| lowered.iter().position(|s| s.contains(&typed)))
        .or(Some(0))
}
