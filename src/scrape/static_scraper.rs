//! Plain HTTP fallback that parses the schedule page without running its scripts.

use std::num::NonZeroU32;
use std::sync::LazyLock;

use async_trait::async_trait;
use governor::Quota;
use governor::RateLimiter;
use governor::clock::QuantaClock;
use governor::state::InMemoryState;
use governor::state::direct::NotKeyed;
use log::debug;
use log::info;
use log::warn;
use regex::Regex;
use scraper::ElementRef;
use scraper::Html;
use scraper::Selector;
use url::Url;

use crate::config::ScraperConfig;
use crate::detector::normalize_whitespace;
use crate::entity::Address;
use crate::scrape::FetchResult;
use crate::scrape::ScheduleFragment;
use crate::scrape::ScheduleSource;
use crate::scrape::fetch_with_retry;
use crate::scrape::error::ScrapeError;
use crate::scrape::selectors::SelectorSet;

static TIME_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{1,2}:\d{2}\s*[-–]\s*\d{1,2}:\d{2}").expect("time range pattern is valid")
});

/// Containers with less text than this are layout chrome, not a schedule.
const MIN_CONTAINER_TEXT: usize = 30;

pub struct StaticScraper {
    client: wreq::Client,
    config: ScraperConfig,
    limiter: RateLimiter<NotKeyed, InMemoryState, QuantaClock>,
}

impl StaticScraper {
    pub fn new(config: ScraperConfig) -> Result<Self, ScrapeError> {
        let client = wreq::Client::builder()
            .emulation(wreq_util::Emulation::Chrome137)
            .build()?;
        let per_minute =
            NonZeroU32::new(config.static_requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let limiter = RateLimiter::direct(Quota::per_minute(per_minute));
        Ok(Self {
            client,
            config,
            limiter,
        })
    }

    fn request_url(&self, address: &Address) -> Result<Url, ScrapeError> {
        Url::parse_with_params(
            &self.config.url,
            &[
                ("city", address.city.as_str()),
                ("street", address.street.as_str()),
                ("house", address.house.as_str()),
            ],
        )
        .map_err(|e| ScrapeError::Http(Box::new(e)))
    }

    async fn download(&self, url: Url) -> Result<String, ScrapeError> {
        if self.limiter.check().is_err() {
            info!("Static scraper is ratelimited. Waiting...");
        }
        self.limiter.until_ready().await;

        debug!("Making request to: {url}");
        let bound = self.config.navigation_timeout;
        let request = async {
            let response = self.client.get(url.as_str()).send().await?;
            Ok::<_, ScrapeError>(response.error_for_status()?.text().await?)
        };
        tokio::time::timeout(bound, request)
            .await
            .map_err(|_| ScrapeError::NavigationTimeout { timeout: bound })?
    }

    async fn attempt(&self, address: &Address) -> FetchResult {
        let url = self.request_url(address)?;
        let html = self.download(url).await?;
        extract_fragment(&html, &self.config.selectors)
    }
}

#[async_trait]
impl ScheduleSource for StaticScraper {
    async fn fetch(&self, address: &Address) -> FetchResult {
        fetch_with_retry(&self.config.retry, address, || self.attempt(address)).await
    }

    fn name(&self) -> &str {
        "static-html"
    }
}

/// Finds the schedule in a server-rendered page.
///
/// Collects every container selector match with enough text, then falls back
/// to the first table, then to bare time ranges in the page text. A page with
/// none of these has no schedule, unless it shows the site's error text.
pub fn extract_fragment(html: &str, selectors: &SelectorSet) -> FetchResult {
    let document = Html::parse_document(html);

    let mut containers: Vec<ElementRef> = Vec::new();
    for raw in &selectors.static_containers {
        let selector = parse_selector(raw)?;
        for element in document.select(&selector) {
            let text = normalize_whitespace(&element.text().collect::<Vec<_>>().join(" "));
            if text.chars().count() <= MIN_CONTAINER_TEXT {
                continue;
            }
            if containers.iter().any(|seen| overlaps(seen, &element)) {
                continue;
            }
            debug!("Schedule container matched `{raw}`");
            containers.push(element);
        }
    }
    if !containers.is_empty() {
        let html: Vec<String> = containers.iter().map(|e| e.html()).collect();
        return Ok(ScheduleFragment::schedule(html.join("\n")));
    }

    let table = parse_selector("table")?;
    if let Some(element) = document.select(&table).next() {
        return Ok(ScheduleFragment::schedule(element.html()));
    }

    let text = document.root_element().text().collect::<Vec<_>>().join(" ");
    let ranges: Vec<String> = TIME_RANGE
        .find_iter(&text)
        .map(|m| normalize_whitespace(m.as_str()))
        .collect();
    if !ranges.is_empty() {
        let items: String = ranges.iter().map(|r| format!("<li>{r}</li>")).collect();
        return Ok(ScheduleFragment::schedule(format!("<ul>{items}</ul>")));
    }

    if let Some(marker) = selectors.error_marker_in(&text) {
        warn!("Site reported an error instead of a schedule.");
        return Err(ScrapeError::SiteError {
            marker: marker.to_string(),
        });
    }

    Ok(ScheduleFragment::no_schedule())
}

/// Whether one element is the other or nested inside it.
fn overlaps(a: &ElementRef, b: &ElementRef) -> bool {
    a.id() == b.id()
        || a.ancestors().any(|node| node.id() == b.id())
        || b.ancestors().any(|node| node.id() == a.id())
}

fn parse_selector(raw: &str) -> Result<Selector, ScrapeError> {
    Selector::parse(raw).map_err(|_| ScrapeError::InvalidSelector {
        selector: raw.to_string(),
    })
}
