//! Fetch resource pool: one lazily launched Chromium shared behind a semaphore.

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::Browser;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::fetch::ContinueRequestParams;
use chromiumoxide::cdp::browser_protocol::fetch::EnableParams;
use chromiumoxide::cdp::browser_protocol::fetch::EventRequestPaused;
use chromiumoxide::cdp::browser_protocol::fetch::FailRequestParams;
use chromiumoxide::cdp::browser_protocol::fetch::RequestPattern;
use chromiumoxide::cdp::browser_protocol::network::ErrorReason;
use chromiumoxide::cdp::browser_protocol::network::ResourceType;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use futures::StreamExt;
use log::debug;
use log::info;
use log::warn;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::sync::OwnedSemaphorePermit;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::config::ScraperConfig;
use crate::scrape::error::ScrapeError;

const WEBDRIVER_MASK: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'languages', { get: () => ['uk-UA', 'uk', 'en-US', 'en'] });
window.chrome = window.chrome || { runtime: {} };
"#;

/// The DOM operations the form scraper and the renderer need from a browser tab.
///
/// Every selector argument is a single CSS selector. Methods that look an
/// element up fail with [`ScrapeError::Browser`] when it is absent, except the
/// probing ones (`is_visible`, `texts`, `inner_html`) which report absence as a value.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn goto(&self, url: &str) -> Result<(), ScrapeError>;
    async fn is_visible(&self, selector: &str) -> Result<bool, ScrapeError>;
    async fn clear(&self, selector: &str) -> Result<(), ScrapeError>;
    /// Types `text` one character at a time, pausing `delay` after each.
    async fn type_text(&self, selector: &str, text: &str, delay: Duration)
    -> Result<(), ScrapeError>;
    async fn press_enter(&self, selector: &str) -> Result<(), ScrapeError>;
    /// Trimmed visible text of every element matching `selector`, in document order.
    async fn texts(&self, selector: &str) -> Result<Vec<String>, ScrapeError>;
    /// Clicks the `index`-th element matching `selector`.
    async fn click(&self, selector: &str, index: usize) -> Result<(), ScrapeError>;
    async fn inner_html(&self, selector: &str) -> Result<Option<String>, ScrapeError>;
    async fn body_text(&self) -> Result<String, ScrapeError>;
    async fn set_content(&self, html: &str) -> Result<(), ScrapeError>;
    async fn screenshot_png(&self) -> Result<Vec<u8>, ScrapeError>;
    async fn close(self: Box<Self>);
}

/// Mutual-exclusion gate sized to how much load the remote site tolerates.
#[derive(Clone)]
pub struct PageGate {
    semaphore: Arc<Semaphore>,
    capacity: u32,
}

impl PageGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity: capacity as u32,
        }
    }

    pub async fn enter(&self) -> Result<OwnedSemaphorePermit, ScrapeError> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ScrapeError::PoolClosed)
    }

    /// Waits until no lease is outstanding and blocks new ones while held.
    pub async fn enter_all(&self) -> Result<OwnedSemaphorePermit, ScrapeError> {
        self.semaphore
            .clone()
            .acquire_many_owned(self.capacity)
            .await
            .map_err(|_| ScrapeError::PoolClosed)
    }

    pub fn try_enter_all(&self) -> Option<OwnedSemaphorePermit> {
        self.semaphore
            .clone()
            .try_acquire_many_owned(self.capacity)
            .ok()
    }

    pub fn in_use(&self) -> usize {
        (self.capacity as usize).saturating_sub(self.semaphore.available_permits())
    }

    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}

/// A page checked out of a [`PageSource`].
///
/// Holds one gate permit for as long as it lives. Prefer [`PageLease::release`];
/// dropping the lease closes the page in a background task instead.
pub struct PageLease {
    page: Option<Box<dyn BrowserPage>>,
    _permit: OwnedSemaphorePermit,
}

impl PageLease {
    pub fn new(page: Box<dyn BrowserPage>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            page: Some(page),
            _permit: permit,
        }
    }

    pub fn page(&self) -> Result<&dyn BrowserPage, ScrapeError> {
        self.page.as_deref().ok_or(ScrapeError::PoolClosed)
    }

    /// Closes the page, then frees the permit.
    pub async fn release(mut self) {
        if let Some(page) = self.page.take() {
            page.close().await;
        }
    }
}

impl Drop for PageLease {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move { page.close().await });
                }
                Err(_) => warn!("Dropping page lease outside a runtime; page left open."),
            }
        }
    }
}

/// Source of scoped browser pages.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn acquire_page(&self) -> Result<PageLease, ScrapeError>;
}

#[derive(Default)]
struct PoolState {
    browser: Option<Browser>,
    handler: Option<JoinHandle<()>>,
    last_used: Option<Instant>,
}

impl PoolState {
    fn is_idle(&self, idle_timeout: Duration) -> bool {
        self.browser.is_some() && idle_expired(self.last_used, idle_timeout)
    }

    async fn teardown(&mut self) {
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                warn!("Browser close error: {e}");
            }
            if let Err(e) = browser.wait().await {
                debug!("Browser process wait error: {e}");
            }
        }
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
        self.last_used = None;
    }
}

fn idle_expired(last_used: Option<Instant>, idle_timeout: Duration) -> bool {
    last_used.is_some_and(|last_used| last_used.elapsed() >= idle_timeout)
}

/// Owns the Chromium process used for scraping and rendering.
///
/// The browser starts on the first [`PageSource::acquire_page`] and is closed
/// again after `browser_idle_timeout` without use. A failed launch leaves the
/// pool empty, so the next acquire simply tries again.
pub struct BrowserPool {
    config: ScraperConfig,
    gate: PageGate,
    state: Mutex<PoolState>,
}

impl BrowserPool {
    pub fn new(config: ScraperConfig) -> Arc<Self> {
        info!(
            "Initializing BrowserPool with concurrency {} and idle timeout {:?}",
            config.browser_concurrency, config.browser_idle_timeout
        );
        Arc::new(Self {
            gate: PageGate::new(config.browser_concurrency),
            config,
            state: Mutex::new(PoolState::default()),
        })
    }

    /// Spawns the task that closes the browser once it has been idle long enough.
    pub fn start_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let pool = Arc::downgrade(self);
        let period = (self.config.browser_idle_timeout / 2).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(pool) = pool.upgrade() else {
                    break;
                };
                if pool.gate.is_closed() {
                    break;
                }
                pool.close_if_idle().await;
            }
            debug!("Browser reaper stopped.");
        })
    }

    async fn close_if_idle(&self) {
        // Any outstanding lease means the browser is in use.
        let Some(_all) = self.gate.try_enter_all() else {
            return;
        };
        let mut state = self.state.lock().await;
        if state.is_idle(self.config.browser_idle_timeout) {
            info!("Browser idle for {:?}, closing.", self.config.browser_idle_timeout);
            state.teardown().await;
        }
    }

    /// Waits for in-flight leases, closes the browser, and refuses further acquires.
    pub async fn shutdown(&self) {
        let permits = self.gate.enter_all().await;
        self.state.lock().await.teardown().await;
        self.gate.close();
        drop(permits);
        info!("Browser pool shut down.");
    }

    pub fn gate(&self) -> &PageGate {
        &self.gate
    }

    async fn launch(&self) -> Result<(Browser, JoinHandle<()>), ScrapeError> {
        info!("Launching browser...");
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-dev-shm-usage")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-gpu")
            .arg(format!("--user-agent={}", self.config.user_agent))
            .arg(format!("--lang={}", self.config.language))
            .window_size(1280, 900)
            .request_timeout(self.config.navigation_timeout);
        if !self.config.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.config.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        let browser_config = builder.build().map_err(ScrapeError::BrowserLaunch)?;

        let (browser, mut handler) =
            tokio::time::timeout(self.config.navigation_timeout, Browser::launch(browser_config))
                .await
                .map_err(|_| ScrapeError::BrowserLaunch("launch timed out".to_string()))?
                .map_err(|e| ScrapeError::BrowserLaunch(e.to_string()))?;

        let handler = tokio::spawn(async move { while handler.next().await.is_some() {} });
        info!("Browser launched.");
        Ok((browser, handler))
    }

    async fn open_page(&self) -> Result<ChromePage, ScrapeError> {
        let mut state = self.state.lock().await;

        if state.is_idle(self.config.browser_idle_timeout) && self.gate.in_use() <= 1 {
            info!("Browser idle for {:?}, recycling.", self.config.browser_idle_timeout);
            state.teardown().await;
        }

        if state.browser.is_none() {
            let (browser, handler) = self.launch().await?;
            state.browser = Some(browser);
            state.handler = Some(handler);
        }

        let page = match state.browser.as_ref() {
            Some(browser) => browser.new_page("about:blank").await,
            None => return Err(ScrapeError::BrowserLaunch("browser missing".to_string())),
        };
        let page = match page {
            Ok(page) => page,
            Err(e) => {
                // A crashed browser cannot open pages; start over next time.
                warn!("Failed to open page, discarding browser: {e}");
                state.teardown().await;
                return Err(e.into());
            }
        };
        state.last_used = Some(Instant::now());
        drop(state);

        ChromePage::prepare(page, &self.config.blocked_url_markers).await
    }
}

#[async_trait]
impl PageSource for BrowserPool {
    async fn acquire_page(&self) -> Result<PageLease, ScrapeError> {
        let permit = self.gate.enter().await?;
        let page = self.open_page().await?;
        Ok(PageLease::new(Box::new(page), permit))
    }
}

/// Whether a request should be aborted before it leaves the browser.
pub fn should_block(resource_type: &ResourceType, url: &str, markers: &[String]) -> bool {
    matches!(
        resource_type,
        ResourceType::Image | ResourceType::Media | ResourceType::Font
    ) || markers.iter().any(|marker| url.contains(marker.as_str()))
}

/// A chromiumoxide tab with request interception attached.
pub struct ChromePage {
    page: Page,
    intercept: JoinHandle<()>,
}

#[derive(Deserialize)]
struct HtmlProbe {
    found: bool,
    html: String,
}

impl ChromePage {
    async fn prepare(page: Page, markers: &[String]) -> Result<Self, ScrapeError> {
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(WEBDRIVER_MASK))
            .await?;

        let mut paused = page.event_listener::<EventRequestPaused>().await?;
        let intercept_page = page.clone();
        let markers = markers.to_vec();
        let intercept = tokio::spawn(async move {
            while let Some(event) = paused.next().await {
                let request_id = event.request_id.clone();
                let outcome = if should_block(&event.resource_type, &event.request.url, &markers)
                {
                    intercept_page
                        .execute(FailRequestParams::new(
                            request_id,
                            ErrorReason::BlockedByClient,
                        ))
                        .await
                        .map(|_| ())
                } else {
                    intercept_page
                        .execute(ContinueRequestParams::new(request_id))
                        .await
                        .map(|_| ())
                };
                if let Err(e) = outcome {
                    debug!("Request interception reply failed: {e}");
                }
            }
        });

        let enable = EnableParams::builder()
            .pattern(RequestPattern::builder().url_pattern("*").build())
            .build();
        if let Err(e) = page.execute(enable).await {
            intercept.abort();
            return Err(e.into());
        }

        Ok(Self { page, intercept })
    }

    async fn eval<T: DeserializeOwned>(&self, js: String) -> Result<T, ScrapeError> {
        self.page
            .evaluate(js)
            .await?
            .into_value::<T>()
            .map_err(|e| ScrapeError::Browser(format!("Unexpected script result: {e}")))
    }
}

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

#[async_trait]
impl BrowserPage for ChromePage {
    async fn goto(&self, url: &str) -> Result<(), ScrapeError> {
        self.page.goto(url).await?;
        Ok(())
    }

    async fn is_visible(&self, selector: &str) -> Result<bool, ScrapeError> {
        self.eval(format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return false;
                const rect = el.getBoundingClientRect();
                const style = window.getComputedStyle(el);
                return rect.width > 0 && rect.height > 0
                    && style.visibility !== 'hidden' && style.display !== 'none'
                    && !el.disabled;
            }})()"#,
            sel = js_string(selector)
        ))
        .await
    }

    async fn clear(&self, selector: &str) -> Result<(), ScrapeError> {
        let cleared: bool = self
            .eval(format!(
                r#"(() => {{
                    const el = document.querySelector({sel});
                    if (!el) return false;
                    el.value = '';
                    el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                    return true;
                }})()"#,
                sel = js_string(selector)
            ))
            .await?;
        if cleared {
            Ok(())
        } else {
            Err(ScrapeError::Browser(format!("`{selector}` vanished before clear")))
        }
    }

    async fn type_text(
        &self,
        selector: &str,
        text: &str,
        delay: Duration,
    ) -> Result<(), ScrapeError> {
        let element = self.page.find_element(selector).await?;
        element.focus().await?;
        for ch in text.chars() {
            element.type_str(ch.to_string()).await?;
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn press_enter(&self, selector: &str) -> Result<(), ScrapeError> {
        let element = self.page.find_element(selector).await?;
        element.focus().await?;
        element.press_key("Enter").await?;
        Ok(())
    }

    async fn texts(&self, selector: &str) -> Result<Vec<String>, ScrapeError> {
        self.eval(format!(
            "Array.from(document.querySelectorAll({sel})).map(el => (el.innerText || '').trim())",
            sel = js_string(selector)
        ))
        .await
    }

    async fn click(&self, selector: &str, index: usize) -> Result<(), ScrapeError> {
        let elements = self.page.find_elements(selector).await?;
        let element = elements.get(index).ok_or_else(|| {
            ScrapeError::Browser(format!("no element #{index} for `{selector}`"))
        })?;
        element.click().await?;
        Ok(())
    }

    async fn inner_html(&self, selector: &str) -> Result<Option<String>, ScrapeError> {
        let probe: HtmlProbe = self
            .eval(format!(
                r#"(() => {{
                    const el = document.querySelector({sel});
                    return el ? {{ found: true, html: el.innerHTML }} : {{ found: false, html: '' }};
                }})()"#,
                sel = js_string(selector)
            ))
            .await?;
        Ok(probe.found.then_some(probe.html))
    }

    async fn body_text(&self) -> Result<String, ScrapeError> {
        self.eval("document.body ? document.body.innerText : ''".to_string())
            .await
    }

    async fn set_content(&self, html: &str) -> Result<(), ScrapeError> {
        self.page.set_content(html).await?;
        Ok(())
    }

    async fn screenshot_png(&self) -> Result<Vec<u8>, ScrapeError> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build();
        Ok(self.page.screenshot(params).await?)
    }

    async fn close(self: Box<Self>) {
        self.intercept.abort();
        if let Err(e) = self.page.close().await {
            debug!("Page close error: {e}");
        }
    }
}
