//! Common test utilities and fake implementations.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use outage_bot::config::RetryPolicy;
use outage_bot::config::ScraperConfig;
use outage_bot::entity::Address;
use outage_bot::notifier::Attachment;
use outage_bot::notifier::DeliveryError;
use outage_bot::notifier::MessageGateway;
use outage_bot::notifier::RenderError;
use outage_bot::notifier::Renderer;
use outage_bot::repository::Repository;
use outage_bot::scrape::FetchResult;
use outage_bot::scrape::ScheduleSource;
use outage_bot::scrape::error::ScrapeError;
use outage_bot::scrape::pool::BrowserPage;
use outage_bot::scrape::pool::PageGate;
use outage_bot::scrape::pool::PageLease;
use outage_bot::scrape::pool::PageSource;
use uuid::Uuid;

pub const TEST_ERROR_THRESHOLD: u32 = 5;

/// Sets up a temporary test database.
pub async fn setup_db() -> (Arc<Repository>, PathBuf) {
    let uuid = Uuid::new_v4();
    let db_path = std::env::temp_dir().join(format!("outage-bot-test-{}.db", uuid));
    let db_url = format!("sqlite://{}", db_path.to_str().unwrap());

    let db = Repository::new(&db_url, db_path.to_str().unwrap())
        .await
        .expect("Failed to create database")
        .with_error_threshold(TEST_ERROR_THRESHOLD);

    db.run_migrations().await.expect("Failed to run migrations");

    (Arc::new(db), db_path)
}

/// Cleans up the test database file.
pub async fn teardown_db(db_path: PathBuf) {
    if db_path.exists() {
        let _ = std::fs::remove_file(db_path);
    }
}

/// Scraper settings with every wait shortened to milliseconds.
#[allow(dead_code)]
pub fn fast_scraper_config() -> ScraperConfig {
    ScraperConfig {
        url: "https://outages.test/shutdowns".to_string(),
        retry: RetryPolicy {
            attempts: 2,
            delay: Duration::from_millis(5),
        },
        navigation_timeout: Duration::from_millis(200),
        settle_delay: Duration::ZERO,
        field_timeout: Duration::from_millis(30),
        autocomplete_timeout: Duration::from_millis(20),
        result_timeout: Duration::from_millis(30),
        keystroke_delay: Duration::ZERO,
        step_delay: Duration::ZERO,
        poll_interval: Duration::from_millis(5),
        min_fragment_len: 10,
        ..Default::default()
    }
}

// FAKE SCHEDULE SOURCE

/// Returns scripted results per address, in order.
#[derive(Default)]
#[allow(dead_code)]
pub struct FakeSource {
    scripted: Mutex<HashMap<Address, VecDeque<FetchResult>>>,
    calls: Mutex<Vec<Address>>,
}

#[allow(dead_code)]
impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the next result for `address`.
    pub fn push(&self, address: &Address, result: FetchResult) {
        self.scripted
            .lock()
            .unwrap()
            .entry(address.clone())
            .or_default()
            .push_back(result);
    }

    pub fn calls(&self) -> Vec<Address> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScheduleSource for FakeSource {
    async fn fetch(&self, address: &Address) -> FetchResult {
        self.calls.lock().unwrap().push(address.clone());
        self.scripted
            .lock()
            .unwrap()
            .get_mut(address)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| Err(ScrapeError::Browser(format!("nothing scripted for {address}"))))
    }

    fn name(&self) -> &str {
        "fake"
    }
}

// FAKE GATEWAY

#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(dead_code)]
pub struct SentMessage {
    pub user_id: u64,
    pub text: String,
    pub attachment: Option<Attachment>,
}

/// Records direct messages; can be switched to reject them.
#[derive(Default)]
#[allow(dead_code)]
pub struct FakeGateway {
    sent: Mutex<Vec<SentMessage>>,
    failing: AtomicBool,
}

#[allow(dead_code)]
impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every attempted message, including rejected ones.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageGateway for FakeGateway {
    async fn send_direct_message(
        &self,
        user_id: u64,
        text: &str,
        attachment: Option<Attachment>,
    ) -> Result<(), DeliveryError> {
        self.sent.lock().unwrap().push(SentMessage {
            user_id,
            text: text.to_string(),
            attachment,
        });
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeliveryError::Forbidden { user_id });
        }
        Ok(())
    }
}

// FAKE RENDERER

/// Renders every fragment to the same bytes.
#[derive(Default)]
#[allow(dead_code)]
pub struct FakeRenderer {
    rendered: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl FakeRenderer {
    pub const PNG: &'static [u8] = b"\x89PNG fake";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn rendered(&self) -> Vec<String> {
        self.rendered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn render(&self, html_fragment: &str) -> Result<Vec<u8>, RenderError> {
        self.rendered.lock().unwrap().push(html_fragment.to_string());
        Ok(Self::PNG.to_vec())
    }
}

// FAKE BROWSER

/// What the scripted schedule page shows.
///
/// Field selectors in `visible` can be typed into. Typing into a field listed
/// in `suggestions` makes those items appear under `.autocomplete-items div`
/// until one is clicked. `result` appears in `.discon-schedule-table` once the
/// form is submitted by a click or an enter.
#[derive(Clone, Default)]
#[allow(dead_code)]
pub struct FakeDom {
    pub visible: Vec<String>,
    pub suggestions: HashMap<String, Vec<String>>,
    pub result: Option<String>,
    pub body_text: String,
    pub load_delay: Duration,
}

#[allow(dead_code)]
impl FakeDom {
    pub const SUGGESTIONS: &'static str = ".autocomplete-items div";
    pub const RESULT: &'static str = ".discon-schedule-table";

    /// A form with the primary field ids, a submit button and no suggestions.
    pub fn standard_form() -> Self {
        Self {
            visible: vec![
                "input#city.form__input".to_string(),
                "input#street.form__input".to_string(),
                "input#house_num.form__input".to_string(),
                "button[type='submit']".to_string(),
            ],
            ..Default::default()
        }
    }

    pub fn with_result(mut self, html: &str) -> Self {
        self.result = Some(html.to_string());
        self
    }
}

#[derive(Default)]
struct PageState {
    focused: Option<String>,
    picked: Vec<String>,
    submitted: bool,
}

#[allow(dead_code)]
pub struct FakePage {
    dom: FakeDom,
    state: Mutex<PageState>,
    log: Arc<Mutex<Vec<String>>>,
    active: Arc<AtomicUsize>,
}

impl FakePage {
    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    fn showing_suggestions(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        match &state.focused {
            Some(field) if !state.picked.contains(field) => {
                self.dom.suggestions.get(field).cloned().unwrap_or_default()
            }
            _ => Vec::new(),
        }
    }

    fn result_visible(&self) -> bool {
        self.dom.result.is_some() && self.state.lock().unwrap().submitted
    }
}

#[async_trait]
impl BrowserPage for FakePage {
    async fn goto(&self, url: &str) -> Result<(), ScrapeError> {
        self.record(format!("goto {url}"));
        tokio::time::sleep(self.dom.load_delay).await;
        Ok(())
    }

    async fn is_visible(&self, selector: &str) -> Result<bool, ScrapeError> {
        if selector == FakeDom::RESULT {
            return Ok(self.result_visible());
        }
        Ok(self.dom.visible.iter().any(|s| s == selector))
    }

    async fn clear(&self, selector: &str) -> Result<(), ScrapeError> {
        self.record(format!("clear {selector}"));
        Ok(())
    }

    async fn type_text(
        &self,
        selector: &str,
        text: &str,
        _delay: Duration,
    ) -> Result<(), ScrapeError> {
        self.record(format!("type {selector} {text}"));
        self.state.lock().unwrap().focused = Some(selector.to_string());
        Ok(())
    }

    async fn press_enter(&self, selector: &str) -> Result<(), ScrapeError> {
        self.record(format!("enter {selector}"));
        self.state.lock().unwrap().submitted = true;
        Ok(())
    }

    async fn texts(&self, selector: &str) -> Result<Vec<String>, ScrapeError> {
        if selector == FakeDom::SUGGESTIONS {
            return Ok(self.showing_suggestions());
        }
        Ok(Vec::new())
    }

    async fn click(&self, selector: &str, index: usize) -> Result<(), ScrapeError> {
        if selector == FakeDom::SUGGESTIONS {
            let item = self.showing_suggestions().get(index).cloned();
            self.record(format!("pick {}", item.unwrap_or_default()));
            let mut state = self.state.lock().unwrap();
            if let Some(field) = state.focused.clone() {
                state.picked.push(field);
            }
            return Ok(());
        }
        self.record(format!("click {selector}"));
        self.state.lock().unwrap().submitted = true;
        Ok(())
    }

    async fn inner_html(&self, selector: &str) -> Result<Option<String>, ScrapeError> {
        if selector == FakeDom::RESULT && self.result_visible() {
            return Ok(self.dom.result.clone());
        }
        Ok(None)
    }

    async fn body_text(&self) -> Result<String, ScrapeError> {
        Ok(self.dom.body_text.clone())
    }

    async fn set_content(&self, html: &str) -> Result<(), ScrapeError> {
        self.record(format!("set_content {}", html.len()));
        Ok(())
    }

    async fn screenshot_png(&self) -> Result<Vec<u8>, ScrapeError> {
        Ok(FakeRenderer::PNG.to_vec())
    }

    async fn close(self: Box<Self>) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.record("close".to_string());
    }
}

/// Hands out [`FakePage`]s behind a real [`PageGate`].
#[allow(dead_code)]
pub struct FakePageSource {
    dom: FakeDom,
    gate: PageGate,
    log: Arc<Mutex<Vec<String>>>,
    active: Arc<AtomicUsize>,
    max_active: AtomicUsize,
    acquired: AtomicUsize,
}

#[allow(dead_code)]
impl FakePageSource {
    pub fn new(dom: FakeDom, concurrency: usize) -> Self {
        Self {
            dom,
            gate: PageGate::new(concurrency),
            log: Arc::new(Mutex::new(Vec::new())),
            active: Arc::new(AtomicUsize::new(0)),
            max_active: AtomicUsize::new(0),
            acquired: AtomicUsize::new(0),
        }
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Pages handed out so far.
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Highest number of pages open at the same time.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn gate(&self) -> &PageGate {
        &self.gate
    }
}

#[async_trait]
impl PageSource for FakePageSource {
    async fn acquire_page(&self) -> Result<PageLease, ScrapeError> {
        let permit = self.gate.enter().await?;
        self.acquired.fetch_add(1, Ordering::SeqCst);
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);

        let page = FakePage {
            dom: self.dom.clone(),
            state: Mutex::new(PageState::default()),
            log: self.log.clone(),
            active: self.active.clone(),
        };
        Ok(PageLease::new(Box::new(page), permit))
    }
}
