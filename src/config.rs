//! Environment configuration.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;
use crate::scrape::selectors::SelectorSet;

pub const DEFAULT_SCHEDULE_URL: &str = "https://www.dtek-krem.com.ua/ua/shutdowns";
pub const DEFAULT_ERROR_THRESHOLD: u32 = 5;

/// Which scraper implementation feeds the scheduler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScraperBackend {
    /// Headless Chromium filling the address form.
    #[default]
    Browser,
    /// Plain HTTP GET parsed with CSS selectors.
    Static,
}

impl FromStr for ScraperBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "browser" => Ok(Self::Browser),
            "static" => Ok(Self::Static),
            other => Err(format!("unknown scraper backend `{other}`")),
        }
    }
}

/// What happens to the stored fingerprint when a change could not be delivered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NotifyFailurePolicy {
    /// Store the new fingerprint anyway. The owner misses this change.
    #[default]
    Advance,
    /// Keep the old fingerprint so the next check re-detects the change.
    Retry,
}

impl FromStr for NotifyFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "advance" => Ok(Self::Advance),
            "retry" => Ok(Self::Retry),
            other => Err(format!("unknown notify failure policy `{other}`")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Features {
    pub schedule_watcher: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            schedule_watcher: true,
        }
    }
}

/// Scheduler loop pacing and policies.
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub check_interval: Duration,
    pub batch_size: u32,
    pub pause_between_checks: Duration,
    pub error_threshold: u32,
    pub notify_failure_policy: NotifyFailurePolicy,
    pub notify_on_quarantine: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(300),
            batch_size: 3,
            pause_between_checks: Duration::from_secs(5),
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            notify_failure_policy: NotifyFailurePolicy::Advance,
            notify_on_quarantine: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts per fetch, including the first one.
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 2,
            delay: Duration::from_secs(3),
        }
    }
}

/// Scraper and browser pool settings. Every wait in the fetch path is bounded by one of these.
#[derive(Clone, Debug)]
pub struct ScraperConfig {
    pub backend: ScraperBackend,
    pub url: String,
    pub selectors: SelectorSet,
    pub retry: RetryPolicy,

    pub navigation_timeout: Duration,
    /// Pause after navigation so the page scripts can attach to the form.
    pub settle_delay: Duration,
    pub field_timeout: Duration,
    pub autocomplete_timeout: Duration,
    pub result_timeout: Duration,
    pub keystroke_delay: Duration,
    /// Pause after picking a suggestion or submitting a field.
    pub step_delay: Duration,
    pub poll_interval: Duration,
    /// Result containers shorter than this are treated as not rendered yet.
    pub min_fragment_len: usize,

    pub browser_concurrency: usize,
    pub browser_idle_timeout: Duration,
    pub headless: bool,
    /// Chromium binary to launch. Autodetected when unset.
    pub chrome_executable: Option<PathBuf>,
    pub user_agent: String,
    pub language: String,
    /// URL substrings whose requests are aborted (analytics beacons and the like).
    pub blocked_url_markers: Vec<String>,

    /// Requests per minute allowed by the static backend.
    pub static_requests_per_minute: u32,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            backend: ScraperBackend::Browser,
            url: DEFAULT_SCHEDULE_URL.to_string(),
            selectors: SelectorSet::default(),
            retry: RetryPolicy::default(),
            navigation_timeout: Duration::from_secs(30),
            settle_delay: Duration::from_millis(1500),
            field_timeout: Duration::from_secs(5),
            autocomplete_timeout: Duration::from_secs(3),
            result_timeout: Duration::from_secs(15),
            keystroke_delay: Duration::from_millis(50),
            step_delay: Duration::from_millis(500),
            poll_interval: Duration::from_millis(100),
            min_fragment_len: 100,
            browser_concurrency: 1,
            browser_idle_timeout: Duration::from_secs(300),
            headless: true,
            chrome_executable: None,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            language: "uk-UA".to_string(),
            blocked_url_markers: ["analytics", "gtm", "facebook", "doubleclick"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            static_requests_per_minute: 12,
        }
    }
}

#[derive(Clone, Default)]
pub struct Config {
    pub discord_token: String,
    pub db_url: String,
    pub db_path: String,
    pub logs_path: PathBuf,
    pub admin_ids: Vec<u64>,
    pub features: Features,
    pub scheduler: SchedulerConfig,
    pub scraper: ScraperConfig,
}

impl Config {
    pub fn new() -> Self {
        Self {
            db_url: "sqlite://data/data.db".to_string(),
            db_path: "data/data.db".to_string(),
            logs_path: PathBuf::from("logs"),
            ..Default::default()
        }
    }

    /// Overrides defaults with values from the process environment.
    pub fn load(&mut self) -> Result<(), AppError> {
        self.discord_token = env::var("DISCORD_TOKEN").map_err(|_| AppError::MissingConfig {
            key: "DISCORD_TOKEN".to_string(),
        })?;
        self.db_url = env::var("DB_URL").unwrap_or(self.db_url.clone());
        self.db_path = env::var("DB_PATH").unwrap_or(self.db_path.clone());
        self.logs_path = env::var("LOGS_PATH")
            .map(PathBuf::from)
            .unwrap_or(self.logs_path.clone());
        self.admin_ids = parse_id_list(&env::var("ADMIN_IDS").unwrap_or_default())?;

        self.features.schedule_watcher =
            env_or("FEATURE_SCHEDULE_WATCHER", self.features.schedule_watcher)?;

        let scheduler = &mut self.scheduler;
        scheduler.check_interval = Duration::from_secs(env_or(
            "CHECK_INTERVAL_SECONDS",
            scheduler.check_interval.as_secs(),
        )?);
        scheduler.batch_size = env_or("MAX_CHECKS_PER_TICK", scheduler.batch_size)?;
        scheduler.pause_between_checks = Duration::from_secs(env_or(
            "CHECK_PAUSE_SECONDS",
            scheduler.pause_between_checks.as_secs(),
        )?);
        scheduler.error_threshold = env_or("ERROR_THRESHOLD", scheduler.error_threshold)?;
        scheduler.notify_failure_policy =
            env_or("NOTIFY_FAILURE_POLICY", scheduler.notify_failure_policy)?;
        scheduler.notify_on_quarantine =
            env_or("NOTIFY_ON_QUARANTINE", scheduler.notify_on_quarantine)?;

        let scraper = &mut self.scraper;
        scraper.backend = env_or("SCRAPER_BACKEND", scraper.backend)?;
        scraper.url = env::var("SCHEDULE_URL").unwrap_or(scraper.url.clone());
        scraper.browser_concurrency = env_or("BROWSER_CONCURRENCY", scraper.browser_concurrency)?;
        if let Ok(path) = env::var("CHROME_EXECUTABLE")
            && !path.trim().is_empty()
        {
            scraper.chrome_executable = Some(PathBuf::from(path.trim()));
        }
        scraper.browser_idle_timeout = Duration::from_secs(env_or(
            "BROWSER_IDLE_SECONDS",
            scraper.browser_idle_timeout.as_secs(),
        )?);

        self.validate()
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.scheduler.batch_size == 0 {
            return Err(AppError::ConfigurationError {
                msg: "MAX_CHECKS_PER_TICK must be at least 1".to_string(),
            });
        }
        if self.scheduler.error_threshold == 0 {
            return Err(AppError::ConfigurationError {
                msg: "ERROR_THRESHOLD must be at least 1".to_string(),
            });
        }
        if self.scraper.browser_concurrency == 0 {
            return Err(AppError::ConfigurationError {
                msg: "BROWSER_CONCURRENCY must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => parse_value(key, &raw),
        _ => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| AppError::ConfigurationError {
            msg: format!("Invalid value `{raw}` for {key}: {e}"),
        })
}

fn parse_id_list(raw: &str) -> Result<Vec<u64>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse_value::<u64>("ADMIN_IDS", s))
        .collect()
}
