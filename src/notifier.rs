//! Delivery of schedule changes to subscription owners.

use std::sync::Arc;

use async_trait::async_trait;
use log::info;
use log::warn;

use crate::entity::Address;
use crate::scrape::ScheduleFragment;
use crate::scrape::error::ScrapeError;

pub mod browser_renderer;

/// Discord rejects direct messages above this many characters.
pub const MESSAGE_LIMIT: usize = 2000;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DeliveryError {
    #[error("User {user_id} does not accept direct messages.")]
    Forbidden { user_id: u64 },

    #[error("User {user_id} is unknown.")]
    UnknownUser { user_id: u64 },

    #[error("Messaging gateway is rate limiting us.")]
    RateLimited,

    #[error("Messaging gateway error: {0}")]
    Gateway(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Failed to render template: {0}")]
    Template(#[from] minijinja::Error),

    #[error("Failed to capture page: {0}")]
    Capture(#[from] ScrapeError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Outbound direct messages.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageGateway: Send + Sync {
    async fn send_direct_message(
        &self,
        user_id: u64,
        text: &str,
        attachment: Option<Attachment>,
    ) -> Result<(), DeliveryError>;
}

/// Turns an HTML fragment into PNG bytes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, html_fragment: &str) -> Result<Vec<u8>, RenderError>;
}

pub struct Notifier {
    gateway: Arc<dyn MessageGateway>,
    renderer: Arc<dyn Renderer>,
}

impl Notifier {
    pub fn new(gateway: Arc<dyn MessageGateway>, renderer: Arc<dyn Renderer>) -> Self {
        info!("Initializing Notifier.");
        Self { gateway, renderer }
    }

    /// Sends `fragment` to `owner_id` once. Returns whether the message was delivered.
    ///
    /// A rendering failure downgrades the message to text; a delivery failure
    /// is logged and reported as `false`.
    pub async fn notify(&self, owner_id: u64, address: &Address, fragment: &ScheduleFragment) -> bool {
        let header = change_header(address);
        let (text, attachment) = match self.renderer.render(&fragment.html).await {
            Ok(bytes) => (
                header,
                Some(Attachment {
                    filename: "schedule.png".to_string(),
                    bytes,
                }),
            ),
            Err(e) => {
                warn!("Rendering schedule for {address} failed, sending text instead: {e}");
                (fallback_message(&header, &fragment.html), None)
            }
        };

        self.deliver(owner_id, address, &text, attachment).await
    }

    /// Tells `owner_id` that checks for `address` stopped after `failures` failed attempts.
    pub async fn notify_quarantined(&self, owner_id: u64, address: &Address, failures: u32) -> bool {
        let text = format!(
            "⚠️ **Перевірку графіку призупинено**\n📍 {address}\n\
             Не вдалося отримати графік {failures} разів поспіль. \
             Перевірте адресу (/stop, потім /start) або зверніться до адміністратора."
        );
        self.deliver(owner_id, address, &text, None).await
    }

    async fn deliver(
        &self,
        owner_id: u64,
        address: &Address,
        text: &str,
        attachment: Option<Attachment>,
    ) -> bool {
        match self
            .gateway
            .send_direct_message(owner_id, text, attachment)
            .await
        {
            Ok(()) => {
                info!("Notified user {owner_id} about {address}.");
                true
            }
            Err(e) => {
                warn!("Failed to notify user {owner_id} about {address}: {e}");
                false
            }
        }
    }
}

pub fn change_header(address: &Address) -> String {
    format!("🔔 **Оновлення графіку відключень**\n📍 {address}")
}

/// `header` followed by a markdown rendition of `html`, cut on a character
/// boundary so the whole message fits in [`MESSAGE_LIMIT`].
pub fn fallback_message(header: &str, html: &str) -> String {
    let budget = MESSAGE_LIMIT.saturating_sub(header.chars().count() + 2);
    let body: String = html2md::parse_html(html).trim().chars().take(budget).collect();
    format!("{header}\n\n{body}").chars().take(MESSAGE_LIMIT).collect()
}
