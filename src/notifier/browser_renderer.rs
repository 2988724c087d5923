//! Renders schedule fragments to PNG with the shared browser.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use minijinja::Environment;
use minijinja::context;

use crate::notifier::RenderError;
use crate::notifier::Renderer;
use crate::scrape::pool::PageSource;

const TEMPLATE: &str = "schedule.html";

/// Screenshots the fragment inside a small HTML page.
///
/// Pages come from the same [`PageSource`] as scraping, so rendering waits its
/// turn at the pool gate.
pub struct BrowserRenderer {
    pages: Arc<dyn PageSource>,
    jinja_env: Environment<'static>,
}

impl BrowserRenderer {
    pub fn new(pages: Arc<dyn PageSource>) -> Result<Self, RenderError> {
        let mut jinja_env = Environment::new();
        jinja_env.add_template(TEMPLATE, include_str!("../../assets/schedule.html"))?;
        Ok(Self { pages, jinja_env })
    }

    /// The full document that gets screenshotted.
    pub fn document(&self, html_fragment: &str) -> Result<String, RenderError> {
        let template = self.jinja_env.get_template(TEMPLATE)?;
        Ok(template.render(context! {
            fragment => html_fragment,
            generated_at => Utc::now().format("%d.%m.%Y %H:%M UTC").to_string(),
        })?)
    }
}

#[async_trait]
impl Renderer for BrowserRenderer {
    async fn render(&self, html_fragment: &str) -> Result<Vec<u8>, RenderError> {
        let document = self.document(html_fragment)?;
        let lease = self.pages.acquire_page().await?;
        let result = async {
            let page = lease.page()?;
            page.set_content(&document).await?;
            page.screenshot_png().await
        }
        .await;
        lease.release().await;
        Ok(result?)
    }
}
