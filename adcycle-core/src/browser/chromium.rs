use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::BrowserSection;

use super::error::{PageError, PageResult};
use super::page::PageActor;
use super::timeout::ResolvedPolicy;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub const CAPTCHA_SELECTORS: [&str; 2] = [
    "iframe[src*='captcha-delivery.com']",
    "iframe[name^='a-'][src^='https://www.google.com/recaptcha/api2/anchor?']",
];

#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    settings: BrowserSection,
    policy: Arc<ResolvedPolicy>,
}

impl ChromiumLauncher {
    pub fn new(settings: BrowserSection, policy: Arc<ResolvedPolicy>) -> Self {
        Self { settings, policy }
    }

    pub async fn launch(&self) -> PageResult<ChromiumSession> {
        let config = self.build_chromium_config()?;
        info!(
            headless = self.settings.headless,
            sandbox = self.settings.sandbox,
            "launching Chromium instance"
        );
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| PageError::Launch(err.to_string()))?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "Chromium handler reported error");
                }
            }
        });
        Ok(ChromiumSession {
            browser,
            handler_task: Some(handler_task),
            policy: Arc::clone(&self.policy),
        })
    }

    fn build_chromium_config(&self) -> PageResult<ChromiumConfig> {
        let mut builder = ChromiumConfig::builder();
        if let Some(executable) = &self.settings.executable_path {
            builder = builder.chrome_executable(executable);
        }
        if let Some(user_data_dir) = &self.settings.user_data_dir {
            builder = builder.user_data_dir(user_data_dir);
        }
        if !self.settings.headless {
            builder = builder.with_head();
        }
        if !self.settings.sandbox {
            builder = builder.no_sandbox();
        }
        let mut args = vec![
            "--no-first-run".to_string(),
            "--disable-features=AutomationControlled".to_string(),
            "--password-store=basic".to_string(),
        ];
        args.extend(self.settings.arguments.iter().cloned());
        builder = builder.args(args);
        builder.build().map_err(PageError::Configuration)
    }
}

#[derive(Debug)]
pub struct ChromiumSession {
    browser: Browser,
    handler_task: Option<JoinHandle<()>>,
    policy: Arc<ResolvedPolicy>,
}

impl ChromiumSession {
    pub async fn new_actor(&self) -> PageResult<ChromiumPageActor> {
        let page = self.browser.new_page("about:blank").await?;
        Ok(ChromiumPageActor {
            page,
            policy: Arc::clone(&self.policy),
        })
    }

    pub async fn shutdown(mut self) -> PageResult<()> {
        info!("shutting down Chromium instance");
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "failed to close browser gracefully");
        }
        if let Some(handle) = self.handler_task.take() {
            handle.await?;
        }
        Ok(())
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        if let Some(handle) = &self.handler_task {
            if !handle.is_finished() {
                warn!("ChromiumSession dropped without explicit shutdown");
                handle.abort();
            }
        }
    }
}

/// [`PageActor`] backed by one Chromium tab.
#[derive(Debug, Clone)]
pub struct ChromiumPageActor {
    page: Page,
    policy: Arc<ResolvedPolicy>,
}

impl ChromiumPageActor {
    pub fn page(&self) -> &Page {
        &self.page
    }

    async fn wait_for(
        &self,
        selector: &str,
        key: &str,
    ) -> PageResult<chromiumoxide::element::Element> {
        let deadline = Instant::now() + self.policy.timeout(key);
        loop {
            match self.page.find_element(selector).await {
                Ok(element) => return Ok(element),
                Err(err) => {
                    if Instant::now() >= deadline {
                        debug!(selector, key, error = %err, "element did not appear");
                        return Err(PageError::NotFound {
                            selector: selector.to_string(),
                        });
                    }
                }
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn detect_captcha(&self) -> PageResult<()> {
        for selector in CAPTCHA_SELECTORS {
            if self.page.find_element(selector).await.is_ok() {
                let url = self.page.url().await?.unwrap_or_default();
                return Err(PageError::Captcha { url });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PageActor for ChromiumPageActor {
    async fn open(&self, url: &str) -> PageResult<()> {
        debug!(url, "opening page");
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(PageError::Configuration)?;
        self.page
            .goto(params)
            .await
            .map_err(|err| PageError::Navigation(err.to_string()))?;
        self.page
            .wait_for_navigation()
            .await
            .map_err(|err| PageError::Navigation(err.to_string()))?;
        self.detect_captcha().await
    }

    async fn find(&self, selector: &str, key: &str) -> PageResult<()> {
        self.wait_for(selector, key).await.map(|_| ())
    }

    async fn click(&self, selector: &str, key: &str) -> PageResult<()> {
        let element = self.wait_for(selector, key).await?;
        element.click().await?;
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str, key: &str) -> PageResult<()> {
        self.wait_for(selector, key).await?;
        let selector_literal = serde_json::to_string(selector)
            .map_err(|err| PageError::Unexpected(err.to_string()))?;
        let value_literal =
            serde_json::to_string(value).map_err(|err| PageError::Unexpected(err.to_string()))?;
        let script = format!(
            "(() => {{
                const el = document.querySelector({selector_literal});
                if (!el) return false;
                el.focus();
                el.value = {value_literal};
                el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return true;
            }})()"
        );
        let applied: bool = self
            .page
            .evaluate(script.as_str())
            .await?
            .into_value()
            .map_err(|err| PageError::Unexpected(format!("failed to read fill result: {err}")))?;
        if applied {
            Ok(())
        } else {
            Err(PageError::NotFound {
                selector: selector.to_string(),
            })
        }
    }

    async fn read_text(&self, selector: &str, key: &str) -> PageResult<String> {
        let element = self.wait_for(selector, key).await?;
        Ok(element.inner_text().await?.unwrap_or_default())
    }

    async fn current_url(&self) -> PageResult<String> {
        Ok(self.page.url().await?.unwrap_or_default())
    }
}
