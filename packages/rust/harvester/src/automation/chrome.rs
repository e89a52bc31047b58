//! Headless Chromium backend built on `chromiumoxide`.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use mangaroo_shared::{HarvestConfig, HarvestError, Result};

use super::{AutomationSession, render_value};

/// Launch options for [`ChromeSession`].
#[derive(Debug, Clone)]
pub struct ChromeOptions {
    pub user_agent: String,
    pub headless: bool,
    /// Upper bound for a single navigation or evaluation.
    pub timeout: Duration,
}

impl From<&HarvestConfig> for ChromeOptions {
    fn from(config: &HarvestConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            headless: config.headless,
            timeout: config.browser_timeout,
        }
    }
}

/// Live browser state, present only between `initialize` and `release`.
struct ChromeState {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

/// [`AutomationSession`] backed by a local Chromium process.
pub struct ChromeSession {
    options: ChromeOptions,
    state: Option<ChromeState>,
}

impl ChromeSession {
    pub fn new(options: ChromeOptions) -> Self {
        Self {
            options,
            state: None,
        }
    }

    fn page(&self) -> Result<&Page> {
        self.state
            .as_ref()
            .map(|state| &state.page)
            .ok_or(HarvestError::NotInitialized)
    }

    async fn launch(&self) -> std::result::Result<ChromeState, String> {
        let mut builder = BrowserConfig::builder()
            .request_timeout(self.options.timeout)
            .arg(format!("--user-agent={}", self.options.user_agent));
        if !self.options.headless {
            builder = builder.with_head();
        }
        let config = builder.build()?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| format!("browser launch failed: {e}"))?;

        // The CDP handler must be polled for the browser to make progress.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| format!("failed to open page: {e}"))?;

        Ok(ChromeState {
            browser,
            page,
            handler,
        })
    }
}

#[async_trait]
impl AutomationSession for ChromeSession {
    async fn initialize(&mut self) -> Result<()> {
        if self.state.is_some() {
            debug!("re-initializing chrome session");
            self.release().await;
        }

        match self.launch().await {
            Ok(state) => {
                info!(headless = self.options.headless, "chrome session started");
                self.state = Some(state);
                Ok(())
            }
            Err(message) => {
                error!(error = %message, "could not start chrome session");
                Err(HarvestError::NotInitialized)
            }
        }
    }

    async fn navigate(&mut self, url: &str) -> Result<()> {
        let timeout = self.options.timeout;
        let page = self.page()?;
        debug!(url, "navigating");

        match tokio::time::timeout(timeout, page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(HarvestError::navigation(url, e.to_string())),
            Err(_) => Err(HarvestError::navigation(
                url,
                format!("timed out after {}s", timeout.as_secs()),
            )),
        }
    }

    async fn evaluate(&mut self, script: &str) -> Result<String> {
        let timeout = self.options.timeout;
        let page = self.page()?;

        match tokio::time::timeout(timeout, page.evaluate(script)).await {
            Ok(Ok(result)) => Ok(render_value(result.value())),
            Ok(Err(e)) => Err(HarvestError::script(e.to_string())),
            Err(_) => Err(HarvestError::script(format!(
                "timed out after {}s",
                timeout.as_secs()
            ))),
        }
    }

    async fn pause(&mut self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    async fn release(&mut self) {
        let Some(mut state) = self.state.take() else {
            return;
        };

        if let Err(e) = state.browser.close().await {
            warn!(error = %e, "failed to close browser cleanly");
        }
        if let Err(e) = state.browser.wait().await {
            warn!(error = %e, "failed to reap browser process");
        }
        state.handler.abort();
        info!("chrome session released");
    }

    fn is_initialized(&self) -> bool {
        self.state.is_some()
    }
}
