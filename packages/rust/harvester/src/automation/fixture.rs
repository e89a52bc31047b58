//! Recorded-fixture backend: answers scripts from canned per-page responses.
//!
//! A page is registered under its exact URL. On `evaluate`, the first
//! registered needle contained in the script text selects the response, so
//! tests key responses by the selector a script targets (e.g. `div.status`).
//! Navigating to an unregistered URL fails with a navigation error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use mangaroo_shared::{HarvestError, Result};

use super::AutomationSession;

#[derive(Debug, Clone)]
enum Response {
    Value(String),
    Error(String),
}

#[derive(Debug, Clone)]
struct Entry {
    needle: String,
    response: Response,
    once: bool,
}

/// Canned responses for one URL.
#[derive(Debug, Clone, Default)]
pub struct FixturePage {
    responses: Vec<Entry>,
}

impl FixturePage {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, needle: impl Into<String>, response: Response, once: bool) -> Self {
        self.responses.push(Entry {
            needle: needle.into(),
            response,
            once,
        });
        self
    }

    /// Answer scripts containing `needle` with `value`.
    pub fn respond(self, needle: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(needle, Response::Value(value.into()), false)
    }

    /// Answer the next script containing `needle` with `value`, then drop
    /// the response so later matches fall through to other entries.
    pub fn respond_once(self, needle: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(needle, Response::Value(value.into()), true)
    }

    /// Fail scripts containing `needle` with a script error.
    pub fn fail(self, needle: impl Into<String>, message: impl Into<String>) -> Self {
        self.push(needle, Response::Error(message.into()), false)
    }
}

/// Shared record of what a [`FixtureSession`] was asked to do.
#[derive(Debug, Clone, Default)]
pub struct FixtureHistory {
    inner: Arc<Mutex<HistoryInner>>,
}

#[derive(Debug, Default)]
struct HistoryInner {
    navigations: Vec<String>,
    pauses: Vec<Duration>,
    initializations: usize,
    releases: usize,
}

impl FixtureHistory {
    fn with<R>(&self, f: impl FnOnce(&mut HistoryInner) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut guard)
    }

    /// URLs navigated to, in order.
    pub fn navigations(&self) -> Vec<String> {
        self.with(|h| h.navigations.clone())
    }

    pub fn pauses(&self) -> Vec<Duration> {
        self.with(|h| h.pauses.clone())
    }

    pub fn initializations(&self) -> usize {
        self.with(|h| h.initializations)
    }

    /// Releases that actually tore down a live session.
    pub fn releases(&self) -> usize {
        self.with(|h| h.releases)
    }
}

/// [`AutomationSession`] that replays [`FixturePage`] responses.
#[derive(Debug, Default)]
pub struct FixtureSession {
    pages: HashMap<String, FixturePage>,
    current: Option<String>,
    initialized: bool,
    history: FixtureHistory,
}

impl FixtureSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the responses served for `url`.
    pub fn page(mut self, url: impl Into<String>, page: FixturePage) -> Self {
        self.pages.insert(url.into(), page);
        self
    }

    /// Handle for inspecting calls after the session has been moved.
    pub fn history(&self) -> FixtureHistory {
        self.history.clone()
    }
}

#[async_trait]
impl AutomationSession for FixtureSession {
    async fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            self.release().await;
        }
        self.initialized = true;
        self.history.with(|h| h.initializations += 1);
        Ok(())
    }

    async fn navigate(&mut self, url: &str) -> Result<()> {
        if !self.initialized {
            return Err(HarvestError::NotInitialized);
        }
        self.history.with(|h| h.navigations.push(url.to_string()));

        if !self.pages.contains_key(url) {
            self.current = None;
            return Err(HarvestError::navigation(url, "no fixture recorded"));
        }
        self.current = Some(url.to_string());
        Ok(())
    }

    async fn evaluate(&mut self, script: &str) -> Result<String> {
        if !self.initialized {
            return Err(HarvestError::NotInitialized);
        }
        let url = self
            .current
            .as_ref()
            .ok_or_else(|| HarvestError::script("no page loaded"))?;
        let page = self
            .pages
            .get_mut(url)
            .ok_or_else(|| HarvestError::script(format!("no fixture for {url}")))?;

        let position = page
            .responses
            .iter()
            .position(|entry| script.contains(entry.needle.as_str()))
            .ok_or_else(|| HarvestError::script(format!("no fixture response on {url}")))?;
        let response = if page.responses[position].once {
            page.responses.remove(position).response
        } else {
            page.responses[position].response.clone()
        };

        match response {
            Response::Value(value) => Ok(value),
            Response::Error(message) => Err(HarvestError::script(message)),
        }
    }

    async fn pause(&mut self, duration: Duration) {
        self.history.with(|h| h.pauses.push(duration));
    }

    async fn release(&mut self) {
        if !self.initialized {
            return;
        }
        self.initialized = false;
        self.current = None;
        self.history.with(|h| h.releases += 1);
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}
