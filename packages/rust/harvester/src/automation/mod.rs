//! Scriptable browser session abstraction.
//!
//! One [`AutomationSession`] models one active page. Backends:
//! - [`ChromeSession`]: headless Chromium over CDP
//! - [`FixtureSession`]: recorded responses, for deterministic tests

mod chrome;
mod fixture;

use std::time::Duration;

use async_trait::async_trait;
use mangaroo_shared::Result;

pub use chrome::{ChromeOptions, ChromeSession};
pub use fixture::{FixtureHistory, FixturePage, FixtureSession};

/// Capability set over a scriptable browser session.
///
/// `navigate` and `evaluate` fail with `HarvestError::NotInitialized` unless
/// `initialize` has succeeded and `release` has not been called since.
#[async_trait]
pub trait AutomationSession: Send {
    /// Start the session. Re-initializing releases the previous session first.
    async fn initialize(&mut self) -> Result<()>;

    /// Load `url` in the session's page.
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Evaluate `script` against the current document and render the result as text.
    async fn evaluate(&mut self, script: &str) -> Result<String>;

    /// Wait without touching the page.
    async fn pause(&mut self, duration: Duration);

    /// Tear the session down. Idempotent; failures are logged, never returned.
    async fn release(&mut self);

    fn is_initialized(&self) -> bool;
}

/// Render a script result as the text the extractor parses.
///
/// Strings come back verbatim, `null`/`undefined` as empty, numbers and
/// booleans via their display form, arrays and objects as JSON.
pub(crate) fn render_value(value: Option<&serde_json::Value>) -> String {
    match value {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(serde_json::Value::Bool(b)) => b.to_string(),
        Some(other) => other.to_string(),
    }
}
