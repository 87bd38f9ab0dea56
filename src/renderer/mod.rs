//! Browser automation driver abstraction.
//!
//! The extraction strategies never talk to a browser engine directly; they
//! drive the [`PageHandle`] trait, so the blob parser and DOM extractor are
//! unit-testable against a fake page. The only real implementation is
//! Chromium via chromiumoxide ([`chromium::ChromiumDriver`]).

pub mod chromium;

use anyhow::Result;
use async_trait::async_trait;

/// A headless browser engine that can open page sessions.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Open a fresh page (tab). Fails when no browser runtime exists in the
    /// current environment — the automation-unavailable signal.
    async fn open(&self) -> Result<Box<dyn PageHandle>>;

    /// Tear the engine down. Must be safe to call on every exit path.
    async fn shutdown(&self) -> Result<()>;
}

/// One live page within a browser session.
#[async_trait]
pub trait PageHandle: Send + Sync {
    /// Navigate with a bounded timeout, then wait for the load to settle.
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<()>;

    /// Evaluate a JS expression in the page and return its JSON value.
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    /// Full rendered HTML of the current document.
    async fn html(&self) -> Result<String>;

    /// URL the page currently sits on (after client-side redirects).
    async fn current_url(&self) -> Result<String>;

    /// Close this page.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Stand-in driver for environments without a sandboxed browser runtime.
///
/// `open` always fails, which the orchestrator treats as automation being
/// unavailable and falls straight through to static fetch.
pub struct NoopDriver;

#[async_trait]
impl Driver for NoopDriver {
    async fn open(&self) -> Result<Box<dyn PageHandle>> {
        Err(anyhow::anyhow!("browser automation disabled"))
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}
