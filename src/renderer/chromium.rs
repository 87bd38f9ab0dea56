//! Chromium driver built on chromiumoxide.

use super::{Driver, PageHandle};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Desktop Chrome user agent presented to the target site. Form vendors
/// serve a degraded no-JS shell to obvious bots.
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                          AppleWebKit/537.36 (KHTML, like Gecko) \
                          Chrome/131.0.0.0 Safari/537.36";

/// URL patterns blocked before navigation. None of these carry form
/// structure, and skipping them roughly halves page settle time.
const BLOCKED_RESOURCES: &[&str] = &[
    "*.png", "*.jpg", "*.jpeg", "*.gif", "*.webp", "*.svg", "*.ico",
    "*.css", "*.woff", "*.woff2", "*.ttf", "*.otf", "*.mp4", "*.webm",
];

/// Extra settle time after the navigation event, giving the vendor's client
/// renderer a chance to hydrate.
const SETTLE_AFTER_NAV: Duration = Duration::from_millis(500);

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    // 1. Explicit override
    if let Ok(p) = std::env::var("FORMSCOUT_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. A locally managed install
    if let Some(home) = dirs::home_dir() {
        let local = home.join(".formscout/chromium/chrome");
        if local.exists() {
            return Some(local);
        }
    }

    // 3. System PATH
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 4. Common macOS location
    if cfg!(target_os = "macos") {
        let common =
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Headless Chromium behind the [`Driver`] trait.
pub struct ChromiumDriver {
    browser: Mutex<Browser>,
    handler_task: JoinHandle<()>,
}

impl ChromiumDriver {
    /// Launch a headless Chromium instance with a realistic viewport.
    pub async fn launch() -> Result<Self> {
        let chrome_path = find_chromium().context("no Chromium binary found")?;

        let config = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .viewport(Viewport {
                width: 1366,
                height: 900,
                ..Default::default()
            })
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        Ok(Self {
            browser: Mutex::new(browser),
            handler_task,
        })
    }
}

#[async_trait]
impl Driver for ChromiumDriver {
    async fn open(&self) -> Result<Box<dyn PageHandle>> {
        let browser = self.browser.lock().await;
        let page = browser
            .new_page("about:blank")
            .await
            .context("failed to create page")?;

        page.set_user_agent(USER_AGENT)
            .await
            .context("failed to set user agent")?;

        // Resource blocking needs the Network domain enabled first.
        page.execute(network::EnableParams::default())
            .await
            .context("failed to enable network domain")?;
        let patterns: Vec<String> = BLOCKED_RESOURCES.iter().map(|s| s.to_string()).collect();
        page.execute(network::SetBlockedUrLsParams::new(patterns))
            .await
            .context("failed to block resource URLs")?;

        Ok(Box::new(ChromiumPage { page }))
    }

    async fn shutdown(&self) -> Result<()> {
        let mut browser = self.browser.lock().await;
        let _ = browser.close().await;
        self.handler_task.abort();
        Ok(())
    }
}

/// A single Chromium page.
pub struct ChromiumPage {
    page: Page,
}

#[async_trait]
impl PageHandle for ChromiumPage {
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<()> {
        let result = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.page.goto(url),
        )
        .await;

        match result {
            Ok(Ok(_)) => {
                let _ = self.page.wait_for_navigation().await;
                tokio::time::sleep(SETTLE_AFTER_NAV).await;
                Ok(())
            }
            Ok(Err(e)) => bail!("navigation failed: {e}"),
            Err(_) => bail!("navigation timed out after {timeout_ms}ms"),
        }
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .context("JS evaluation failed")?;

        result
            .into_value()
            .map_err(|e| anyhow::anyhow!("failed to convert JS result: {e:?}"))
    }

    async fn html(&self) -> Result<String> {
        let result = self
            .page
            .evaluate("document.documentElement.outerHTML")
            .await
            .context("failed to read HTML")?;

        result
            .into_value()
            .map_err(|e| anyhow::anyhow!("failed to convert HTML result: {e:?}"))
    }

    async fn current_url(&self) -> Result<String> {
        let url = self
            .page
            .url()
            .await
            .context("failed to read URL")?
            .map(|u| u.to_string())
            .unwrap_or_default();
        Ok(url)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let _ = self.page.close().await;
        Ok(())
    }
}
