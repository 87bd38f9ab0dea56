//! Extraction orchestrator.
//!
//! Runs the strategies in fixed priority order — in-page bootstrap parse,
//! rendered-DOM fallback, static fetch — and owns everything around them:
//! short-link resolution, source identity, the duplicate-import check,
//! browser lifecycle (guaranteed teardown on every exit path), warning
//! accumulation, and final normalization. Strategies run strictly
//! sequentially; only one needs to succeed.

use crate::acquisition::bootstrap::parse_bootstrap_value;
use crate::acquisition::dom::{
    extract_from_rendered_page_multipage, scan_page, MAX_FORM_PAGES,
};
use crate::acquisition::http_client::HttpClient;
use crate::acquisition::static_html::extract_from_static_html;
use crate::error::{ExtractError, Result, StrategyFailure};
use crate::renderer::chromium::ChromiumDriver;
use crate::renderer::{Driver, PageHandle};
use crate::source_id::{derive_source_id, is_short_link};
use crate::types::{ExtractedForm, Strategy, UNKNOWN_SOURCE};
use anyhow::Context;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Configuration surface of the extractor. The only policy knob callers are
/// expected to touch is `browser_enabled` — environments without a
/// sandboxed browser runtime turn it off and fall straight to static fetch.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Attempt the browser-automation strategies at all.
    pub browser_enabled: bool,
    /// Per-navigation timeout.
    pub nav_timeout_ms: u64,
    /// Timeout for plain HTTP fetches (static strategy, link resolution).
    pub http_timeout_ms: u64,
    /// Settle delay after clicking to the next form page.
    pub settle_ms: u64,
    /// Multi-page traversal bound, clamped to [`MAX_FORM_PAGES`].
    pub max_pages: u32,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            browser_enabled: true,
            nav_timeout_ms: 30_000,
            http_timeout_ms: 15_000,
            settle_ms: 1_500,
            max_pages: MAX_FORM_PAGES,
        }
    }
}

/// Duplicate-import check, owned by the persistence layer.
///
/// Must behave as an idempotent read: the orchestrator queries it exactly
/// once per extraction, before any strategy runs. Two concurrent
/// extractions of the same source can still race ahead of persistence;
/// that window is accepted and not closed here.
#[async_trait]
pub trait ImportLookup: Send + Sync {
    async fn find_existing_import(&self, source_id: &str) -> anyhow::Result<bool>;
}

/// Launches a browser driver for one extraction call.
///
/// The session is ephemeral by design — opened and torn down within a
/// single call, no reuse across calls. Tests inject a fake.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> anyhow::Result<Box<dyn Driver>>;
}

/// Production launcher: one fresh headless Chromium per call.
pub struct ChromiumLauncher;

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> anyhow::Result<Box<dyn Driver>> {
        let driver = ChromiumDriver::launch().await?;
        Ok(Box::new(driver))
    }
}

/// The entry point callers hold.
pub struct FormExtractor {
    config: ExtractorConfig,
    launcher: Arc<dyn BrowserLauncher>,
    lookup: Arc<dyn ImportLookup>,
    http: HttpClient,
}

impl FormExtractor {
    pub fn new(config: ExtractorConfig, lookup: Arc<dyn ImportLookup>) -> Self {
        let http = HttpClient::new(config.http_timeout_ms);
        Self {
            config,
            launcher: Arc::new(ChromiumLauncher),
            lookup,
            http,
        }
    }

    /// Replace the browser launcher (tests, alternative engines).
    pub fn with_launcher(mut self, launcher: Arc<dyn BrowserLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Extract the form behind `url`.
    pub async fn extract(&self, url: &str) -> Result<ExtractedForm> {
        self.extract_with_cancel(url, CancellationToken::new())
            .await
    }

    /// Extract with caller-initiated cancellation. An in-flight browser
    /// step is abandoned at its next suspension point and the browser is
    /// still closed.
    pub async fn extract_with_cancel(
        &self,
        url: &str,
        cancel: CancellationToken,
    ) -> Result<ExtractedForm> {
        let input = parse_form_url(url)?;
        let resolved = self.resolve_input(input).await;
        let source_id = derive_source_id(&resolved);
        let mut warnings: BTreeSet<String> = BTreeSet::new();

        info!("extracting {resolved} (source_id={source_id})");

        // Duplicate check runs once, before any strategy.
        if source_id == UNKNOWN_SOURCE {
            warnings.insert("no stable source id; duplicate check skipped".to_string());
        } else {
            match self.lookup.find_existing_import(&source_id).await {
                Ok(true) => {
                    return Err(ExtractError::AlreadyImported { source_id });
                }
                Ok(false) => {}
                Err(e) => return Err(ExtractError::Lookup(e.into())),
            }
        }

        // Strategies 1+2 share one browser session.
        if self.config.browser_enabled {
            match self.launcher.launch().await {
                Err(e) => {
                    warn!("browser launch failed, falling back to static fetch: {e}");
                    warnings.insert(
                        StrategyFailure::AutomationUnavailable(e).warning("browser"),
                    );
                }
                Ok(driver) => {
                    let outcome = self
                        .run_browser_strategies(driver.as_ref(), &resolved, &cancel, &mut warnings)
                        .await;
                    // Teardown happens before anything else, success or not.
                    if let Err(e) = driver.shutdown().await {
                        debug!("browser shutdown reported: {e}");
                    }
                    match outcome {
                        Ok(Some(form)) => {
                            return Ok(self.finalize(form, &source_id, warnings));
                        }
                        Ok(None) => {}
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        // Strategy 3: static fetch, the last resort. Its result stands even
        // when empty.
        if cancel.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }
        match self.run_static_fetch(resolved.as_str(), &cancel).await {
            Ok(mut form) => {
                if form.questions.is_empty() {
                    warn!("static fetch recovered no questions for {resolved}");
                    form.diagnostics
                        .warn("final strategy produced zero questions");
                }
                Ok(self.finalize(form, &source_id, warnings))
            }
            Err(ExtractError::StrategyExhausted { url, warnings: w }) => {
                warnings.extend(w);
                Err(ExtractError::StrategyExhausted { url, warnings })
            }
            Err(e) => Err(e),
        }
    }

    /// Resolve short links before deriving identity. Resolution failures
    /// are non-fatal; the original URL is kept.
    async fn resolve_input(&self, input: Url) -> Url {
        if !is_short_link(&input) {
            return input;
        }
        match self
            .http
            .resolve_redirects(input.as_str(), self.config.http_timeout_ms)
            .await
        {
            Ok(resolved) => Url::parse(&resolved).unwrap_or(input),
            Err(e) => {
                warn!("short link resolution failed for {input}: {e}");
                input
            }
        }
    }

    /// Strategies 1 and 2 against one live page. `Ok(None)` means both came
    /// up short (recorded in `warnings`); the caller moves on to static
    /// fetch. The page is closed on every path.
    async fn run_browser_strategies(
        &self,
        driver: &dyn Driver,
        url: &Url,
        cancel: &CancellationToken,
        warnings: &mut BTreeSet<String>,
    ) -> Result<Option<ExtractedForm>> {
        let mut page = match driver.open().await {
            Ok(p) => p,
            Err(e) => {
                warnings.insert(StrategyFailure::AutomationUnavailable(e).warning("browser"));
                return Ok(None);
            }
        };

        let result = self
            .browser_strategies_inner(page.as_mut(), url, cancel, warnings)
            .await;
        if let Err(e) = page.close().await {
            debug!("page close reported: {e}");
        }
        result
    }

    async fn browser_strategies_inner(
        &self,
        page: &mut dyn PageHandle,
        url: &Url,
        cancel: &CancellationToken,
        warnings: &mut BTreeSet<String>,
    ) -> Result<Option<ExtractedForm>> {
        let nav = with_cancel(cancel, page.navigate(url.as_str(), self.config.nav_timeout_ms))
            .await?;
        if let Err(e) = nav {
            // Both browser strategies need the page; neither can run.
            warnings.insert(StrategyFailure::Failed(e).warning("browser navigation"));
            return Ok(None);
        }

        // Strategy 1: evaluate the vendor bootstrap global and parse it.
        match with_cancel(cancel, self.fetch_bootstrap_form(&*page)).await? {
            Ok(Some(form)) => {
                info!("bootstrap parse recovered {} questions", form.questions.len());
                return Ok(Some(form));
            }
            Ok(None) => {
                debug!("bootstrap parse found nothing usable");
                warnings
                    .insert(StrategyFailure::Empty.warning(Strategy::BrowserRuntimeParse.name()));
            }
            Err(e) => {
                warn!("bootstrap parse failed: {e}");
                warnings.insert(
                    StrategyFailure::Failed(e).warning(Strategy::BrowserRuntimeParse.name()),
                );
            }
        }

        // Strategy 2: scrape the rendered DOM, traversing client-side pages.
        match with_cancel(
            cancel,
            extract_from_rendered_page_multipage(
                &*page,
                self.config.settle_ms,
                self.config.max_pages,
            ),
        )
        .await?
        {
            Ok(form) if !form.questions.is_empty() => {
                info!(
                    "DOM fallback recovered {} questions across {} pages",
                    form.questions.len(),
                    form.diagnostics.pages_traversed
                );
                Ok(Some(form))
            }
            Ok(_) => {
                warnings
                    .insert(StrategyFailure::Empty.warning(Strategy::BrowserDomFallback.name()));
                Ok(None)
            }
            Err(e) => {
                warn!("DOM fallback failed: {e}");
                warnings
                    .insert(StrategyFailure::Failed(e).warning(Strategy::BrowserDomFallback.name()));
                Ok(None)
            }
        }
    }

    /// Evaluate the vendor bootstrap global in-page and parse it. `None`
    /// when the global is absent or yields no questions.
    async fn fetch_bootstrap_form(
        &self,
        page: &dyn PageHandle,
    ) -> anyhow::Result<Option<ExtractedForm>> {
        const GLOBALS: &[&str] = &["FB_PUBLIC_LOAD_DATA_", "PUBLIC_FORM_DATA"];
        let names = serde_json::to_string(GLOBALS).expect("globals serialize");
        let script = format!(
            r#"(() => {{
                for (const name of {names}) {{
                    const v = window[name];
                    if (Array.isArray(v)) return v;
                }}
                return null;
            }})()"#
        );

        let value = page.evaluate(&script).await?;
        if value.is_null() {
            return Ok(None);
        }

        let parsed = parse_bootstrap_value(&value);
        if parsed.questions.is_empty() {
            return Ok(None);
        }

        let mut form = parsed.into_form(Strategy::BrowserRuntimeParse);

        // The blob rarely carries presentable metadata; the rendered page does.
        if form.title.is_empty() || form.description.is_empty() {
            let html = page.html().await?;
            let scan = tokio::task::spawn_blocking(move || scan_page(&html))
                .await
                .context("page scan task failed")?;
            if form.title.is_empty() {
                form.title = scan.title;
            }
            if form.description.is_empty() {
                form.description = scan.description;
            }
        }

        Ok(Some(form))
    }

    /// Strategy 3: plain HTTP GET plus static parsing.
    async fn run_static_fetch(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<ExtractedForm> {
        let response = with_cancel(cancel, self.http.get(url, self.config.http_timeout_ms))
            .await?
            .map_err(|e| ExtractError::StrategyExhausted {
                url: url.to_string(),
                warnings: BTreeSet::from([format!("static-fetch-fallback: {e}")]),
            })?;

        if response.status >= 400 {
            return Err(ExtractError::StrategyExhausted {
                url: url.to_string(),
                warnings: BTreeSet::from([format!(
                    "static-fetch-fallback: HTTP {}",
                    response.status
                )]),
            });
        }

        let body = response.body;
        let form = tokio::task::spawn_blocking(move || extract_from_static_html(&body))
            .await
            .map_err(|e| ExtractError::StrategyExhausted {
                url: url.to_string(),
                warnings: BTreeSet::from([format!("static-fetch-fallback: {e}")]),
            })?;
        Ok(form)
    }

    /// Stamp identity, merge accumulated warnings, and enforce the model
    /// invariants. The returned value is final — no later mutation.
    fn finalize(
        &self,
        mut form: ExtractedForm,
        source_id: &str,
        warnings: BTreeSet<String>,
    ) -> ExtractedForm {
        form.source_id = source_id.to_string();
        for w in warnings {
            form.diagnostics.warn(w);
        }
        form.normalize();
        form
    }
}

/// Validate the input URL shape. Anything that is not absolute http(s) is a
/// caller error, not a strategy failure.
fn parse_form_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url).map_err(|_| ExtractError::InvalidSourceUrl {
        url: url.to_string(),
    })?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ExtractError::InvalidSourceUrl {
            url: url.to_string(),
        });
    }
    Ok(parsed)
}

/// Race a future against cancellation.
async fn with_cancel<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = T>,
) -> Result<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ExtractError::Cancelled),
        value = fut => Ok(value),
    }
}
