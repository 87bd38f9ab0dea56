//! Response-summary scraper.
//!
//! Applies the same strategy ladder as form extraction to a form's
//! response-summary page, but the payoff is much smaller: one aggregate
//! response count. Summary pages are frequently restricted to the form
//! owner, so a permission wall is an expected outcome reported via
//! `is_private`, never an error.

use crate::acquisition::http_client::HttpClient;
use crate::error::{ExtractError, Result};
use crate::orchestrator::{BrowserLauncher, ChromiumLauncher, ExtractorConfig};
use crate::source_id::derive_source_id;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// Phrases that mark an authentication or permission wall, lowercased.
/// Checked in order against the visible page text.
const PRIVATE_MARKERS: &[&str] = &[
    "you need permission",
    "request access",
    "sign in to continue",
    "this form can only be viewed by",
];

/// Aggregate view of a form's responses.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSummary {
    pub response_count: u64,
    /// The summary page required authentication; counts are unavailable,
    /// not zero.
    pub is_private: bool,
    pub source_id: String,
}

/// Scrapes response-summary pages.
pub struct ResponseScraper {
    config: ExtractorConfig,
    launcher: Arc<dyn BrowserLauncher>,
    http: HttpClient,
}

impl ResponseScraper {
    pub fn new(config: ExtractorConfig) -> Self {
        let http = HttpClient::new(config.http_timeout_ms);
        Self {
            config,
            launcher: Arc::new(ChromiumLauncher),
            http,
        }
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn BrowserLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Scrape the summary page behind `url`.
    pub async fn scrape(&self, url: &str) -> Result<ResponseSummary> {
        let parsed = Url::parse(url).map_err(|_| ExtractError::InvalidSourceUrl {
            url: url.to_string(),
        })?;
        let source_id = derive_source_id(&parsed);
        let mut warnings: BTreeSet<String> = BTreeSet::new();

        if self.config.browser_enabled {
            match self.scrape_rendered(parsed.as_str()).await {
                Ok(html) => {
                    let scan = read_summary(&html);
                    return Ok(scan.into_summary(source_id));
                }
                Err(e) => {
                    warn!("rendered summary scrape failed, trying static: {e}");
                    warnings.insert(format!("browser: {e}"));
                }
            }
        }

        let response = self
            .http
            .get(parsed.as_str(), self.config.http_timeout_ms)
            .await
            .map_err(|e| {
                warnings.insert(format!("static-fetch-fallback: {e}"));
                ExtractError::StrategyExhausted {
                    url: url.to_string(),
                    warnings: warnings.clone(),
                }
            })?;

        // Authentication shells are the permission-wall signal, not a fault.
        if response.status == 401 || response.status == 403 {
            return Ok(ResponseSummary {
                response_count: 0,
                is_private: true,
                source_id,
            });
        }
        if response.status >= 400 {
            warnings.insert(format!("static-fetch-fallback: HTTP {}", response.status));
            return Err(ExtractError::StrategyExhausted {
                url: url.to_string(),
                warnings,
            });
        }

        let scan = read_summary(&response.body);
        Ok(scan.into_summary(source_id))
    }

    /// Render the page and return its HTML, with guaranteed teardown.
    async fn scrape_rendered(&self, url: &str) -> anyhow::Result<String> {
        let driver = self.launcher.launch().await?;
        let result = async {
            let mut page = driver.open().await?;
            let nav = page.navigate(url, self.config.nav_timeout_ms).await;
            let html = match nav {
                Ok(()) => page.html().await,
                Err(e) => Err(e),
            };
            if let Err(e) = page.close().await {
                debug!("summary page close reported: {e}");
            }
            html
        }
        .await;
        if let Err(e) = driver.shutdown().await {
            debug!("summary browser shutdown reported: {e}");
        }
        result
    }
}

#[derive(Debug, Default)]
struct SummaryScan {
    count: Option<u64>,
    private: bool,
}

impl SummaryScan {
    fn into_summary(self, source_id: String) -> ResponseSummary {
        ResponseSummary {
            response_count: if self.private { 0 } else { self.count.unwrap_or(0) },
            is_private: self.private,
            source_id,
        }
    }
}

/// Pull the aggregate count (or the permission wall) out of summary HTML.
fn read_summary(html: &str) -> SummaryScan {
    let doc = Html::parse_document(html);
    let body_sel = Selector::parse("body").expect("selector is valid");
    let text = doc
        .select(&body_sel)
        .next()
        .map(|b| b.text().collect::<Vec<_>>().join(" "))
        .unwrap_or_default();
    let lower = text.to_lowercase();

    if PRIVATE_MARKERS.iter().any(|m| lower.contains(m)) {
        return SummaryScan {
            count: None,
            private: true,
        };
    }

    let count_re = Regex::new(r"([\d,]+)\s+responses?\b").expect("count regex is valid");
    let count = count_re
        .captures(&lower)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().replace(',', "").parse::<u64>().ok());

    SummaryScan {
        count,
        private: false,
    }
}
