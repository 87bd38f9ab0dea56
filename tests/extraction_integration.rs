//! End-to-end orchestrator tests against fake collaborators.
//!
//! The browser is replaced by an in-memory page that serves canned HTML
//! snapshots and a canned bootstrap payload; the duplicate lookup counts
//! its calls. Static-fetch paths run against a wiremock HTTP server.

use assert_json_diff::assert_json_include;
use async_trait::async_trait;
use formscout::orchestrator::BrowserLauncher;
use formscout::renderer::{Driver, PageHandle};
use formscout::{
    ExtractError, ExtractorConfig, FormExtractor, ImportLookup, QuestionKind, ResponseScraper,
    Strategy, MAIN_SECTION,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FORM_URL: &str = "https://docs.example.com/forms/d/e/1FAIpQLSdT9TESTTOKEN/viewform";
const TOKEN: &str = "1FAIpQLSdT9TESTTOKEN";

// ── Fakes ────────────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
struct PageFixture {
    pages: Vec<String>,
    bootstrap: Option<Value>,
    /// The advance control never disappears (misbehaving page).
    never_done: bool,
}

struct FakePage {
    fixture: PageFixture,
    current: Mutex<usize>,
}

#[async_trait]
impl PageHandle for FakePage {
    async fn navigate(&mut self, _url: &str, _timeout_ms: u64) -> anyhow::Result<()> {
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> anyhow::Result<Value> {
        // Bootstrap-global probe from the runtime-parse strategy.
        if script.contains("window[name]") {
            return Ok(self.fixture.bootstrap.clone().unwrap_or(Value::Null));
        }

        // Next-control probe or click from the multi-page machine.
        let do_click = script.contains("doClick = true");
        let mut current = self.current.lock().unwrap();
        let has_next = self.fixture.never_done || *current + 1 < self.fixture.pages.len();
        if has_next && do_click && *current + 1 < self.fixture.pages.len() {
            *current += 1;
        }
        Ok(Value::Bool(has_next))
    }

    async fn html(&self) -> anyhow::Result<String> {
        let current = *self.current.lock().unwrap();
        Ok(self.fixture.pages[current].clone())
    }

    async fn current_url(&self) -> anyhow::Result<String> {
        Ok(FORM_URL.to_string())
    }

    async fn close(self: Box<Self>) -> anyhow::Result<()> {
        Ok(())
    }
}

struct FakeDriver {
    fixture: PageFixture,
}

#[async_trait]
impl Driver for FakeDriver {
    async fn open(&self) -> anyhow::Result<Box<dyn PageHandle>> {
        Ok(Box::new(FakePage {
            fixture: self.fixture.clone(),
            current: Mutex::new(0),
        }))
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

struct FakeLauncher {
    fixture: Option<PageFixture>,
    launches: AtomicUsize,
}

impl FakeLauncher {
    fn serving(fixture: PageFixture) -> Arc<Self> {
        Arc::new(Self {
            fixture: Some(fixture),
            launches: AtomicUsize::new(0),
        })
    }

    fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            fixture: None,
            launches: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self) -> anyhow::Result<Box<dyn Driver>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        match &self.fixture {
            Some(fixture) => Ok(Box::new(FakeDriver { fixture: fixture.clone() })),
            None => Err(anyhow::anyhow!("no browser runtime in this environment")),
        }
    }
}

struct FakeLookup {
    exists: bool,
    fail: bool,
    calls: AtomicUsize,
}

impl FakeLookup {
    fn returning(exists: bool) -> Arc<Self> {
        Arc::new(Self {
            exists,
            fail: false,
            calls: AtomicUsize::new(0),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            exists: false,
            fail: true,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ImportLookup for FakeLookup {
    async fn find_existing_import(&self, _source_id: &str) -> anyhow::Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(anyhow::anyhow!("lookup store offline"));
        }
        Ok(self.exists)
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────────────

fn fast_config() -> ExtractorConfig {
    ExtractorConfig {
        settle_ms: 0,
        ..ExtractorConfig::default()
    }
}

fn page_with_questions(titles: &[&str]) -> String {
    let items: String = titles
        .iter()
        .map(|t| {
            format!(
                r#"<div role="listitem"><div role="heading">{t}</div><input type="text"/></div>"#
            )
        })
        .collect();
    format!(
        r#"<html><head><title>Event Feedback</title></head><body>
        <div role="heading" aria-level="1">Event Feedback</div>{items}</body></html>"#
    )
}

fn bootstrap_with_two_questions() -> Value {
    json!([null, [
        ["q1", "Your name", null, 0, [["e", [], true]]],
        ["q2", "Overall rating", null, 2, [["e", [["1"], ["2"], ["3"], ["4"], ["5"]], false]]]
    ]])
}

// ── Strategy ordering ────────────────────────────────────────────────────────

#[tokio::test]
async fn bootstrap_parse_is_preferred() {
    let launcher = FakeLauncher::serving(PageFixture {
        pages: vec![page_with_questions(&["ignored dom question"])],
        bootstrap: Some(bootstrap_with_two_questions()),
        never_done: false,
    });
    let extractor = FormExtractor::new(fast_config(), FakeLookup::returning(false))
        .with_launcher(launcher);

    let form = extractor.extract(FORM_URL).await.expect("extraction succeeds");

    assert_eq!(form.diagnostics.strategy_used, Strategy::BrowserRuntimeParse);
    assert_eq!(form.questions.len(), 2);
    assert_eq!(form.questions[1].kind, QuestionKind::Scale);
    assert_eq!(form.source_id, TOKEN);
    // Blob had no title; the rendered page supplies it.
    assert_eq!(form.title, "Event Feedback");

    assert_json_include!(
        actual: serde_json::to_value(&form).unwrap(),
        expected: json!({
            "sourceId": TOKEN,
            "diagnostics": { "strategyUsed": "BROWSER_RUNTIME_PARSE" }
        })
    );
}

#[tokio::test]
async fn empty_bootstrap_falls_back_to_dom() {
    let launcher = FakeLauncher::serving(PageFixture {
        pages: vec![page_with_questions(&["Q1", "Q2", "Q3"])],
        bootstrap: None,
        never_done: false,
    });
    let extractor = FormExtractor::new(fast_config(), FakeLookup::returning(false))
        .with_launcher(launcher);

    let form = extractor.extract(FORM_URL).await.expect("extraction succeeds");

    assert_eq!(form.diagnostics.strategy_used, Strategy::BrowserDomFallback);
    assert_eq!(form.questions.len(), 3);
    assert!(form.sections.is_empty());
    assert_eq!(form.questions[0].section_id, MAIN_SECTION);
    assert!(form
        .diagnostics
        .warnings
        .iter()
        .any(|w| w.contains("browser-runtime-parse")));
}

#[tokio::test]
async fn multi_page_forms_become_page_sections() {
    let launcher = FakeLauncher::serving(PageFixture {
        pages: vec![
            page_with_questions(&["First page question"]),
            page_with_questions(&["Second page question"]),
        ],
        bootstrap: None,
        never_done: false,
    });
    let extractor = FormExtractor::new(fast_config(), FakeLookup::returning(false))
        .with_launcher(launcher);

    let form = extractor.extract(FORM_URL).await.expect("extraction succeeds");

    assert_eq!(form.diagnostics.pages_traversed, 2);
    assert_eq!(form.sections.len(), 2);
    assert_eq!(form.questions[0].section_id, "page_1");
    assert_eq!(form.questions[1].section_id, "page_2");
}

#[tokio::test]
async fn runaway_pagination_stops_at_the_bound() {
    let launcher = FakeLauncher::serving(PageFixture {
        pages: vec![page_with_questions(&["Sticky question"])],
        bootstrap: None,
        never_done: true,
    });
    let extractor = FormExtractor::new(fast_config(), FakeLookup::returning(false))
        .with_launcher(launcher);

    let form = extractor.extract(FORM_URL).await.expect("extraction succeeds");

    assert_eq!(form.diagnostics.pages_traversed, 20);
    assert!(form
        .diagnostics
        .warnings
        .iter()
        .any(|w| w.contains("20-page bound")));
}

// ── Duplicate detection ──────────────────────────────────────────────────────

#[tokio::test]
async fn duplicates_short_circuit_before_any_strategy() {
    let launcher = FakeLauncher::serving(PageFixture {
        pages: vec![page_with_questions(&["Q"])],
        bootstrap: Some(bootstrap_with_two_questions()),
        never_done: false,
    });
    let lookup = FakeLookup::returning(true);
    let extractor =
        FormExtractor::new(fast_config(), lookup.clone()).with_launcher(launcher.clone());

    let err = extractor.extract(FORM_URL).await.expect_err("must be duplicate");

    assert!(matches!(
        err,
        ExtractError::AlreadyImported { ref source_id } if source_id == TOKEN
    ));
    assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
    assert_eq!(launcher.launches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn lookup_failure_is_surfaced() {
    let extractor = FormExtractor::new(fast_config(), FakeLookup::failing())
        .with_launcher(FakeLauncher::unavailable());

    let err = extractor.extract(FORM_URL).await.expect_err("lookup failed");
    assert!(matches!(err, ExtractError::Lookup(_)));
}

// ── Static fallback ──────────────────────────────────────────────────────────

#[tokio::test]
async fn browser_unavailable_falls_back_to_static_fetch() {
    let server = MockServer::start().await;
    let form_path = format!("/forms/d/e/{TOKEN}/viewform");
    let html = format!(
        r#"<html><head><title>Offline Import</title></head><body>
        <script>var FB_PUBLIC_LOAD_DATA_ = {};</script></body></html>"#,
        bootstrap_with_two_questions()
    );
    Mock::given(method("GET"))
        .and(path(form_path.clone()))
        .respond_with(ResponseTemplate::new(200).set_body_string(html))
        .mount(&server)
        .await;

    let extractor = FormExtractor::new(fast_config(), FakeLookup::returning(false))
        .with_launcher(FakeLauncher::unavailable());

    let form = extractor
        .extract(&format!("{}{form_path}", server.uri()))
        .await
        .expect("static extraction succeeds");

    assert_eq!(form.diagnostics.strategy_used, Strategy::StaticFetchFallback);
    assert_eq!(form.questions.len(), 2);
    assert_eq!(form.source_id, TOKEN);
    assert!(form
        .diagnostics
        .warnings
        .iter()
        .any(|w| w.contains("browser unavailable")));
}

#[tokio::test]
async fn disabled_browser_never_launches() {
    let server = MockServer::start().await;
    let form_path = format!("/forms/d/e/{TOKEN}/viewform");
    Mock::given(method("GET"))
        .and(path(form_path.clone()))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(page_with_questions(&["Static question"])),
        )
        .mount(&server)
        .await;

    let launcher = FakeLauncher::serving(PageFixture::default());
    let config = ExtractorConfig {
        browser_enabled: false,
        ..fast_config()
    };
    let extractor =
        FormExtractor::new(config, FakeLookup::returning(false)).with_launcher(launcher.clone());

    let form = extractor
        .extract(&format!("{}{form_path}", server.uri()))
        .await
        .expect("static extraction succeeds");

    assert_eq!(launcher.launches.load(Ordering::SeqCst), 0);
    assert_eq!(form.questions.len(), 1);
}

#[tokio::test]
async fn empty_final_strategy_is_success_with_warning() {
    let server = MockServer::start().await;
    let form_path = format!("/forms/d/e/{TOKEN}/viewform");
    Mock::given(method("GET"))
        .and(path(form_path.clone()))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body></body></html>"))
        .mount(&server)
        .await;

    let extractor = FormExtractor::new(fast_config(), FakeLookup::returning(false))
        .with_launcher(FakeLauncher::unavailable());

    let form = extractor
        .extract(&format!("{}{form_path}", server.uri()))
        .await
        .expect("empty result is still a success");

    assert!(form.questions.is_empty());
    assert!(form
        .diagnostics
        .warnings
        .iter()
        .any(|w| w.contains("zero questions")));
}

#[tokio::test]
async fn http_failure_exhausts_the_ladder() {
    let server = MockServer::start().await;
    let form_path = format!("/forms/d/e/{TOKEN}/viewform");
    Mock::given(method("GET"))
        .and(path(form_path.clone()))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let extractor = FormExtractor::new(fast_config(), FakeLookup::returning(false))
        .with_launcher(FakeLauncher::unavailable());

    let err = extractor
        .extract(&format!("{}{form_path}", server.uri()))
        .await
        .expect_err("all strategies failed");

    match err {
        ExtractError::StrategyExhausted { warnings, .. } => {
            assert!(warnings.iter().any(|w| w.contains("HTTP 500")));
            assert!(warnings.iter().any(|w| w.contains("browser unavailable")));
        }
        other => panic!("expected StrategyExhausted, got {other:?}"),
    }
}

// ── Input validation and cancellation ────────────────────────────────────────

#[tokio::test]
async fn malformed_urls_are_rejected_up_front() {
    let extractor = FormExtractor::new(fast_config(), FakeLookup::returning(false))
        .with_launcher(FakeLauncher::unavailable());

    for bad in ["not a url", "ftp://example.com/form", "/relative/path"] {
        let err = extractor.extract(bad).await.expect_err("must reject");
        assert!(matches!(err, ExtractError::InvalidSourceUrl { .. }), "{bad}");
    }
}

#[tokio::test]
async fn cancellation_aborts_before_static_fetch() {
    let config = ExtractorConfig {
        browser_enabled: false,
        ..fast_config()
    };
    let extractor = FormExtractor::new(config, FakeLookup::returning(false))
        .with_launcher(FakeLauncher::unavailable());

    let token = CancellationToken::new();
    token.cancel();
    let err = extractor
        .extract_with_cancel(FORM_URL, token)
        .await
        .expect_err("cancelled");
    assert!(matches!(err, ExtractError::Cancelled));
}

// ── Response summary scraping ────────────────────────────────────────────────

#[tokio::test]
async fn response_summary_reads_counts() {
    let launcher = FakeLauncher::serving(PageFixture {
        pages: vec![
            "<html><body><div>128 responses</div></body></html>".to_string(),
        ],
        bootstrap: None,
        never_done: false,
    });
    let scraper = ResponseScraper::new(fast_config()).with_launcher(launcher);

    let summary = scraper
        .scrape("https://docs.example.com/forms/d/e/1FAIpQLSdT9TESTTOKEN/viewanalytics")
        .await
        .expect("scrape succeeds");

    assert_eq!(summary.response_count, 128);
    assert!(!summary.is_private);
    assert_eq!(summary.source_id, TOKEN);
}

#[tokio::test]
async fn permission_walled_summary_is_private_not_an_error() {
    let launcher = FakeLauncher::serving(PageFixture {
        pages: vec![
            "<html><body><h1>You need permission</h1></body></html>".to_string(),
        ],
        bootstrap: None,
        never_done: false,
    });
    let scraper = ResponseScraper::new(fast_config()).with_launcher(launcher);

    let summary = scraper
        .scrape("https://docs.example.com/forms/d/e/1FAIpQLSdT9TESTTOKEN/viewanalytics")
        .await
        .expect("private page is not an error");

    assert!(summary.is_private);
    assert_eq!(summary.response_count, 0);
}
