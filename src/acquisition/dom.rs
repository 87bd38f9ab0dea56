//! Rendered-page extractor.
//!
//! Works against a live page through [`PageHandle`]: the rendered HTML is
//! snapshotted and parsed with `scraper`, while clicks for multi-page
//! traversal run in-page. The vendor ships different markup across versions
//! and locales, so every lookup is an ordered list of selector groups where
//! the first non-empty match wins — never a scoring system.
//!
//! `scraper` types are `!Send`; all parsing runs inside
//! `tokio::task::spawn_blocking` over an owned HTML string.

use crate::acquisition::bootstrap::scale_bounds_from_options;
use crate::renderer::PageHandle;
use crate::types::{
    Diagnostics, ExtractedForm, Question, QuestionKind, ScaleBounds, Section, Strategy,
    MAIN_SECTION, UNKNOWN_SOURCE,
};
use anyhow::{Context, Result};
use scraper::{ElementRef, Html, Selector};

/// Hard bound on multi-page traversal. A misbehaving page whose "next"
/// control never disappears must not navigate forever.
pub const MAX_FORM_PAGES: u32 = 20;

/// Question-container selector groups, newest vendor markup first.
const CONTAINER_SELECTORS: &[&str] = &[
    "div[role='listitem']",
    "div[data-params]",
    ".freebirdFormviewerComponentsQuestionBaseRoot",
    "form [class*='question']",
];

/// Title selectors tried inside each container.
const QUESTION_TITLE_SELECTORS: &[&str] = &[
    "[role='heading']",
    ".freebirdFormviewerComponentsQuestionBaseTitle",
    "label",
    "h1, h2, h3, h4",
];

/// Exact lowercased texts of the advance control on paginated forms.
const NEXT_CONTROL_LABELS: &[&str] = &["next", "continue"];

/// Everything scraped from one rendered page. The static-fetch extractor
/// reuses the same scan against un-rendered HTML.
#[derive(Debug, Clone, Default)]
pub(crate) struct PageScan {
    pub(crate) title: String,
    pub(crate) description: String,
    pub(crate) questions: Vec<Question>,
}

/// Extract a single rendered page.
pub async fn extract_from_rendered_page(ctx: &dyn PageHandle) -> Result<ExtractedForm> {
    let html = ctx.html().await?;
    let scan = tokio::task::spawn_blocking(move || scan_page(&html))
        .await
        .context("page scan task failed")?;
    Ok(assemble(vec![scan], false))
}

/// Extract a form that spans client-side pages.
///
/// State machine: on each page, read the DOM exactly once, then locate and
/// click a visible next/continue control. A successful click waits
/// `settle_ms` and moves to the next page; no control means done. The
/// traversal is forced done at `max_pages` regardless, with a warning.
pub async fn extract_from_rendered_page_multipage(
    ctx: &dyn PageHandle,
    settle_ms: u64,
    max_pages: u32,
) -> Result<ExtractedForm> {
    let max_pages = max_pages.min(MAX_FORM_PAGES).max(1);
    let mut scans: Vec<PageScan> = Vec::new();
    let mut hit_bound = false;

    loop {
        let html = ctx.html().await?;
        let scan = tokio::task::spawn_blocking(move || scan_page(&html))
            .await
            .context("page scan task failed")?;
        scans.push(scan);

        if scans.len() as u32 >= max_pages {
            // A still-visible next control at the bound means the page is
            // misbehaving; note it without clicking.
            hit_bound = next_control(ctx, false).await.unwrap_or(false);
            break;
        }

        match next_control(ctx, true).await {
            Ok(true) => {
                tokio::time::sleep(std::time::Duration::from_millis(settle_ms)).await;
            }
            Ok(false) => break,
            Err(e) => {
                tracing::warn!("next-control click failed on page {}: {e}", scans.len());
                break;
            }
        }
    }

    let mut form = assemble(scans, true);
    if hit_bound {
        form.diagnostics
            .warn(format!("page traversal stopped at the {max_pages}-page bound"));
    }
    Ok(form)
}

/// Find the first visible control whose exact lowercased text is a known
/// advance label, optionally clicking it. Returns whether one was found.
async fn next_control(ctx: &dyn PageHandle, click: bool) -> Result<bool> {
    let labels = serde_json::to_string(NEXT_CONTROL_LABELS).expect("labels serialize");
    let script = format!(
        r#"(() => {{
            const labels = {labels};
            const doClick = {click};
            const candidates = Array.from(document.querySelectorAll(
                "button, span[role='button'], div[role='button']"));
            for (const el of candidates) {{
                const text = (el.textContent || '').trim().toLowerCase();
                if (!labels.includes(text)) continue;
                const style = window.getComputedStyle(el);
                if (style.display === 'none' || style.visibility === 'hidden') continue;
                if (el.offsetParent === null) continue;
                if (doClick) el.click();
                return true;
            }}
            return false;
        }})()"#
    );

    let found = ctx.evaluate(&script).await?;
    Ok(found.as_bool().unwrap_or(false))
}

/// Fold per-page scans into one form. A single page keeps the implicit
/// default section; multiple pages become `page_<n>` sections.
fn assemble(scans: Vec<PageScan>, paginated: bool) -> ExtractedForm {
    let strategy = Strategy::BrowserDomFallback;
    let mut form = ExtractedForm::empty(strategy);
    form.source_id = UNKNOWN_SOURCE.to_string();
    form.diagnostics = Diagnostics::new(strategy);
    form.diagnostics.pages_traversed = scans.len() as u32;

    if let Some(first) = scans.first() {
        form.title = first.title.clone();
        form.description = first.description.clone();
    }

    let multi = paginated && scans.len() > 1;
    for (idx, scan) in scans.into_iter().enumerate() {
        let page_no = (idx + 1) as u32;
        let section_id = if multi {
            let id = format!("page_{page_no}");
            form.sections.push(Section {
                id: id.clone(),
                title: String::new(),
                description: String::new(),
                order: page_no,
            });
            id
        } else {
            MAIN_SECTION.to_string()
        };

        for mut q in scan.questions {
            q.section_id = section_id.clone();
            form.questions.push(q);
        }
    }

    form
}

// ── Synchronous HTML scanning ────────────────────────────────────────────────

fn sel(s: &str) -> Selector {
    Selector::parse(s).expect("selector is valid")
}

fn element_text(el: &ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").trim().to_string()
}

fn select_text(doc: &Html, selector: &str) -> Option<String> {
    doc.select(&sel(selector))
        .map(|el| element_text(&el))
        .find(|t| !t.is_empty())
}

fn select_attr(doc: &Html, selector: &str, attr: &str) -> Option<String> {
    doc.select(&sel(selector))
        .filter_map(|el| el.value().attr(attr))
        .map(|s| s.trim().to_string())
        .find(|t| !t.is_empty())
}

/// Parse one page's HTML into a [`PageScan`].
pub(crate) fn scan_page(html: &str) -> PageScan {
    let doc = Html::parse_document(html);

    let title = select_text(&doc, "div[role='heading'][aria-level='1']")
        .or_else(|| select_attr(&doc, "meta[property='og:title']", "content"))
        .or_else(|| select_text(&doc, "title"))
        .unwrap_or_default();

    let description = select_attr(&doc, "meta[name='description']", "content")
        .or_else(|| select_attr(&doc, "meta[property='og:description']", "content"))
        .unwrap_or_default();

    let mut questions = Vec::new();
    for group in CONTAINER_SELECTORS {
        let containers: Vec<ElementRef<'_>> = doc.select(&sel(group)).collect();
        if containers.is_empty() {
            continue;
        }
        for container in &containers {
            if let Some(q) = parse_container(&doc, container) {
                questions.push(q);
            }
        }
        // First selector group with any containers wins, even when some
        // containers turn out not to be questions.
        break;
    }

    PageScan {
        title,
        description,
        questions,
    }
}

/// Parse one question container, inferring the kind from the input
/// primitives it holds.
fn parse_container(doc: &Html, container: &ElementRef<'_>) -> Option<Question> {
    let mut title: Option<String> = None;
    for group in QUESTION_TITLE_SELECTORS {
        let selector = sel(group);
        title = container
            .select(&selector)
            .map(|el| element_text(&el))
            .find(|t| !t.is_empty());
        if title.is_some() {
            break;
        }
    }
    let title = title?;

    let required = container.select(&sel("[aria-required='true']")).next().is_some()
        || container.select(&sel("[required]")).next().is_some();

    let mut kind;
    let mut options: Vec<String> = Vec::new();
    let mut scale: Option<ScaleBounds> = None;

    if container.select(&sel("textarea")).next().is_some() {
        kind = QuestionKind::LongText;
    } else if container.select(&sel("input[type='date']")).next().is_some() {
        kind = QuestionKind::Date;
    } else if container.select(&sel("input[type='time']")).next().is_some() {
        kind = QuestionKind::Time;
    } else if let Some(select_el) = container.select(&sel("select")).next() {
        kind = QuestionKind::SingleChoice;
        options = select_el
            .select(&sel("option"))
            .map(|o| element_text(&o))
            .filter(|t| !t.is_empty() && !is_placeholder_option(t))
            .collect();
    } else if container.select(&sel("[role='radio'], input[type='radio']")).next().is_some()
        || container.select(&sel("[role='radiogroup']")).next().is_some()
    {
        options = collect_option_labels(doc, container, "[role='radio'], input[type='radio']", &title);
        let aria_scale = container
            .select(&sel("[role='radiogroup']"))
            .filter_map(|el| el.value().attr("aria-label"))
            .any(|l| l.to_lowercase().contains("scale"));

        match scale_bounds_from_options(&options, Some((3, 11))) {
            Some((low, high)) => {
                kind = QuestionKind::Scale;
                scale = Some(ScaleBounds {
                    low,
                    high,
                    low_label: String::new(),
                    high_label: String::new(),
                });
                options.clear();
            }
            None if aria_scale => {
                // Vendor marked it a linear scale but the labels are not a
                // clean numeric run; fall back to the option count.
                kind = QuestionKind::Scale;
                let high = options.len().max(2) as i32;
                scale = Some(ScaleBounds {
                    low: 1,
                    high,
                    low_label: options.first().cloned().unwrap_or_default(),
                    high_label: options.last().cloned().unwrap_or_default(),
                });
                options.clear();
            }
            None => kind = QuestionKind::SingleChoice,
        }
    } else if container
        .select(&sel("[role='checkbox'], input[type='checkbox']"))
        .next()
        .is_some()
    {
        kind = QuestionKind::SingleChoice;
        options = collect_option_labels(
            doc,
            container,
            "[role='checkbox'], input[type='checkbox']",
            &title,
        );
    } else {
        kind = QuestionKind::ShortText;
    }

    Some(Question {
        title,
        kind,
        required,
        options,
        scale,
        section_id: MAIN_SECTION.to_string(),
    })
}

/// Dropdown placeholder rows carry no answer value.
fn is_placeholder_option(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.starts_with("choose") || lower.starts_with("select") || lower == "-"
}

/// Associate a label with every choice input in the container.
///
/// Tried in order, first non-empty wins: direct `aria-label`,
/// `aria-labelledby` target text, `label[for=id]` text, the nearest
/// enclosing element's text with the question title stripped out, and
/// finally adjacent sibling text.
fn collect_option_labels(
    doc: &Html,
    container: &ElementRef<'_>,
    input_selector: &str,
    question_title: &str,
) -> Vec<String> {
    container
        .select(&sel(input_selector))
        .filter_map(|input| option_label(doc, &input, question_title))
        .collect()
}

fn option_label(
    doc: &Html,
    input: &ElementRef<'_>,
    question_title: &str,
) -> Option<String> {
    if let Some(label) = input.value().attr("aria-label") {
        let label = label.trim();
        if !label.is_empty() {
            return Some(label.to_string());
        }
    }

    if let Some(target) = input.value().attr("aria-labelledby") {
        if let Some(text) = text_of_id(doc, target) {
            return Some(text);
        }
    }

    if let Some(id) = input.value().attr("id") {
        if is_safe_id(id) {
            if let Some(text) = select_text(doc, &format!("label[for='{id}']")) {
                return Some(text);
            }
        }
    }

    if let Some(text) = enclosing_text(input, question_title) {
        return Some(text);
    }

    adjacent_text(input)
}

/// Ids are interpolated into a selector, so only plain tokens qualify.
fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn text_of_id(doc: &Html, id: &str) -> Option<String> {
    if !is_safe_id(id) {
        return None;
    }
    select_text(doc, &format!("[id='{id}']"))
}

/// Walk up a couple of ancestors looking for text that is not just the
/// question title repeated.
fn enclosing_text(input: &ElementRef<'_>, question_title: &str) -> Option<String> {
    let mut node = input.parent();
    for _ in 0..3 {
        let current = node?;
        if let Some(el) = ElementRef::wrap(current) {
            let text = element_text(&el).replace(question_title, "");
            let text = text.trim();
            if !text.is_empty() {
                return Some(text.to_string());
            }
        }
        node = current.parent();
    }
    None
}

/// Text node immediately following the input.
fn adjacent_text(input: &ElementRef<'_>) -> Option<String> {
    for sibling in input.next_siblings() {
        if let Some(text) = sibling.value().as_text() {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        if sibling.value().is_element() {
            break;
        }
    }
    None
}
