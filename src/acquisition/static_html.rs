//! Static HTML fallback extractor.
//!
//! Pure-function last resort for environments without a browser runtime, or
//! when both browser strategies came up empty. No JS execution and no click
//! navigation, so recall is lower by design: a single page, whatever the
//! server sent.
//!
//! Two passes, best first: many vendors inline their full bootstrap payload
//! into the served HTML, so a script sweep recovers full fidelity without a
//! renderer; otherwise the rendered-page selector heuristics run against
//! the static parse tree.

use crate::acquisition::bootstrap::parse_bootstrap_blob;
use crate::acquisition::dom::scan_page;
use crate::types::{ExtractedForm, Strategy, MAIN_SECTION};
use regex::Regex;

/// Global variables the vendor assigns its bootstrap payload to, across
/// versions. Checked in order.
const BOOTSTRAP_GLOBALS: &[&str] = &["FB_PUBLIC_LOAD_DATA_", "PUBLIC_FORM_DATA"];

/// Extract whatever form structure the raw HTML carries.
pub fn extract_from_static_html(html: &str) -> ExtractedForm {
    let strategy = Strategy::StaticFetchFallback;

    // Pass 1: inlined bootstrap payload.
    if let Some(payload) = find_bootstrap_payload(html) {
        let parsed = parse_bootstrap_blob(&payload);
        if !parsed.questions.is_empty() {
            let mut form = parsed.into_form(strategy);
            backfill_metadata(&mut form, html);
            return form;
        }
    }

    // Pass 2: selector heuristics on the static tree.
    let scan = scan_page(html);
    let mut form = ExtractedForm::empty(strategy);
    form.title = scan.title;
    form.description = scan.description;
    for mut q in scan.questions {
        q.section_id = MAIN_SECTION.to_string();
        form.questions.push(q);
    }
    form
}

/// Fill empty title/description from the page metadata.
fn backfill_metadata(form: &mut ExtractedForm, html: &str) {
    if !form.title.is_empty() && !form.description.is_empty() {
        return;
    }
    let scan = scan_page(html);
    if form.title.is_empty() {
        form.title = scan.title;
    }
    if form.description.is_empty() {
        form.description = scan.description;
    }
}

/// Locate the vendor bootstrap assignment in inline script text and slice
/// out the JSON array it is assigned.
///
/// Regex finds the assignment head; the array itself is recovered by a
/// bracket-balancing scan because the payload nests too deep for any
/// pattern to match it whole.
pub(crate) fn find_bootstrap_payload(html: &str) -> Option<String> {
    for global in BOOTSTRAP_GLOBALS {
        let re = Regex::new(&format!(
            r"(?:var\s+|window\.)?{}\s*=\s*",
            regex::escape(global)
        ))
        .expect("bootstrap assignment regex is valid");

        if let Some(m) = re.find(html) {
            if let Some(payload) = balanced_array(&html[m.end()..]) {
                return Some(payload);
            }
        }
    }
    None
}

/// Take the leading balanced `[...]` from `text`, respecting string
/// literals and escapes.
fn balanced_array(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let start = text.find('[')?;
    // Only whitespace may sit between the `=` and the array.
    if !text[..start].trim().is_empty() {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..=i].to_string());
                }
            }
            _ => {}
        }
    }
    None
}
