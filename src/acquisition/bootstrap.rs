//! Parser for the vendor's in-page bootstrap payload.
//!
//! The form vendor embeds its entire form definition as one deeply nested,
//! weakly-typed JSON array that its own client renderer consumes. Nesting
//! depth varies by form version, by presence of sections, and by
//! pagination, so a fixed-path reader breaks across form instances. This
//! parser instead runs a bounded recursive search over the whole structure
//! and pattern-matches question-shaped nodes wherever they sit.
//!
//! All entry points are pure and synchronous: same blob in, same result out.

use crate::types::{
    Diagnostics, ExtractedForm, Question, QuestionKind, ScaleBounds, Section, Strategy,
    MAIN_SECTION,
};
use serde_json::Value;

/// Maximum recursion depth for the node search. Real blobs bottom out
/// around depth 6; anything deeper is hostile or corrupt input.
const MAX_BLOB_DEPTH: usize = 10;

/// Raw type codes above this are not identifiers but payload data.
const MAX_RAW_TYPE_CODE: u64 = 100;

/// Raw vendor code marking a section break rather than a question.
const RAW_SECTION_MARKER: u64 = 8;

/// Scale-disguise detection bounds: a choice list of 3 to 11 contiguous
/// integers is semantically a rating scale.
const DISGUISE_MIN_OPTIONS: usize = 3;
const DISGUISE_MAX_OPTIONS: usize = 11;

/// Everything recovered from one bootstrap blob.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedBlob {
    pub title: String,
    pub description: String,
    pub sections: Vec<Section>,
    pub questions: Vec<Question>,
    pub warnings: Vec<String>,
}

impl ParsedBlob {
    /// Promote the parse result to an [`ExtractedForm`] attributed to the
    /// given strategy. Blob warnings land in the diagnostics.
    pub fn into_form(self, strategy: Strategy) -> ExtractedForm {
        let mut diagnostics = Diagnostics::new(strategy);
        for w in self.warnings {
            diagnostics.warn(w);
        }
        ExtractedForm {
            title: self.title,
            description: self.description,
            sections: self.sections,
            questions: self.questions,
            source_id: crate::types::UNKNOWN_SOURCE.to_string(),
            diagnostics,
        }
    }
}

/// Accumulator threaded through the recursive search. Holds the section
/// cursor so parsing stays a pure fold over the input.
#[derive(Debug, Default)]
struct BlobCursor {
    current_section: Option<String>,
    markers_seen: u32,
    out: ParsedBlob,
}

/// Parse the raw bootstrap payload into form structure.
///
/// Unparseable JSON or a blob with zero recognizable question nodes yields
/// an empty question list — a legitimate "strategy produced nothing"
/// result, never an error.
pub fn parse_bootstrap_blob(raw: &str) -> ParsedBlob {
    match serde_json::from_str::<Value>(raw) {
        Ok(v) => parse_bootstrap_value(&v),
        Err(_) => ParsedBlob::default(),
    }
}

/// Same as [`parse_bootstrap_blob`] for a payload already materialized as a
/// JSON value (the in-page evaluation path).
pub fn parse_bootstrap_value(value: &Value) -> ParsedBlob {
    let mut cursor = BlobCursor::default();
    walk(value, 0, &mut cursor);
    cursor.out
}

/// Depth-first search for question-shaped nodes, bounded at
/// [`MAX_BLOB_DEPTH`]. Accepted nodes are not descended into.
fn walk(value: &Value, depth: usize, cursor: &mut BlobCursor) {
    if depth > MAX_BLOB_DEPTH {
        return;
    }

    match value {
        Value::Array(items) => {
            if let Some(node) = classify_node(items) {
                consume_node(node, cursor);
                return;
            }
            for item in items {
                walk(item, depth + 1, cursor);
            }
        }
        Value::String(s) if depth <= 3 => {
            // Shallow free-standing strings ahead of any question are the
            // form's own title and description.
            let trimmed = s.trim();
            if trimmed.is_empty() || trimmed.contains("://") || !cursor.out.questions.is_empty()
            {
                return;
            }
            if cursor.out.title.is_empty() {
                cursor.out.title = trimmed.to_string();
            } else if cursor.out.description.is_empty() {
                cursor.out.description = trimmed.to_string();
            }
        }
        _ => {}
    }
}

/// A node the search recognized.
enum BlobNode<'a> {
    Question {
        title: &'a str,
        raw_code: u64,
        payload: Option<&'a Vec<Value>>,
    },
    SectionMarker {
        id: Option<String>,
        title: &'a str,
        description: String,
    },
}

/// Pattern-match the loose question shape: length >= 4, element 0 a
/// non-null identifier, element 1 a non-empty string title, element 3 a
/// small non-negative integer raw type code. A matching node with the
/// section-marker code becomes a marker instead; markers tolerate a null
/// identifier (a generated token fills in).
fn classify_node(items: &[Value]) -> Option<BlobNode<'_>> {
    if items.len() < 4 {
        return None;
    }
    let title = items[1].as_str()?.trim();
    if title.is_empty() {
        return None;
    }
    let raw_code = items[3].as_u64()?;
    if raw_code >= MAX_RAW_TYPE_CODE {
        return None;
    }

    if raw_code == RAW_SECTION_MARKER {
        let id = match &items[0] {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        };
        let description = items
            .get(2)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        return Some(BlobNode::SectionMarker {
            id,
            title,
            description,
        });
    }

    if items[0].is_null() {
        return None;
    }
    Some(BlobNode::Question {
        title,
        raw_code,
        payload: items.get(4).and_then(|v| v.as_array()),
    })
}

fn consume_node(node: BlobNode<'_>, cursor: &mut BlobCursor) {
    match node {
        BlobNode::SectionMarker {
            id,
            title,
            description,
        } => {
            cursor.markers_seen += 1;
            let id = id.unwrap_or_else(|| format!("section_{}", cursor.markers_seen));
            cursor.out.sections.push(Section {
                id: id.clone(),
                title: title.to_string(),
                description,
                order: cursor.markers_seen,
            });
            cursor.current_section = Some(id);
        }
        BlobNode::Question {
            title,
            raw_code,
            payload,
        } => {
            let question = build_question(title, raw_code, payload, cursor);
            cursor.out.questions.push(question);
        }
    }
}

/// Map a raw vendor type code onto the canonical kind. Radio, dropdown,
/// checkbox, and grid variants all collapse to single-choice for this
/// system's purposes; any code outside the table defaults to short text.
pub fn map_raw_type(raw_code: u64) -> QuestionKind {
    match raw_code {
        0 => QuestionKind::ShortText,
        1 => QuestionKind::LongText,
        2 | 3 | 4 | 7 => QuestionKind::SingleChoice,
        5 => QuestionKind::Scale,
        9 => QuestionKind::Date,
        10 => QuestionKind::Time,
        _ => QuestionKind::ShortText,
    }
}

fn build_question(
    title: &str,
    raw_code: u64,
    payload: Option<&Vec<Value>>,
    cursor: &mut BlobCursor,
) -> Question {
    let mut kind = map_raw_type(raw_code);
    let entry = payload.and_then(|p| p.first()).and_then(|v| v.as_array());

    let options = entry
        .and_then(|e| e.get(1))
        .map(extract_options)
        .unwrap_or_default();
    let required = entry
        .and_then(|e| e.get(2))
        .map(is_truthy)
        .unwrap_or(false);
    let labels = entry.and_then(|e| e.get(3)).and_then(extract_label_pair);

    let mut scale = None;

    if kind == QuestionKind::Scale {
        // Explicit scale: bounds come from the numeric option run; the
        // label pair's position varies by raw variant and is often absent,
        // in which case both labels stay empty (no synthesized defaults).
        match scale_bounds_from_options(&options, None) {
            Some((low, high)) => {
                if labels.is_none() {
                    cursor
                        .out
                        .warnings
                        .push(format!("scale without labels: {title}"));
                }
                let (low_label, high_label) = labels.unwrap_or_default();
                scale = Some(ScaleBounds {
                    low,
                    high,
                    low_label,
                    high_label,
                });
            }
            None => {
                cursor
                    .out
                    .warnings
                    .push(format!("scale without numeric bounds: {title}"));
                kind = QuestionKind::SingleChoice;
            }
        }
    } else if matches!(kind, QuestionKind::SingleChoice | QuestionKind::ShortText)
        && !options.is_empty()
    {
        // Scale-disguise: a short contiguous integer run is a rating scale
        // the vendor rendered as a plain choice list.
        if let Some((low, high)) = scale_bounds_from_options(
            &options,
            Some((DISGUISE_MIN_OPTIONS, DISGUISE_MAX_OPTIONS)),
        ) {
            kind = QuestionKind::Scale;
            let (low_label, high_label) = labels.unwrap_or_default();
            scale = Some(ScaleBounds {
                low,
                high,
                low_label,
                high_label,
            });
        }
    }

    let options = if kind == QuestionKind::SingleChoice {
        options
    } else {
        Vec::new()
    };

    Question {
        title: title.to_string(),
        kind,
        required,
        options,
        scale,
        section_id: cursor
            .current_section
            .clone()
            .unwrap_or_else(|| MAIN_SECTION.to_string()),
    }
}

/// Option entries are either plain strings or single-element arrays whose
/// head is the option text.
fn extract_options(value: &Value) -> Vec<String> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Array(inner) => inner.first().and_then(|v| v.as_str()).map(String::from),
            _ => None,
        })
        .filter(|s| !s.trim().is_empty())
        .collect()
}

/// The required flag arrives as a bool or a 0/1 integer depending on the
/// blob version.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_u64().unwrap_or(0) != 0,
        _ => false,
    }
}

/// A two-element string array holding the low/high endpoint labels.
fn extract_label_pair(value: &Value) -> Option<(String, String)> {
    let items = value.as_array()?;
    if items.len() != 2 {
        return None;
    }
    let low = items[0].as_str()?.to_string();
    let high = items[1].as_str()?.to_string();
    Some((low, high))
}

/// Parse all options as integers and require a contiguous ascending run.
/// `len_bounds` restricts the run length (used by disguise detection);
/// explicit scales only need two or more points. The DOM extractor reuses
/// this for its numeric-radiogroup check.
pub(crate) fn scale_bounds_from_options(
    options: &[String],
    len_bounds: Option<(usize, usize)>,
) -> Option<(i32, i32)> {
    let (min_len, max_len) = len_bounds.unwrap_or((2, usize::MAX));
    if options.len() < min_len || options.len() > max_len {
        return None;
    }

    let mut numbers = Vec::with_capacity(options.len());
    for opt in options {
        numbers.push(opt.trim().parse::<i32>().ok()?);
    }
    for pair in numbers.windows(2) {
        if pair[1] != pair[0] + 1 {
            return None;
        }
    }
    Some((numbers[0], *numbers.last()?))
}
