//! Core data model for one extraction run.
//!
//! An [`ExtractedForm`] is a pure value: constructed once per extraction
//! call, normalized by the orchestrator, then handed to the caller who owns
//! persistence. Wire shape is `{ title, description, sections[],
//! questions[], sourceId, diagnostics }`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Sentinel section id used when a form has no explicit sections.
pub const MAIN_SECTION: &str = "main";

/// Source id used when no stable token could be derived from the URL.
pub const UNKNOWN_SOURCE: &str = "unknown";

/// Canonical question types. Source systems expose far more raw type codes
/// than this; every raw code maps onto this closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionKind {
    ShortText,
    LongText,
    SingleChoice,
    Scale,
    Date,
    Time,
}

/// Numeric-scale metadata, present only on [`QuestionKind::Scale`] questions.
///
/// Labels stay empty when the source exposes none — the consumer decides
/// whether to synthesize defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleBounds {
    pub low: i32,
    pub high: i32,
    pub low_label: String,
    pub high_label: String,
}

/// A single question in presentation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub title: String,
    pub kind: QuestionKind,
    pub required: bool,
    /// Unique, order-preserving; empty for non-choice kinds.
    pub options: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<ScaleBounds>,
    /// Foreign key into `sections`, or [`MAIN_SECTION`] when none exist.
    pub section_id: String,
}

/// An explicit form section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    pub title: String,
    pub description: String,
    /// 1-based presentation order.
    pub order: u32,
}

/// Which strategy produced the final result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    BrowserRuntimeParse,
    BrowserDomFallback,
    StaticFetchFallback,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::BrowserRuntimeParse => "browser-runtime-parse",
            Strategy::BrowserDomFallback => "browser-dom-fallback",
            Strategy::StaticFetchFallback => "static-fetch-fallback",
        }
    }
}

/// Operability data attached to every result. Not business data, but tests
/// and the import workflow assert on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    pub strategy_used: Strategy,
    pub pages_traversed: u32,
    pub warnings: BTreeSet<String>,
}

impl Diagnostics {
    pub fn new(strategy_used: Strategy) -> Self {
        Self {
            strategy_used,
            pages_traversed: 1,
            warnings: BTreeSet::new(),
        }
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.insert(message.into());
    }
}

/// Result of one extraction run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedForm {
    pub title: String,
    pub description: String,
    pub sections: Vec<Section>,
    pub questions: Vec<Question>,
    pub source_id: String,
    pub diagnostics: Diagnostics,
}

impl ExtractedForm {
    /// An empty form attributed to the given strategy.
    pub fn empty(strategy: Strategy) -> Self {
        Self {
            title: String::new(),
            description: String::new(),
            sections: Vec::new(),
            questions: Vec::new(),
            source_id: UNKNOWN_SOURCE.to_string(),
            diagnostics: Diagnostics::new(strategy),
        }
    }

    /// Enforce the model invariants in place, recording a warning for each
    /// repair: de-duplicate options, drop empty option entries, trim titles,
    /// flag choice questions that ended up with no options, and retag
    /// questions whose section id resolves to nothing.
    pub fn normalize(&mut self) {
        let known: BTreeSet<String> = self.sections.iter().map(|s| s.id.clone()).collect();
        let mut repairs: Vec<String> = Vec::new();

        for q in &mut self.questions {
            q.title = q.title.trim().to_string();

            let mut seen = BTreeSet::new();
            let mut deduped = Vec::with_capacity(q.options.len());
            for option in q.options.drain(..) {
                let trimmed = option.trim().to_string();
                if !trimmed.is_empty() && seen.insert(trimmed.clone()) {
                    deduped.push(trimmed);
                }
            }
            q.options = deduped;

            if q.kind == QuestionKind::SingleChoice && q.options.is_empty() {
                repairs.push(format!("choice question with no options: {}", q.title));
            }

            if q.section_id != MAIN_SECTION && !known.contains(&q.section_id) {
                repairs.push(format!(
                    "question tagged with unknown section {}: {}",
                    q.section_id, q.title
                ));
                q.section_id = MAIN_SECTION.to_string();
            }

            if let Some(scale) = &q.scale {
                if scale.low >= scale.high {
                    repairs.push(format!("degenerate scale bounds on: {}", q.title));
                    q.scale = None;
                    q.kind = QuestionKind::SingleChoice;
                }
            }
        }

        for r in repairs {
            self.diagnostics.warn(r);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(kind: QuestionKind, options: &[&str]) -> Question {
        Question {
            title: "  How was it?  ".to_string(),
            kind,
            required: false,
            options: options.iter().map(|s| s.to_string()).collect(),
            scale: None,
            section_id: MAIN_SECTION.to_string(),
        }
    }

    #[test]
    fn normalize_dedups_and_trims() {
        let mut form = ExtractedForm::empty(Strategy::BrowserRuntimeParse);
        form.questions
            .push(question(QuestionKind::SingleChoice, &["Yes", "Yes", "", "No"]));
        form.normalize();

        let q = &form.questions[0];
        assert_eq!(q.title, "How was it?");
        assert_eq!(q.options, vec!["Yes".to_string(), "No".to_string()]);
        assert!(form.diagnostics.warnings.is_empty());
    }

    #[test]
    fn normalize_flags_empty_choice() {
        let mut form = ExtractedForm::empty(Strategy::BrowserDomFallback);
        form.questions.push(question(QuestionKind::SingleChoice, &[]));
        form.normalize();

        assert_eq!(form.questions[0].kind, QuestionKind::SingleChoice);
        assert!(form
            .diagnostics
            .warnings
            .iter()
            .any(|w| w.contains("no options")));
    }

    #[test]
    fn normalize_retags_dangling_section() {
        let mut form = ExtractedForm::empty(Strategy::BrowserRuntimeParse);
        let mut q = question(QuestionKind::ShortText, &[]);
        q.section_id = "section_9".to_string();
        form.questions.push(q);
        form.normalize();

        assert_eq!(form.questions[0].section_id, MAIN_SECTION);
        assert_eq!(form.diagnostics.warnings.len(), 1);
    }

    #[test]
    fn normalize_drops_degenerate_scale() {
        let mut form = ExtractedForm::empty(Strategy::BrowserRuntimeParse);
        let mut q = question(QuestionKind::Scale, &["5", "5"]);
        q.scale = Some(ScaleBounds {
            low: 5,
            high: 5,
            low_label: String::new(),
            high_label: String::new(),
        });
        form.questions.push(q);
        form.normalize();

        assert_eq!(form.questions[0].kind, QuestionKind::SingleChoice);
        assert!(form.questions[0].scale.is_none());
    }

    #[test]
    fn wire_shape_is_camel_case() {
        let mut form = ExtractedForm::empty(Strategy::StaticFetchFallback);
        form.source_id = "abc123".to_string();
        let value = serde_json::to_value(&form).expect("serializes");

        assert_eq!(value["sourceId"], "abc123");
        assert_eq!(value["diagnostics"]["strategyUsed"], "STATIC_FETCH_FALLBACK");
        assert_eq!(value["diagnostics"]["pagesTraversed"], 1);
    }
}
