// Copyright 2026 Formscout Contributors
// SPDX-License-Identifier: Apache-2.0

//! Formscout — external-form extraction engine.
//!
//! Given a URL pointing at a third-party form product, produce a typed
//! [`ExtractedForm`] (title, sections, questions with kind/options/scale
//! metadata) without access to the vendor's API, degrading through three
//! strategies ordered by reliability: in-page bootstrap parse, rendered-DOM
//! scrape, static HTML fetch.

pub mod acquisition;
pub mod analytics;
pub mod error;
pub mod orchestrator;
pub mod renderer;
pub mod source_id;
pub mod types;

// Re-export the API surface callers actually hold.
pub use analytics::{ResponseScraper, ResponseSummary};
pub use error::{ExtractError, Result};
pub use orchestrator::{BrowserLauncher, ExtractorConfig, FormExtractor, ImportLookup};
pub use types::{
    Diagnostics, ExtractedForm, Question, QuestionKind, ScaleBounds, Section, Strategy,
    MAIN_SECTION, UNKNOWN_SOURCE,
};
