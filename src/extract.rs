use std::sync::LazyLock;

use regex::Regex;

/// How the reasoning segment was identified.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtractionOrigin {
    /// Enclosed in an explicit structural marker pair.
    Explicit,
    /// Matched a fallback pattern, or no structure was found at all.
    Heuristic,
}

/// The text identified as the model's intermediate reasoning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReasoningResult {
    pub text: String,
    pub origin: ExtractionOrigin,
}

static THINK_TAGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>(.*?)</think>").expect("valid regex"));

static LEAD_IN_PARAGRAPH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)let['’]?s think step by step[.:]?\s*(\S.*?)(?:\n[ \t]*\n|\z)")
        .expect("valid regex")
});

static STEP_LEAD_IN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)\bstep[ -]by[ -]step\b[.:,]?\s*(\S.*)").expect("valid regex"));

static ENUMERATED_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:\d+[.)]|[-*•])[ \t]+\S.*(?:\n[ \t]*(?:\d+[.)]|[-*•])[ \t]+\S.*)+")
        .expect("valid regex")
});

/// The fallback chain is an ordered contract: matchers run short-circuit,
/// first match wins, and the final fallthrough treats the whole text as
/// reasoning. Tests pin the ordering.
const HEURISTICS: [fn(&str) -> Option<String>; 3] =
    [lead_in_paragraph, step_lead_in, enumerated_run];

/// Isolate the reasoning portion of `text`. Total: absence of structure is
/// an expected case, not an error.
pub fn extract(text: &str) -> ReasoningResult {
    if let Some(caps) = THINK_TAGS.captures(text) {
        return ReasoningResult {
            text: caps[1].trim().to_string(),
            origin: ExtractionOrigin::Explicit,
        };
    }

    for heuristic in HEURISTICS {
        if let Some(span) = heuristic(text) {
            return ReasoningResult {
                text: span,
                origin: ExtractionOrigin::Heuristic,
            };
        }
    }

    ReasoningResult {
        text: text.to_string(),
        origin: ExtractionOrigin::Heuristic,
    }
}

/// "Let's think step by step" followed by a paragraph.
fn lead_in_paragraph(text: &str) -> Option<String> {
    LEAD_IN_PARAGRAPH
        .captures(text)
        .map(|caps| caps[1].trim().to_string())
}

/// A bare "step by step" lead-in and everything after it.
fn step_lead_in(text: &str) -> Option<String> {
    STEP_LEAD_IN
        .captures(text)
        .map(|caps| caps[1].trim().to_string())
}

/// A run of two or more enumerated or bulleted lines.
fn enumerated_run(text: &str) -> Option<String> {
    ENUMERATED_RUN
        .find(text)
        .map(|m| m.as_str().trim().to_string())
}
