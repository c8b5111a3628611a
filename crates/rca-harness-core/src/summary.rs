//! Structured summary of an incident report.
//!
//! The indexer asks a generation model to condense each report into a
//! [`ReportSummary`]. The reply must be a single JSON object (optionally in
//! a fenced code block); [`parse_summary`] rejects anything else, and the
//! document is then indexed without a summary.

use serde::{Deserialize, Serialize};

use crate::intent::strip_code_fence;

/// Key facts of one report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub project_name: String,
    #[serde(default)]
    pub problems: Vec<String>,
    #[serde(default)]
    pub root_causes: Vec<String>,
    #[serde(default)]
    pub solutions: Vec<String>,
    #[serde(default)]
    pub lessons_learned: Vec<String>,
}

impl ReportSummary {
    pub fn is_empty(&self) -> bool {
        self.project_name.trim().is_empty()
            && self.problems.is_empty()
            && self.root_causes.is_empty()
            && self.solutions.is_empty()
            && self.lessons_learned.is_empty()
    }

    /// Evidence-section lines for this report. Empty lists are omitted.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.project_name.trim().is_empty() {
            out.push_str(&format!("Project: {}\n", self.project_name.trim()));
        }
        for (label, items) in [
            ("Problem summary", &self.problems),
            ("Identified root causes", &self.root_causes),
            ("Solutions applied", &self.solutions),
        ] {
            if !items.is_empty() {
                out.push_str(&format!("{}: {}\n", label, items.join("; ")));
            }
        }
        out
    }
}

/// System instruction for the summary call.
pub const SUMMARY_INSTRUCTIONS: &str = "You analyse root cause analysis (RCA) documents. \
Extract the key facts of the document you are given.\n\
\n\
Respond with a single JSON object and nothing else:\n\
{\"project_name\": \"<string>\", \"problems\": [\"...\"], \"root_causes\": [\"...\"], \
\"solutions\": [\"...\"], \"lessons_learned\": [\"...\"]}";

/// User content of the summary call: the document text, cut to at most
/// `max_chars` characters.
pub fn summary_request(text: &str, max_chars: usize) -> String {
    let excerpt = match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    };
    format!("Document content:\n\n{}", excerpt)
}

/// Strictly parse a summary reply. `None` when the reply is not the
/// expected object or carries no information.
pub fn parse_summary(reply: &str) -> Option<ReportSummary> {
    let body = strip_code_fence(reply.trim());
    let summary: ReportSummary = serde_json::from_str(body).ok()?;
    (!summary.is_empty()).then_some(summary)
}
