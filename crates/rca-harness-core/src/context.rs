//! Prompt assembly under a token budget.
//!
//! [`assemble`] merges system instructions, recent history, retrieved
//! evidence, and the new user message into a [`Prompt`]. When the estimate
//! exceeds `max_tokens` it drops the oldest history turns first, then the
//! lowest-scored evidence. The new message is never cut, so the result can
//! still exceed the budget when the message alone does.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::chunk::estimate_tokens;
use crate::models::{ConversationTurn, EvidenceRef, RetrievalHit, RetrievalResult, Role};
use crate::summary::ReportSummary;

/// One chat message of an assembled prompt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

/// A provider-neutral prompt: one system message then alternating turns,
/// ending with the new user message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prompt {
    pub system: String,
    pub messages: Vec<PromptMessage>,
    /// Evidence that survived truncation, in rank order.
    pub evidence: Vec<EvidenceRef>,
}

impl Prompt {
    /// A prompt with a system instruction and one user message.
    pub fn single(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            messages: vec![PromptMessage {
                role: Role::User,
                content: user.into(),
            }],
            evidence: Vec::new(),
        }
    }

    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.system)
            + self
                .messages
                .iter()
                .map(|m| estimate_tokens(&m.content))
                .sum::<usize>()
    }
}

/// Fixed inputs of an assembly call.
#[derive(Debug, Clone)]
pub struct AssemblyOptions<'a> {
    pub system_instructions: &'a str,
    /// History window before budget truncation.
    pub max_history_turns: usize,
    /// Appended to the system message when no evidence is supplied.
    pub no_evidence_notice: Option<&'a str>,
    /// Report summaries by document id, rendered above the first hit of
    /// each document.
    pub summaries: Option<&'a BTreeMap<String, ReportSummary>>,
}

const EVIDENCE_HEADER: &str = "--- KNOWLEDGE BASE EVIDENCE ---";
const EVIDENCE_FOOTER: &str = "--- END OF EVIDENCE ---";

fn render_hit(hit: &RetrievalHit, summary: Option<&ReportSummary>) -> String {
    format!(
        "[source: {} | score: {:.2}]\n{}{}\n",
        hit.source_uri,
        hit.score,
        summary.map(ReportSummary::render).unwrap_or_default(),
        hit.text.trim()
    )
}

fn build_system(options: &AssemblyOptions<'_>, hits: &[&RetrievalHit]) -> String {
    let mut system = options.system_instructions.trim_end().to_string();
    if hits.is_empty() {
        if let Some(notice) = options.no_evidence_notice {
            system.push_str("\n\n");
            system.push_str(notice);
        }
        return system;
    }
    system.push_str("\n\n");
    system.push_str(EVIDENCE_HEADER);
    system.push('\n');
    let mut summarized = HashSet::new();
    for hit in hits {
        let summary = options
            .summaries
            .and_then(|s| s.get(&hit.document_id))
            .filter(|_| summarized.insert(hit.document_id.as_str()));
        system.push_str(&render_hit(hit, summary));
        system.push('\n');
    }
    system.push_str(EVIDENCE_FOOTER);
    system
}

/// Assemble a prompt within `max_tokens`.
pub fn assemble(
    history: &[ConversationTurn],
    evidence: &RetrievalResult,
    new_message: &str,
    max_tokens: usize,
    options: &AssemblyOptions<'_>,
) -> Prompt {
    let window_start = history.len().saturating_sub(options.max_history_turns);
    let mut turns: &[ConversationTurn] = &history[window_start..];
    // Kept in rank order; the lowest-scored hit is always last.
    let mut hits: Vec<&RetrievalHit> = evidence.hits.iter().collect();

    let fixed = estimate_tokens(new_message);
    let history_cost =
        |turns: &[ConversationTurn]| turns.iter().map(|t| estimate_tokens(&t.content)).sum::<usize>();

    let mut system = build_system(options, &hits);
    let mut total = fixed + estimate_tokens(&system) + history_cost(turns);

    while total > max_tokens && !turns.is_empty() {
        total -= estimate_tokens(&turns[0].content);
        turns = &turns[1..];
    }
    while total > max_tokens && !hits.is_empty() {
        hits.pop();
        system = build_system(options, &hits);
        total = fixed + estimate_tokens(&system) + history_cost(turns);
    }

    let mut messages: Vec<PromptMessage> = turns
        .iter()
        .map(|t| PromptMessage {
            role: t.role,
            content: t.content.clone(),
        })
        .collect();
    messages.push(PromptMessage {
        role: Role::User,
        content: new_message.to_string(),
    });

    Prompt {
        system,
        messages,
        evidence: hits
            .iter()
            .map(|h| EvidenceRef {
                source_uri: h.source_uri.clone(),
                chunk_id: h.chunk_id.clone(),
                score: h.score,
            })
            .collect(),
    }
}
