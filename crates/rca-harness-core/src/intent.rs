//! Intent labels, the classification instruction, and its strict parser.
//!
//! The router asks a generation model for a single JSON object:
//!
//! ```json
//! {"label": "specialist_incident", "confidence": 0.87, "rationale": "..."}
//! ```
//!
//! [`parse_classification`] accepts exactly that shape (optionally inside a
//! fenced code block) and nothing else. Anything it cannot read becomes
//! [`Classification::Unparseable`], which [`resolve`] maps to
//! [`IntentLabel::GeneralQa`].

use serde::{Deserialize, Serialize};

use crate::models::{ConversationTurn, Role};

/// Pipeline a user turn is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentLabel {
    GeneralQa,
    SpecialistIncident,
}

impl IntentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentLabel::GeneralQa => "general_qa",
            IntentLabel::SpecialistIncident => "specialist_incident",
        }
    }

    /// Parse a label, accepting the older `technical_problem_solving` and
    /// `general_knowledge_query` names.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "general_qa" | "general_knowledge_query" => Some(IntentLabel::GeneralQa),
            "specialist_incident" | "technical_problem_solving" => {
                Some(IntentLabel::SpecialistIncident)
            }
            _ => None,
        }
    }
}

/// Routing decision for one turn. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IntentDecision {
    pub label: IntentLabel,
    /// In `[0, 1]`. `0.0` when the decision is the fallback default.
    pub confidence: f64,
}

impl IntentDecision {
    pub fn default_general() -> Self {
        Self {
            label: IntentLabel::GeneralQa,
            confidence: 0.0,
        }
    }
}

/// Result of parsing the model's classification output.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    GeneralQa { confidence: f64 },
    SpecialistIncident { confidence: f64 },
    Unparseable,
}

#[derive(Deserialize)]
struct RawClassification {
    label: String,
    confidence: f64,
    #[serde(default)]
    #[allow(dead_code)]
    rationale: Option<String>,
}

/// Strictly parse a classification reply.
pub fn parse_classification(text: &str) -> Classification {
    let body = strip_code_fence(text.trim());
    let raw: RawClassification = match serde_json::from_str(body) {
        Ok(raw) => raw,
        Err(_) => return Classification::Unparseable,
    };
    if !raw.confidence.is_finite() || !(0.0..=1.0).contains(&raw.confidence) {
        return Classification::Unparseable;
    }
    match IntentLabel::parse(&raw.label) {
        Some(IntentLabel::GeneralQa) => Classification::GeneralQa {
            confidence: raw.confidence,
        },
        Some(IntentLabel::SpecialistIncident) => Classification::SpecialistIncident {
            confidence: raw.confidence,
        },
        None => Classification::Unparseable,
    }
}

/// Turn a parsed classification into a decision, defaulting to
/// `general_qa` when unparseable or below `threshold`.
pub fn resolve(classification: &Classification, threshold: f64) -> IntentDecision {
    match *classification {
        Classification::SpecialistIncident { confidence } if confidence >= threshold => {
            IntentDecision {
                label: IntentLabel::SpecialistIncident,
                confidence,
            }
        }
        Classification::GeneralQa { confidence } if confidence >= threshold => IntentDecision {
            label: IntentLabel::GeneralQa,
            confidence,
        },
        _ => IntentDecision::default_general(),
    }
}

pub(crate) fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// System instruction for the classification call.
pub const CLASSIFIER_INSTRUCTIONS: &str = "You are a query routing system for an incident-report knowledge base. \
Classify the user's latest message into exactly one category.\n\
\n\
Categories:\n\
1. \"specialist_incident\": the user describes a live, ongoing technical problem, an error, or a system failure and wants a solution. \
Examples: \"The database is timing out again\", \"I'm getting 500 errors on the checkout page\", \"Our main VM just crashed\".\n\
2. \"general_qa\": the user asks a question about the knowledge base (\"how many...\", \"list...\", \"tell me about...\") or is having a general conversation.\n\
\n\
Respond with a single JSON object and nothing else:\n\
{\"label\": \"specialist_incident\" | \"general_qa\", \"confidence\": <number between 0 and 1>, \"rationale\": \"<one sentence>\"}";

/// Render the user content of the classification call: the last
/// `history_turns` turns followed by the message to classify.
pub fn classification_request(
    message: &str,
    history: &[ConversationTurn],
    history_turns: usize,
) -> String {
    let mut out = String::new();
    let start = history.len().saturating_sub(history_turns);
    if start < history.len() {
        out.push_str("Recent conversation:\n");
        for turn in &history[start..] {
            let who = match turn.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            out.push_str(&format!("{}: {}\n", who, turn.content));
        }
        out.push('\n');
    }
    out.push_str(&format!("Message to classify: \"{}\"", message));
    out
}
