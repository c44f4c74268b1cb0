//! Extraction of structured envelopes embedded in free-form assistant text.
//!
//! The model mixes prose with at most one meaningful JSON card per turn
//! (vehicle info, question set, task list, fault list, repair plan). This
//! module delimits candidates with the brace-aware scanner, parses them into
//! a closed tagged union, and splits the surrounding prose.

use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::{
    Fault, Question, QuestionAnswer, RepairData, Task, TaskFeedback, VehicleInfo,
};

mod partial;
pub mod scanner;


pub use partial::{parse_streaming_questions, parse_streaming_repair, parse_streaming_tasks};
pub use scanner::{scan_object, ScanResult};

/// A structured card embedded in assistant text. Parsing produces this
/// union, so rendering code pattern-matches exhaustively instead of probing
/// string keys. The optional `feedbacks`/`answers` fields are sideband data
/// written back by the client after the card was first rendered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    Vehicle {
        data: VehicleInfo,
    },
    Questions {
        data: Vec<Question>,
        #[serde(skip_serializing_if = "Option::is_none")]
        answers: Option<Vec<QuestionAnswer>>,
    },
    Tasks {
        data: Vec<Task>,
        #[serde(skip_serializing_if = "Option::is_none")]
        feedbacks: Option<Vec<TaskFeedback>>,
    },
    Faults {
        data: Vec<Fault>,
    },
    Repair {
        data: RepairData,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    Vehicle,
    Questions,
    Tasks,
    Faults,
    Repair,
}

impl EnvelopeKind {
    /// The exact prefix the model is instructed to emit for this card type.
    pub fn prefix(self) -> &'static str {
        match self {
            EnvelopeKind::Vehicle => r#"{"type":"vehicle""#,
            EnvelopeKind::Questions => r#"{"type":"questions""#,
            EnvelopeKind::Tasks => r#"{"type":"tasks""#,
            EnvelopeKind::Faults => r#"{"type":"faults""#,
            EnvelopeKind::Repair => r#"{"type":"repair""#,
        }
    }
}

impl Envelope {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Envelope::Vehicle { .. } => EnvelopeKind::Vehicle,
            Envelope::Questions { .. } => EnvelopeKind::Questions,
            Envelope::Tasks { .. } => EnvelopeKind::Tasks,
            Envelope::Faults { .. } => EnvelopeKind::Faults,
            Envelope::Repair { .. } => EnvelopeKind::Repair,
        }
    }
}

/// Result of scanning accumulated text for the active envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    /// Trimmed prose before the winning envelope (or the whole text when no
    /// envelope is present).
    pub before_text: String,
    /// Trimmed prose after the winning envelope.
    pub after_text: String,
    pub envelope: Option<Envelope>,
    /// Byte span of the winning envelope in the original text; the
    /// splice-back contract replaces exactly this range.
    pub span: Option<Range<usize>>,
}

fn envelope_start_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\{"type":\s*"(vehicle|questions|tasks|faults|repair)""#)
            .expect("static pattern")
    })
}

/// Scan `content` for every known envelope prefix, delimit each candidate
/// with the brace scanner, and keep the last syntactically complete one that
/// parses with a recognized `type` and a `data` field. Malformed candidates
/// are skipped, never an error. A trailing half-formed `{"type":` fragment
/// is suppressed from the prose so a broken blob never leaks into rendering.
pub fn extract_envelope(content: &str) -> Extracted {
    let mut winner: Option<(Envelope, Range<usize>)> = None;

    for m in envelope_start_re().find_iter(content) {
        let start = m.start();
        let end = match scan_object(content, start) {
            ScanResult::Complete(end) => end,
            ScanResult::Incomplete => continue,
        };
        match serde_json::from_str::<Envelope>(&content[start..end]) {
            Ok(envelope) => winner = Some((envelope, start..end)),
            Err(_) => continue,
        }
    }

    if let Some((envelope, span)) = winner {
        return Extracted {
            before_text: content[..span.start].trim().to_string(),
            after_text: content[span.end..].trim().to_string(),
            envelope: Some(envelope),
            span: Some(span),
        };
    }

    // No complete envelope. If a fragment has started arriving, everything
    // before it is prose and the fragment itself is hidden.
    if let Some(idx) = content.find(r#"{"type":"#) {
        return Extracted {
            before_text: content[..idx].trim().to_string(),
            after_text: String::new(),
            envelope: None,
            span: None,
        };
    }

    Extracted {
        before_text: content.trim().to_string(),
        after_text: String::new(),
        envelope: None,
        span: None,
    }
}

/// Find the first complete envelope of a specific kind, by its exact prefix.
/// Enrichment uses this so a later envelope of another type cannot shadow
/// the tasks card it needs to rewrite.
pub fn find_first(content: &str, kind: EnvelopeKind) -> Option<(Envelope, Range<usize>)> {
    let mut search_from = 0;
    while let Some(rel) = content[search_from..].find(kind.prefix()) {
        let start = search_from + rel;
        match scan_object(content, start) {
            ScanResult::Complete(end) => {
                if let Ok(envelope) = serde_json::from_str::<Envelope>(&content[start..end]) {
                    return Some((envelope, start..end));
                }
                search_from = end;
            }
            ScanResult::Incomplete => return None,
        }
    }
    None
}

/// Replace exactly `span` with `replacement`; text outside the span is
/// byte-identical to the original.
pub fn splice(content: &str, span: &Range<usize>, replacement: &str) -> String {
    let mut out = String::with_capacity(content.len() + replacement.len());
    out.push_str(&content[..span.start]);
    out.push_str(replacement);
    out.push_str(&content[span.end..]);
    out
}

/// Sideband data the client writes back into an already rendered card.
#[derive(Debug, Clone, PartialEq)]
pub enum Sideband {
    Feedbacks(Vec<TaskFeedback>),
    Answers(Vec<QuestionAnswer>),
}

/// Store user responses into the envelope inside `content` through a
/// structured update: parse, set the sideband field, re-serialize, splice
/// the original span. Returns `None` when no envelope is present or the
/// sideband does not fit the envelope's type. The envelope's `data` is
/// never altered.
pub fn attach_sideband(content: &str, sideband: Sideband) -> Option<String> {
    let extracted = extract_envelope(content);
    let (mut envelope, span) = match (extracted.envelope, extracted.span) {
        (Some(envelope), Some(span)) => (envelope, span),
        _ => return None,
    };

    match (&mut envelope, sideband) {
        (Envelope::Tasks { feedbacks, .. }, Sideband::Feedbacks(update)) => {
            *feedbacks = Some(update);
        }
        (Envelope::Questions { answers, .. }, Sideband::Answers(update)) => {
            *answers = Some(update);
        }
        _ => return None,
    }

    let serialized = serde_json::to_string(&envelope).ok()?;
    Some(splice(content, &span, &serialized))
}
