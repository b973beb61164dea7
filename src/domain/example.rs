// ============================================================
// Layer 3 — Annotation Records and Examples
// ============================================================
// Raw records mirror the JSON annotation files one to one:
//
//   {"sentence": "...",
//    "events": [{"trigger":   {"text": "..", "offset": 3, "length": 2},
//                "arguments": [{"role": "subject", "text": "..", "offset": 0}],
//                "polarity": "..", "tense": ".."}],
//    "distant_triggers": [".."]}
//
// Offsets and lengths count chars, not bytes.
//
// Processors turn raw records into per-task examples. Dev sets
// additionally produce callback info, paired 1:1 with examples,
// that the evaluator needs to rebuild spans from predictions.

use serde::{Deserialize, Serialize};

// ─── Raw Records ──────────────────────────────────────────────────────────────

/// One annotated sentence as stored on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSentence {
    pub sentence: String,

    #[serde(default)]
    pub events: Vec<RawEvent>,

    /// Trigger words found by dictionary matching rather than annotation
    #[serde(default)]
    pub distant_triggers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub trigger: RawMention,

    #[serde(default)]
    pub arguments: Vec<RawArgument>,

    #[serde(default)]
    pub polarity: Option<String>,

    #[serde(default)]
    pub tense: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMention {
    pub text: String,
    pub offset: usize,

    /// Defaults to the char count of `text`
    #[serde(default)]
    pub length: Option<usize>,
}

impl RawMention {
    /// Resolve to an inclusive char span inside a sentence of
    /// `text_len` chars. Empty or out-of-range mentions yield None.
    pub fn to_span(&self, text_len: usize) -> Option<Span> {
        let len = self.length.unwrap_or_else(|| self.text.chars().count());
        if len == 0 || self.offset + len > text_len {
            return None;
        }
        Some(Span::new(self.offset, self.offset + len - 1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawArgument {
    pub role: String,

    #[serde(flatten)]
    pub mention: RawMention,
}

// ─── Spans and Roles ──────────────────────────────────────────────────────────

/// Inclusive char span `[start, end]` inside a sentence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end:   usize,
}

impl Span {
    /// Inclusive span `start..=end`.
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end, "span start {start} after end {end}");
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn contains(&self, pos: usize) -> bool {
        self.start <= pos && pos <= self.end
    }

    /// The covered substring of `text`
    pub fn slice(&self, text: &str) -> String {
        text.chars().skip(self.start).take(self.len()).collect()
    }
}

/// Argument role kinds. role1 extracts subject/object,
/// role2 extracts time/location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleKind {
    Subject,
    Object,
    Time,
    Location,
}

impl RoleKind {
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "subject"          => Some(RoleKind::Subject),
            "object"           => Some(RoleKind::Object),
            "time"             => Some(RoleKind::Time),
            "location" | "loc" => Some(RoleKind::Location),
            _                  => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RoleKind::Subject  => "subject",
            RoleKind::Object   => "object",
            RoleKind::Time     => "time",
            RoleKind::Location => "location",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Argument {
    pub kind: RoleKind,
    pub span: Span,
}

// ─── Examples ─────────────────────────────────────────────────────────────────

/// One sentence with every annotated trigger
#[derive(Debug, Clone)]
pub struct TriggerExample {
    pub text:             String,
    pub triggers:         Vec<Span>,
    pub distant_triggers: Vec<String>,
}

/// One event: a sentence, a known trigger and its arguments
#[derive(Debug, Clone)]
pub struct RoleExample {
    pub text:      String,
    pub trigger:   Span,
    pub arguments: Vec<Argument>,
}

/// One event with its polarity and tense labels
#[derive(Debug, Clone)]
pub struct AttributionExample {
    pub text:     String,
    pub trigger:  Span,
    pub polarity: String,
    pub tense:    String,
}

// ─── Dev Callback Info ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TriggerCallback {
    pub text: String,
    pub gold: Vec<Span>,
}

#[derive(Debug, Clone)]
pub struct RoleCallback {
    pub text:    String,
    pub trigger: Span,
    pub gold:    Vec<Argument>,
}

#[derive(Debug, Clone)]
pub struct AttributionCallback {
    pub polarity: String,
    pub tense:    String,
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mention_defaults_length_to_text() {
        let m = RawMention { text: "收购".into(), offset: 2, length: None };
        assert_eq!(m.to_span(10), Some(Span::new(2, 3)));
    }

    #[test]
    fn test_mention_out_of_range_is_dropped() {
        let m = RawMention { text: "收购".into(), offset: 9, length: None };
        assert_eq!(m.to_span(10), None);
    }

    #[test]
    fn test_span_slice_counts_chars() {
        let span = Span::new(2, 3);
        assert_eq!(span.slice("公司收购了工厂"), "收购");
        assert!(span.contains(3));
        assert!(!span.contains(4));
    }

    #[test]
    fn test_argument_role_parses_flattened_mention() {
        let arg: RawArgument = serde_json::from_str(
            r#"{"role": "loc", "text": "北京", "offset": 0}"#
        ).unwrap();
        assert_eq!(RoleKind::from_label(&arg.role), Some(RoleKind::Location));
        assert_eq!(arg.mention.to_span(5), Some(Span::new(0, 1)));
    }
}
