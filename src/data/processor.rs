// ============================================================
// Layer 4 — Annotation Processors
// ============================================================
// Reads JSON annotation files and normalises them into the
// per-task example types from the domain layer.
//
//   TriggerProcessor     → one TriggerExample per sentence
//                          (sentences without events are kept
//                          as negatives)
//   RoleProcessor        → one RoleExample per event; shared by
//                          role1 and role2
//   AttributionProcessor → one AttributionExample per event that
//                          carries both polarity and tense
//
// A missing file or malformed JSON is an error. Individual
// spans that fall outside their sentence are dropped with a
// warning so one bad annotation does not sink the file.

use anyhow::{Context, Result};
use std::{fs, path::Path};

use crate::domain::example::{
    Argument, AttributionCallback, AttributionExample, RawEvent, RawSentence, RoleCallback,
    RoleExample, RoleKind, Span, TriggerCallback, TriggerExample,
};
use crate::domain::task::TaskType;
use crate::domain::traits::Processor;

/// Parse one annotation file into raw sentences.
pub fn read_raw_file(path: &Path) -> Result<Vec<RawSentence>> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Cannot read annotation file '{}'", path.display()))?;

    let raw: Vec<RawSentence> = serde_json::from_str(&json)
        .with_context(|| format!("Malformed annotation JSON in '{}'", path.display()))?;

    tracing::debug!("Loaded {} sentences from '{}'", raw.len(), path.display());
    Ok(raw)
}

/// Resolve an event's trigger span, warning when it is unusable
fn trigger_span(sentence: &RawSentence, event: &RawEvent, text_len: usize) -> Option<Span> {
    let span = event.trigger.to_span(text_len);
    if let Some(span) = span {
        if span.slice(&sentence.sentence) != event.trigger.text {
            tracing::debug!(
                "Trigger text '{}' differs from sentence text at offset {}",
                event.trigger.text,
                event.trigger.offset
            );
        }
    } else {
        tracing::warn!(
            "Dropping trigger '{}' at offset {} outside sentence of {} chars",
            event.trigger.text,
            event.trigger.offset,
            text_len
        );
        tracing::debug!("Offending sentence: {}", sentence.sentence);
    }
    span
}

// ─── Trigger ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy)]
pub struct TriggerProcessor;

impl TriggerProcessor {
    /// Create a trigger processor.
    pub fn new() -> Self {
        Self
    }

    fn build_example(&self, raw: &RawSentence) -> TriggerExample {
        let text_len = raw.sentence.chars().count();

        // The same trigger can head several events; gold keeps it once.
        let mut triggers: Vec<Span> = raw
            .events
            .iter()
            .filter_map(|e| trigger_span(raw, e, text_len))
            .collect();
        triggers.sort();
        triggers.dedup();

        TriggerExample {
            text: raw.sentence.clone(),
            triggers,
            distant_triggers: raw.distant_triggers.clone(),
        }
    }
}

impl Processor for TriggerProcessor {
    type Example  = TriggerExample;
    type Callback = TriggerCallback;

    fn read_json(&self, path: &Path) -> Result<Vec<RawSentence>> {
        read_raw_file(path)
    }

    fn get_train_examples(&self, raw: &[RawSentence]) -> Vec<TriggerExample> {
        raw.iter().map(|r| self.build_example(r)).collect()
    }

    fn get_dev_examples(&self, raw: &[RawSentence]) -> (Vec<TriggerExample>, Vec<TriggerCallback>) {
        raw.iter()
            .map(|r| {
                let example  = self.build_example(r);
                let callback = TriggerCallback {
                    text: example.text.clone(),
                    gold: example.triggers.clone(),
                };
                (example, callback)
            })
            .unzip()
    }
}

// ─── Role ─────────────────────────────────────────────────────────────────────

/// Role kinds extracted by each role sub-task
pub fn role_kinds(task: TaskType) -> &'static [RoleKind] {
    match task {
        TaskType::Role1 => &[RoleKind::Subject, RoleKind::Object],
        TaskType::Role2 => &[RoleKind::Time, RoleKind::Location],
        _               => &[],
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RoleProcessor {
    task: TaskType,
}

impl RoleProcessor {
    /// `task` must be role1 or role2
    pub fn new(task: TaskType) -> Self {
        debug_assert!(task.is_role(), "RoleProcessor built for {task}");
        Self { task }
    }

    /// The role task this processor reads for.
    pub fn task(&self) -> TaskType {
        self.task
    }

    /// Role kinds extracted by this processor.
    pub fn kinds(&self) -> &'static [RoleKind] {
        role_kinds(self.task)
    }

    fn build_examples(&self, raw: &RawSentence) -> Vec<RoleExample> {
        let text_len = raw.sentence.chars().count();
        let mut examples = Vec::new();

        for event in &raw.events {
            let Some(trigger) = trigger_span(raw, event, text_len) else {
                continue;
            };

            let mut arguments = Vec::new();
            for arg in &event.arguments {
                let Some(kind) = RoleKind::from_label(&arg.role) else {
                    tracing::debug!("Ignoring unknown role '{}'", arg.role);
                    continue;
                };
                match arg.mention.to_span(text_len) {
                    Some(span) => arguments.push(Argument { kind, span }),
                    None => tracing::warn!(
                        "Dropping {} argument '{}' at offset {} outside sentence",
                        kind.as_str(),
                        arg.mention.text,
                        arg.mention.offset
                    ),
                }
            }

            examples.push(RoleExample {
                text: raw.sentence.clone(),
                trigger,
                arguments,
            });
        }

        examples
    }
}

impl Processor for RoleProcessor {
    type Example  = RoleExample;
    type Callback = RoleCallback;

    fn read_json(&self, path: &Path) -> Result<Vec<RawSentence>> {
        read_raw_file(path)
    }

    fn get_train_examples(&self, raw: &[RawSentence]) -> Vec<RoleExample> {
        raw.iter().flat_map(|r| self.build_examples(r)).collect()
    }

    fn get_dev_examples(&self, raw: &[RawSentence]) -> (Vec<RoleExample>, Vec<RoleCallback>) {
        let kinds = self.kinds();

        raw.iter()
            .flat_map(|r| self.build_examples(r))
            .map(|example| {
                let mut gold: Vec<Argument> = example
                    .arguments
                    .iter()
                    .filter(|a| kinds.contains(&a.kind))
                    .copied()
                    .collect();
                gold.sort();
                gold.dedup();

                let callback = RoleCallback {
                    text:    example.text.clone(),
                    trigger: example.trigger,
                    gold,
                };
                (example, callback)
            })
            .unzip()
    }
}

// ─── Attribution ──────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy)]
pub struct AttributionProcessor;

impl AttributionProcessor {
    /// Create an attribution processor.
    pub fn new() -> Self {
        Self
    }

    fn build_examples(&self, raw: &RawSentence) -> Vec<AttributionExample> {
        let text_len = raw.sentence.chars().count();

        raw.events
            .iter()
            .filter_map(|event| {
                let trigger = trigger_span(raw, event, text_len)?;
                match (&event.polarity, &event.tense) {
                    (Some(polarity), Some(tense)) => Some(AttributionExample {
                        text:     raw.sentence.clone(),
                        trigger,
                        polarity: polarity.clone(),
                        tense:    tense.clone(),
                    }),
                    _ => {
                        tracing::debug!(
                            "Skipping event '{}' without polarity/tense",
                            event.trigger.text
                        );
                        None
                    }
                }
            })
            .collect()
    }
}

impl Processor for AttributionProcessor {
    type Example  = AttributionExample;
    type Callback = AttributionCallback;

    fn read_json(&self, path: &Path) -> Result<Vec<RawSentence>> {
        read_raw_file(path)
    }

    fn get_train_examples(&self, raw: &[RawSentence]) -> Vec<AttributionExample> {
        raw.iter().flat_map(|r| self.build_examples(r)).collect()
    }

    fn get_dev_examples(
        &self,
        raw: &[RawSentence],
    ) -> (Vec<AttributionExample>, Vec<AttributionCallback>) {
        raw.iter()
            .flat_map(|r| self.build_examples(r))
            .map(|example| {
                let callback = AttributionCallback {
                    polarity: example.polarity.clone(),
                    tense:    example.tense.clone(),
                };
                (example, callback)
            })
            .unzip()
    }
}
