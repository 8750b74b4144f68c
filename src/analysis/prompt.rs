//! Prompt assembly
//!
//! Only the structure of prompts lives here: which context goes where and
//! what JSON shape is requested. Persona and wording are supplied by the
//! caller through `system_prompt`.

use super::types::Mapping;
use crate::context::ContextWindow;
use crate::document::TextUnit;
use std::fmt::Write as _;

const UNIT_SHAPE: &str = r#"{"extractedMappings": [{"mappingType": "...", "mappingValue": "...", "confidenceScore": 0.0, "reasoning": "..."}], "variations": [{"variationType": "...", "description": "..."}], "elaborations": [{"topic": "...", "content": "..."}], "summary": "..."}"#;

/// Default system prompt; callers normally replace it
pub const DEFAULT_SYSTEM_PROMPT: &str = "You analyze documents against a coordinate-addressed knowledge graph. Answer with JSON only.";

/// Builds the user prompts sent to the completion backend
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    system_prompt: String,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_SYSTEM_PROMPT)
    }
}

impl PromptBuilder {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// One chunk, one JSON object back.
    pub fn unit_prompt(&self, unit: &TextUnit, window: &ContextWindow) -> String {
        let mut out = String::new();
        out.push_str("# Context\n\n");
        out.push_str(&window.render());
        out.push_str("# Text\n\n");
        push_unit(&mut out, unit);
        let _ = write!(
            out,
            "\n# Output\n\nReturn one JSON object of this shape:\n{}\n",
            UNIT_SHAPE
        );
        out
    }

    /// Several chunks, a JSON array with one entry per chunk, in order.
    pub fn group_prompt(&self, units: &[(&TextUnit, ContextWindow)]) -> String {
        let mut out = String::new();
        for (position, (unit, window)) in units.iter().enumerate() {
            let _ = write!(out, "# Chunk {}\n\n## Context\n\n", position + 1);
            out.push_str(&window.render());
            out.push_str("## Text\n\n");
            push_unit(&mut out, unit);
            out.push('\n');
        }
        let _ = write!(
            out,
            "# Output\n\nReturn a JSON array with exactly {} entries, one per chunk in the order given. Each entry has this shape:\n{}\n",
            units.len(),
            UNIT_SHAPE
        );
        out
    }

    /// A whole batch as one text, one rich JSON object back.
    pub fn single_unit_prompt(&self, units: &[TextUnit], window: &ContextWindow) -> String {
        let mut out = String::new();
        out.push_str("# Context\n\n");
        out.push_str(&window.render());
        out.push_str("# Text\n\n");
        out.push_str(&joined_content(units));
        let _ = write!(
            out,
            "\n\n# Output\n\nAnalyze the text as a whole. Return one JSON object of this shape:\n{}\n",
            UNIT_SHAPE
        );
        out
    }

    /// Synthesis over the consolidated mappings and per-unit summaries.
    pub fn synthesis_prompt(
        &self,
        target: Option<&str>,
        mappings: &[Mapping],
        summaries: &[String],
    ) -> String {
        let mut out = String::new();
        if let Some(target) = target {
            let _ = write!(out, "# Target coordinate\n\n{}\n\n", target);
        }
        out.push_str("# Consolidated mappings\n\n");
        for m in mappings {
            let _ = writeln!(
                out,
                "- {}: {} (confidence {:.2}, seen {}x)",
                m.mapping_type, m.mapping_value, m.confidence_score, m.occurrences
            );
        }
        if !summaries.is_empty() {
            out.push_str("\n# Section summaries\n\n");
            for s in summaries {
                let _ = writeln!(out, "- {}", s);
            }
        }
        out.push_str("\n# Output\n\nWrite a short synthesis of the document in plain prose.\n");
        out
    }
}

/// Content of several units as one text, separated by blank lines.
pub fn joined_content(units: &[TextUnit]) -> String {
    units
        .iter()
        .map(|u| u.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn push_unit(out: &mut String, unit: &TextUnit) {
    if let Some(heading) = &unit.heading {
        let _ = writeln!(out, "Section: {}\n", heading);
    }
    out.push_str(&unit.content);
    out.push('\n');
}
