//! Deterministic completion client
//!
//! Answers analysis prompts by reading the text section(s) of the prompt:
//! - `**bold**` terms become `Concept` mappings (confidence 0.8)
//! - coordinate mentions become `Coordinate` mappings (confidence 0.6)
//! - the first line becomes the summary
//!
//! Synthesis prompts get a fixed sentence. Grouped prompts get a JSON
//! array, optionally cut short to simulate a model that loses entries.

use async_trait::async_trait;
use meridian::coordinate::find_coordinates;
use meridian::llm::{CompletionClient, CompletionError, CompletionOptions};
use regex::Regex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub const SYNTHESIS: &str = "The document moves from harmony to rhythm and comes to rest.";

pub struct ScriptedAnalyst {
    /// Entries kept in grouped answers
    group_limit: Option<usize>,
    /// Text whose unit gets an unparseable answer
    garble_marker: Option<String>,
    /// Fail every call as unavailable
    unavailable: bool,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl Default for ScriptedAnalyst {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedAnalyst {
    pub fn new() -> Self {
        Self {
            group_limit: None,
            garble_marker: None,
            unavailable: false,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_group_limit(mut self, limit: usize) -> Self {
        self.group_limit = Some(limit);
        self
    }

    pub fn garbling(mut self, marker: impl Into<String>) -> Self {
        self.garble_marker = Some(marker.into());
        self
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::new()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    fn analyze_text(&self, text: &str) -> Value {
        let bold = Regex::new(r"\*\*(.+?)\*\*").unwrap();
        let mut mappings: Vec<Value> = bold
            .captures_iter(text)
            .map(|c| {
                json!({
                    "mappingType": "Concept",
                    "mappingValue": &c[1],
                    "confidenceScore": 0.8,
                    "reasoning": "emphasized in the text"
                })
            })
            .collect();
        for coordinate in find_coordinates(text) {
            mappings.push(json!({
                "mappingType": "Coordinate",
                "mappingValue": coordinate.as_str(),
                "confidenceScore": 0.6,
                "reasoning": "mentioned explicitly"
            }));
        }
        let summary = text
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with("Section:"))
            .unwrap_or("")
            .to_string();
        json!({
            "extractedMappings": mappings,
            "variations": [],
            "elaborations": [],
            "summary": summary
        })
    }
}

/// Text between `start` and the next `# ` heading at column 0.
fn text_after<'a>(prompt: &'a str, start: &str) -> Vec<&'a str> {
    prompt
        .split(start)
        .skip(1)
        .map(|rest| {
            let end = rest
                .find("\n# Chunk")
                .or_else(|| rest.find("\n# Output"))
                .unwrap_or(rest.len());
            &rest[..end]
        })
        .collect()
}

#[async_trait]
impl CompletionClient for ScriptedAnalyst {
    async fn complete(
        &self,
        _system_prompt: &str,
        user_prompt: &str,
        _options: &CompletionOptions,
    ) -> Result<String, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(user_prompt.to_string());

        if self.unavailable {
            return Err(CompletionError::Unavailable("scripted outage".to_string()));
        }
        if user_prompt.contains("# Consolidated mappings") {
            return Ok(SYNTHESIS.to_string());
        }

        if user_prompt.starts_with("# Chunk 1") {
            let mut entries: Vec<Value> = text_after(user_prompt, "\n## Text\n\n")
                .into_iter()
                .map(|t| self.analyze_text(t))
                .collect();
            if let Some(limit) = self.group_limit {
                entries.truncate(limit);
            }
            return Ok(format!("```json\n{}\n```", Value::Array(entries)));
        }

        let text = text_after(user_prompt, "\n# Text\n\n")
            .into_iter()
            .next()
            .unwrap_or_default();
        if let Some(marker) = &self.garble_marker {
            if text.contains(marker.as_str()) {
                return Ok("Sorry, I lost my train of thought.".to_string());
            }
        }
        Ok(self.analyze_text(text).to_string())
    }
}
