//! Core types for per-unit analysis
//!
//! An [`AnalysisUnit`] is the structured result of analyzing one slot (a
//! chunk, or a whole batch in single-unit mode). Slots end in a
//! [`UnitOutcome`]; failed slots keep an explicit error marker so the
//! batch never loses a position.

use crate::coordinate::Coordinate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

/// Confidence used when the backend omits one
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Message carried by the marker of a slot the backend never answered
pub const MISSING_ANALYSIS: &str = "missing analysis";

/// Accept strings, numbers and booleans where text is expected.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        Value::Array(items) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" | "),
        other => other.to_string(),
    })
}

fn lenient_confidence<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let score = match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64().unwrap_or(DEFAULT_CONFIDENCE),
        Value::String(s) => s.trim().parse().unwrap_or(DEFAULT_CONFIDENCE),
        _ => DEFAULT_CONFIDENCE,
    };
    Ok(if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        DEFAULT_CONFIDENCE
    })
}

fn default_confidence() -> f64 {
    DEFAULT_CONFIDENCE
}

fn one() -> u32 {
    1
}

/// One extracted fact linking analyzed text to a coordinate, concept or
/// relationship
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mapping {
    #[serde(alias = "type", deserialize_with = "lenient_string")]
    pub mapping_type: String,
    #[serde(alias = "value", deserialize_with = "lenient_string")]
    pub mapping_value: String,
    #[serde(
        default = "default_confidence",
        alias = "confidence",
        deserialize_with = "lenient_confidence"
    )]
    pub confidence_score: f64,
    #[serde(default = "one")]
    pub occurrences: u32,
    #[serde(default, deserialize_with = "lenient_string")]
    pub reasoning: String,
    #[serde(default)]
    pub source_unit_indices: Vec<usize>,
}

impl Mapping {
    pub fn new(mapping_type: impl Into<String>, mapping_value: impl Into<String>) -> Self {
        Self {
            mapping_type: mapping_type.into(),
            mapping_value: mapping_value.into(),
            confidence_score: DEFAULT_CONFIDENCE,
            occurrences: 1,
            reasoning: String::new(),
            source_unit_indices: Vec::new(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence_score = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    pub fn with_sources(mut self, sources: Vec<usize>) -> Self {
        self.source_unit_indices = sources;
        self
    }
}

/// An alternative reading or treatment noted in the text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variation {
    #[serde(default, alias = "type", deserialize_with = "lenient_string")]
    pub variation_type: String,
    #[serde(default, alias = "content", deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinate: Option<Coordinate>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Material that expands on a coordinate or concept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Elaboration {
    #[serde(default, alias = "title", deserialize_with = "lenient_string")]
    pub topic: String,
    #[serde(default, alias = "text", alias = "description", deserialize_with = "lenient_string")]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinate: Option<Coordinate>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Structured analysis of one slot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisUnit {
    pub extracted_mappings: Vec<Mapping>,
    pub variations: Vec<Variation>,
    pub elaborations: Vec<Elaboration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Required arrays and the names the backend may use for them
const MAPPING_FIELDS: &[&str] = &["extractedMappings", "mappings"];
const VARIATION_FIELDS: &[&str] = &["variations"];
const ELABORATION_FIELDS: &[&str] = &["elaborations"];
const SUMMARY_FIELDS: &[&str] = &["summary", "unitSummary"];

/// Field names the salvage pass looks for
pub const KNOWN_ARRAYS: &[&str] = &["extractedMappings", "mappings", "variations", "elaborations"];

/// Errors for recovered JSON that lacks the required shape
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("required field '{0}' is missing or null")]
    MissingField(&'static str),

    #[error("field '{0}' must be an array")]
    NotAnArray(&'static str),

    #[error("no analysis arrays could be recovered")]
    NothingRecovered,
}

/// Errors when no JSON could be recovered from a response
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("empty response")]
    Empty,

    #[error("no JSON could be recovered: {0}")]
    Unrecoverable(String),
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn lookup<'a>(
    object: &'a Map<String, Value>,
    names: &[&str],
) -> Option<&'a Value> {
    names
        .iter()
        .find_map(|n| object.get(*n).filter(|v| !v.is_null()))
}

fn entries<T: for<'de> Deserialize<'de>>(
    object: &Map<String, Value>,
    names: &[&str],
    canonical: &'static str,
    required: bool,
) -> Result<Vec<T>, ValidationError> {
    let value = match lookup(object, names) {
        Some(v) => v,
        None if required => return Err(ValidationError::MissingField(canonical)),
        None => return Ok(Vec::new()),
    };
    let items = value
        .as_array()
        .ok_or(ValidationError::NotAnArray(canonical))?;
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        match T::deserialize(item) {
            Ok(entry) => out.push(entry),
            Err(e) => warn!(field = canonical, index = i, error = %e, "skipping malformed entry"),
        }
    }
    Ok(out)
}

impl AnalysisUnit {
    /// Validate a fully parsed response. All three arrays must be present
    /// and non-null; malformed entries inside them are skipped.
    pub fn from_value(value: &Value) -> Result<Self, ValidationError> {
        Self::build(value, true)
    }

    /// Validate a salvaged response. Absent arrays are empty, but at
    /// least one must have been recovered.
    pub fn from_salvaged(value: &Value) -> Result<Self, ValidationError> {
        let object = value
            .as_object()
            .ok_or_else(|| ValidationError::NotAnObject(kind_name(value)))?;
        let recovered = [MAPPING_FIELDS, VARIATION_FIELDS, ELABORATION_FIELDS]
            .iter()
            .any(|names| lookup(object, names).is_some());
        if !recovered {
            return Err(ValidationError::NothingRecovered);
        }
        Self::build(value, false)
    }

    fn build(value: &Value, strict: bool) -> Result<Self, ValidationError> {
        let object = value
            .as_object()
            .ok_or_else(|| ValidationError::NotAnObject(kind_name(value)))?;
        Ok(Self {
            extracted_mappings: entries(object, MAPPING_FIELDS, "extractedMappings", strict)?,
            variations: entries(object, VARIATION_FIELDS, "variations", strict)?,
            elaborations: entries(object, ELABORATION_FIELDS, "elaborations", strict)?,
            summary: lookup(object, SUMMARY_FIELDS)
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.extracted_mappings.is_empty() && self.variations.is_empty() && self.elaborations.is_empty()
    }
}

/// Lifecycle of one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Pending,
    Prompted,
    Completed,
    Failed,
}

/// Rejected state change
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid unit transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: UnitState,
    pub to: UnitState,
}

impl UnitState {
    /// Move to `next`. A prompted slot may be prompted again (retry);
    /// completed and failed are terminal.
    pub fn transition(self, next: UnitState) -> Result<UnitState, InvalidTransition> {
        use UnitState::*;
        match (self, next) {
            (Pending, Prompted) | (Prompted, Prompted | Completed | Failed) => Ok(next),
            (from, to) => Err(InvalidTransition { from, to }),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, UnitState::Completed | UnitState::Failed)
    }
}

/// Why a slot failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The backend's answer had no entry for this slot
    MissingAnalysis,
    Parse,
    Validation,
    Timeout,
    Completion,
}

/// Error marker stored in a failed slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFailure {
    pub error: String,
    pub kind: FailureKind,
}

impl UnitFailure {
    pub fn new(kind: FailureKind, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            kind,
        }
    }

    pub fn missing() -> Self {
        Self::new(FailureKind::MissingAnalysis, MISSING_ANALYSIS)
    }
}

impl From<ParseError> for UnitFailure {
    fn from(e: ParseError) -> Self {
        Self::new(FailureKind::Parse, e.to_string())
    }
}

impl From<ValidationError> for UnitFailure {
    fn from(e: ValidationError) -> Self {
        Self::new(FailureKind::Validation, e.to_string())
    }
}

impl From<&crate::llm::CompletionError> for UnitFailure {
    fn from(e: &crate::llm::CompletionError) -> Self {
        let kind = match e {
            crate::llm::CompletionError::Timeout(_) => FailureKind::Timeout,
            _ => FailureKind::Completion,
        };
        Self::new(kind, e.to_string())
    }
}

/// Final state of one slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UnitOutcome {
    /// Parsed and validated in full
    Ok { unit: AnalysisUnit },
    /// Recovered by salvage; some of the response was lost
    Degraded { unit: AnalysisUnit, reason: String },
    Failed { failure: UnitFailure },
}

impl UnitOutcome {
    pub fn failed(failure: impl Into<UnitFailure>) -> Self {
        UnitOutcome::Failed {
            failure: failure.into(),
        }
    }

    pub fn unit(&self) -> Option<&AnalysisUnit> {
        match self {
            UnitOutcome::Ok { unit } | UnitOutcome::Degraded { unit, .. } => Some(unit),
            UnitOutcome::Failed { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<&UnitFailure> {
        match self {
            UnitOutcome::Failed { failure } => Some(failure),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, UnitOutcome::Failed { .. })
    }

    pub fn state(&self) -> UnitState {
        if self.is_failed() {
            UnitState::Failed
        } else {
            UnitState::Completed
        }
    }
}
