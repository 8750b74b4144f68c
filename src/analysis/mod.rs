//! Analysis of text units against a coordinate map
//!
//! # Architecture
//!
//! - **prompt**: assembles user prompts from units and their context windows
//! - **AnalysisOrchestrator**: runs completion calls per unit, per group or
//!   for the whole batch, with bounded concurrency, timeouts and retries
//! - **parse**: recovers structured output from completion text
//! - **merger**: consolidates mappings across units
//! - **rerank**: orders consolidated mappings by relevance to a target
//!
//! Every slot ends as a [`UnitOutcome`]: `Ok`, `Degraded` (salvaged) or
//! `Failed` with an explicit error marker.
//!
//! # Example
//!
//! ```ignore
//! use meridian::analysis::{consolidate_outcomes, rerank, AnalysisOrchestrator};
//!
//! let orchestrator = AnalysisOrchestrator::new(client).with_settings(settings);
//! let batch = orchestrator.analyze(&units, &contexts, target.as_ref(), None).await;
//! let consolidated = consolidate_outcomes(&batch.outcomes());
//! let ranked = rerank(consolidated.mappings, target.as_ref(), &weights);
//! ```

mod merger;
mod orchestrator;
pub mod parse;
mod prompt;
mod rerank;
mod types;

pub use merger::{
    consolidate, consolidate_outcomes, dedupe_elaborations, dedupe_variations, distribute,
    flatten, parse_triple, Consolidated, MappingKind, REASONING_SEPARATOR,
};
pub use orchestrator::{
    AnalysisMode, AnalysisOrchestrator, AnalysisSettings, BatchResult, UnitSlot,
};
pub use parse::{parse_group, parse_unit};
pub use prompt::{joined_content, PromptBuilder, DEFAULT_SYSTEM_PROMPT};
pub use rerank::{relevance, rerank, RankedMapping, RerankWeights};
pub use types::{
    AnalysisUnit, Elaboration, FailureKind, InvalidTransition, Mapping, ParseError, UnitFailure,
    UnitOutcome, UnitState, ValidationError, Variation, DEFAULT_CONFIDENCE, MISSING_ANALYSIS,
};
