//! Meridian: document analysis over a coordinate-addressed knowledge graph
//!
//! A document is assigned to a node ("coordinate") in a hierarchical
//! graph and analyzed chunk by chunk by a text-completion backend. The
//! extracted mappings are consolidated across chunks, ranked against the
//! target coordinate and cached in two tiers.
//!
//! # Core Concepts
//!
//! - **Coordinate**: hierarchical address such as `#4-0-1`; `.` and `-`
//!   separators are equivalent
//! - **CoordinateMap**: immutable snapshot of nodes, relationships and
//!   hierarchy for one run
//! - **Context window**: background handed to the backend with each chunk
//! - **Mapping**: one extracted fact, consolidated across chunks
//!
//! # Example
//!
//! ```
//! use meridian::coordinate::{is_child, normalize};
//!
//! assert_eq!(normalize("#4.0"), normalize("#4-0"));
//! assert!(is_child("#4.0-1", "#4-0"));
//! ```

pub mod analysis;
pub mod cache;
pub mod config;
pub mod context;
pub mod coordinate;
pub mod document;
pub mod graph;
pub mod llm;
pub mod pipeline;
pub mod store;

pub use analysis::{AnalysisOrchestrator, AnalysisUnit, Mapping, UnitOutcome};
pub use cache::{Caches, TwoTierCache};
pub use config::PipelineConfig;
pub use context::{ContextBuilder, ContextDepth, ContextWindow};
pub use coordinate::Coordinate;
pub use graph::{transform, transform_value, CoordinateMap, RawGraph};
pub use llm::{CompletionClient, CompletionError, CompletionOptions};
pub use pipeline::{AnalysisPipeline, AnalysisReport, AnalysisRequest, PipelineError, RunStatus};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
