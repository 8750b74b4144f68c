//! Context window building
//!
//! Turns a text unit plus the run's coordinate map into the background
//! the completion backend sees: a cheap lightweight window or a
//! comprehensive one with relevant nodes, relationships and domain
//! operators.

mod builder;
mod truncate;
mod window;

pub use builder::{ContextBuildError, ContextBuilder, ContextLimits, DOMAIN_OPERATOR_PATTERN};
pub use truncate::{preview, truncate};
pub use window::{
    ComprehensiveContext, ContextDepth, ContextWindow, DomainOperator, HierarchyEntry,
    LightweightContext, NodeSummary, ProjectContext, ProjectSummary, RelevantNodes,
};
