//! Common test utilities for pipeline integration tests
//!
//! Provides graph snapshots and documents in the shapes the stores emit,
//! and a deterministic completion client that answers prompts without a
//! model.

#![allow(dead_code)]

pub mod fixtures;
pub mod scripted;

pub use fixtures::{five_section_document, music_graph, sectioned_document, test_config};
pub use scripted::ScriptedAnalyst;
