//! External collaborators the pipeline talks to
//!
//! The graph store, the document store and the publish target are
//! reached only through the traits in this module. In-memory
//! implementations back the tests and the CLI.

mod memory;
mod traits;

pub use memory::{InMemoryGraph, MemoryDocumentStore, RecordingPublisher};
pub use traits::{DocumentStore, GraphQuery, PublishTarget, StoreError, StoreResult};
