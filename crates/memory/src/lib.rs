//! Knowledge index and checkpoint storage for Flavia.
//!
//! - `knowledge`: the retrieval tool's document index
//! - `checkpoint`: per-thread conversation state (in-memory or JSON files)
//! - `vector`: similarity scoring shared by the index

pub mod checkpoint;
pub mod knowledge;
pub mod vector;

pub use checkpoint::{FileCheckpointStore, InMemoryCheckpointStore};
pub use knowledge::{IndexedChunk, VectorKnowledgeBase};
