//! Semantic Index + Discovery Engine: turns a free-text `find` query into
//! ranked tool candidates.

pub mod domain_hints;
pub mod embedder;
pub mod engine;
pub mod lexer;
pub mod semantic_index;

pub use embedder::{DeterministicEmbedder, Embedder, FastEmbedder, SharedEmbedder};
pub use engine::{Candidate, DiscoveryEngine, DEFAULT_CONFIDENCE_THRESHOLD};
pub use semantic_index::{SemanticIndex, DEFAULT_BASE_THRESHOLD};
