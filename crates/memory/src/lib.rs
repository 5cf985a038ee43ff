//! Vector index and embedding implementations for Conductor.

pub mod embedding;
pub mod in_memory;
pub mod vector;

pub use embedding::{Embedder, HashEmbedder, ProviderEmbedder};
pub use in_memory::InMemoryVectorIndex;
pub use vector::{cosine_similarity, normalize, rank};
