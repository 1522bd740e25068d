//! FinSight vector store
//!
//! Embedded document storage and similarity search with:
//! - Local brute-force cosine index (optional JSON snapshot)
//! - Remote managed index over HTTP
//! - Threshold, limit and metadata filtering applied uniformly

pub mod document;
pub mod local;
pub mod remote;
pub mod similarity;
pub mod store;

pub use document::{generate_document_id, DocumentMetadata, DocumentType, NewDocument, VectorDocument};
pub use local::LocalIndex;
pub use remote::RemoteIndex;
pub use store::{
    create_vector_index, Relevance, ScoredDocument, SearchFilter, SearchOptions, SearchResult,
    VectorIndex, VectorStore,
};
