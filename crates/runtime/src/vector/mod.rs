//! Vector store adapter: records, metadata filters, RRF fusion, and backends.

pub mod fusion;
pub mod store;
pub mod types;

pub use fusion::{rrf_fuse, RRF_K};
pub use store::{InMemoryVectorStore, PineconeVectorStore, VectorStore};
pub use types::{
    filter, HybridQueryRequest, IndexStats, MatchSource, QueryMatch, QueryRequest, RecordMetadata,
    RecordType, SparseVector, VectorRecord,
};
