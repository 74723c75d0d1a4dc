//! Ingestion pipeline: chunking, the session-serialized job queue, and the
//! worker that drives mail pages into the vector index.

pub mod chunker;
pub mod queue;
pub mod worker;

pub use chunker::{chunk_id, chunk_text, CHUNK_OVERLAP, CHUNK_SIZE};
pub use queue::{backoff_delay, BackfillJob, JobHandler, SessionQueue};
pub use worker::{IngestDeps, IngestWorker};
