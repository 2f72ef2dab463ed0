//! Ingestion pipeline: from a filesystem change to a worker pushing bytes.
//!
//! - **discovery**: Classify image paths and find stream directories
//! - **debounce**: Drop repeated events for the same path
//! - **watcher**: Turn filesystem notifications into jobs
//! - **channel**: Bounded job queue with backpressure
//! - **worker**: Pool of workers pushing jobs into their streams

pub mod channel;
pub mod debounce;
pub mod discovery;
pub mod watcher;
pub mod worker;

// Re-exports for convenient access
pub use channel::{emit, job_queue, JobReceiver, JobSender};
pub use debounce::Debouncer;
pub use discovery::{discover_stream_dirs, ImageClassifier};
pub use watcher::ChangeWatcher;
pub use worker::WorkerPool;
