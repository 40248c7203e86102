//! Job Queue Adapters
//!
//! Two implementations of the `JobQueue` port, selected by `jobs.mode`:
//! - `DurableQueue`: JSONL journal, replay on start, bounded worker pool
//! - `InProcessQueue`: spawn-per-job fallback with an in-memory table

pub mod durable;
pub mod in_process;

pub use durable::DurableQueue;
pub use in_process::InProcessQueue;
