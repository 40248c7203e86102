//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! infrastructure. Each sub-module groups adapters by concern.
//!
//! Adapter categories:
//! - `api`: axum HTTP routes and the JSON envelope
//! - `cache`: remote shared tier of the pool price cache
//! - `coordination`: per-key exclusive sections
//! - `metrics`: Prometheus metrics export and health checks
//! - `persistence`: in-memory store, JSONL ledger journal, snapshots
//! - `queue`: durable and in-process settlement job queues

pub mod api;
pub mod cache;
pub mod coordination;
pub mod metrics;
pub mod persistence;
pub mod queue;
