//! HTTP API Adapter
//!
//! axum router exposing the use cases to collaborators:
//! - `routes`: handlers, caller extraction, router assembly
//! - `types`: JSON bodies and the response envelope

pub mod routes;
pub mod types;

pub use routes::{ApiState, router};
