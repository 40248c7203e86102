//! Shared Cache Adapters
//!
//! Remote tier behind the `SharedCache` port. Enabled by setting
//! `cache.remote_url`; without it the pool cache runs memory-only.

pub mod http;

pub use http::HttpSharedCache;
