//! Coordination Adapters
//!
//! Implementations of the `LockManager` port. Only the single-node
//! in-process table ships here; a database advisory lock or distributed
//! lock service plugs in behind the same trait.

pub mod local;

pub use local::LocalLockManager;
