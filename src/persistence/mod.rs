//! Persistence layer: the on-disk session record.

pub mod session_store;
