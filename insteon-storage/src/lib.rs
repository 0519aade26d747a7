//! # insteon-storage
//!
//! Storage layer for insteon-plm.
//!
//! This crate provides:
//! - One JSON snapshot file per gateway, replaced atomically
//! - A checksum index verified on load

pub mod error;
pub mod index;
pub mod snapshot;

pub use error::StorageError;
pub use index::{SnapshotIndex, SnapshotMeta};
pub use snapshot::SnapshotStore;
