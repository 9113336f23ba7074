//! Object storage for lab workspaces.
//!
//! Workspace content lives under `code/{language}/{labId}/` in an
//! S3-compatible bucket and is seeded from `boilerplate/{language}/`.
//!
//! - [`ObjectStore`] is the capability the rest of the platform depends on,
//!   with [`S3ObjectStore`] for AWS S3 / Cloudflare R2 and
//!   [`MemoryObjectStore`] for tests.
//! - [`copy_prefix`], [`delete_prefix`] and [`move_path`] build prefix-level
//!   operations on top of it.
//! - [`SyncBridge`] batches filesystem events from the workspace sidecar and
//!   replays them against the bucket.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod layout;
pub mod store;
pub mod sync;

pub use error::ObjectStoreError;
pub use layout::{boilerplate_prefix, WorkspaceScope};
pub use store::memory::MemoryObjectStore;
pub use store::s3::{S3ObjectStore, S3Settings};
pub use store::{copy_prefix, delete_prefix, move_path, ObjectStore};
pub use sync::{FlushReport, SyncBridge, SyncConfig, SyncEvent, SyncOperation, SyncWorker};
