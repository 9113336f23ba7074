//! Shared lab lifecycle state.
//!
//! Every lab has one [`LabInstance`] record holding its status and an
//! append-only progress log. Components append [`ProgressEntry`] values for
//! their own [`ServiceName`]; the store derives the lab status from the log
//! and, once both workspace sidecars report `Active`, upserts a
//! [`MonitoringEntry`] into the monitor queue that admission control counts.
//!
//! # Backends
//!
//! - [`RedisLabStore`] for deployments (`lab_instances` hash, `labs_monitor` list)
//! - [`MemoryLabStore`] for tests and local runs

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod derive;
pub mod error;
pub mod reporter;
pub mod store;
pub mod types;

pub use derive::{monitor_entry_for, READINESS_SERVICES};
pub use error::StoreError;
pub use reporter::ServiceReporter;
pub use store::memory::MemoryLabStore;
pub use store::redis_store::RedisLabStore;
pub use store::LabStore;
pub use types::{LabInstance, LabStatus, MonitoringEntry, ProgressEntry, ServiceName};
