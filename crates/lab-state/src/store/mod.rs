//! Lab state store abstraction and its backends.

pub mod memory;
pub mod redis_store;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{LabInstance, MonitoringEntry, ProgressEntry};

/// Hash holding one serialized [`LabInstance`] per lab id.
pub const LAB_INSTANCES_KEY: &str = "lab_instances";
/// List of serialized [`MonitoringEntry`] values; its length is the admitted lab count.
pub const LABS_MONITOR_KEY: &str = "labs_monitor";
/// Prefix of the per-lab hashes holding records replaced by a restart.
pub const LAB_ARCHIVE_KEY: &str = "lab_instances_archive";
/// Placeholder used to materialize empty collections.
pub const INIT_SENTINEL: &str = "init";

/// Hash holding the archived records of one lab, fields `{createdAt}:{sequence}`.
#[must_use]
pub fn archive_key(lab_id: &str) -> String {
    format!("{LAB_ARCHIVE_KEY}:{lab_id}")
}

/// Maximum optimistic write attempts before reporting a conflict.
pub const MAX_WRITE_ATTEMPTS: u32 = 8;

/// Shared lab state: instance records plus the monitor queue.
///
/// Every instance mutation is a read-modify-write guarded per lab, and the
/// monitor upsert that status derivation produces is applied in the same
/// atomic step as the progress append.
#[async_trait]
pub trait LabStore: Send + Sync {
    /// Make sure the instance table and monitor queue exist. Idempotent.
    async fn initialize(&self) -> Result<()>;

    /// Insert or replace the record for `instance.lab_id`.
    ///
    /// A replaced record is archived rather than discarded.
    async fn create_instance(&self, instance: LabInstance) -> Result<()>;

    /// Records replaced by restarts of `lab_id`, oldest first.
    async fn archived_instances(&self, lab_id: &str) -> Result<Vec<LabInstance>>;

    async fn get_instance(&self, lab_id: &str) -> Result<Option<LabInstance>>;

    /// Append a progress entry and apply the status-derivation rule.
    async fn append_progress(&self, lab_id: &str, entry: ProgressEntry) -> Result<LabInstance>;

    /// Add `path` to the lab's dirty-read set.
    async fn record_dirty_read(&self, lab_id: &str, path: &str) -> Result<()>;

    /// Drop the instance record, its archive and every monitor entry for the lab.
    async fn remove_lab(&self, lab_id: &str) -> Result<()>;

    /// Number of entries in the monitor queue.
    async fn active_lab_count(&self) -> Result<usize>;

    async fn monitor_entries(&self) -> Result<Vec<MonitoringEntry>>;

    /// Refresh the lab's monitor entry. Returns `false` when the lab is not monitored.
    async fn touch_monitor_entry(&self, lab_id: &str, now: i64) -> Result<bool>;
}
