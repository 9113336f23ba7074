//! Lab lifecycle records persisted in the shared state store.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a lab and of each progress entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabStatus {
    Created,
    Booting,
    Active,
    Error,
}

impl LabStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Booting => "booting",
            Self::Active => "active",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LabStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Component that emitted a progress entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceName {
    /// Workspace filesystem sidecar
    FileSystem,
    /// TLS status polling job
    Ssl,
    /// Terminal sidecar
    Pty,
    /// Lifecycle orchestrator
    Server,
    /// Object-store seeding
    S3,
    /// Cluster resource provisioning
    K8s,
}

impl ServiceName {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FileSystem => "file_system",
            Self::Ssl => "ssl",
            Self::Pty => "pty",
            Self::Server => "server",
            Self::S3 => "s3",
            Self::K8s => "k8s",
        }
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable line of a lab's progress log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEntry {
    /// Unix seconds
    pub timestamp: i64,
    pub status: LabStatus,
    pub message: String,
    pub service_name: ServiceName,
}

impl ProgressEntry {
    /// Build an entry stamped with the current time.
    #[must_use]
    pub fn now(service_name: ServiceName, status: LabStatus, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp(),
            status,
            message: message.into(),
            service_name,
        }
    }
}

/// Per-lab instance record stored in the `lab_instances` hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabInstance {
    pub lab_id: String,
    pub language: String,
    pub created_at: i64,
    pub last_updated_at: i64,
    pub status: LabStatus,
    #[serde(default)]
    pub dirty_read_paths: Vec<String>,
    #[serde(default)]
    pub progress_logs: Vec<ProgressEntry>,
    /// Optimistic concurrency token, bumped on every write.
    #[serde(default)]
    pub version: u64,
}

impl LabInstance {
    /// A fresh record in the `Created` state with an empty progress log.
    #[must_use]
    pub fn new(lab_id: impl Into<String>, language: impl Into<String>, now: i64) -> Self {
        Self {
            lab_id: lab_id.into(),
            language: language.into(),
            created_at: now,
            last_updated_at: now,
            status: LabStatus::Created,
            dirty_read_paths: Vec::new(),
            progress_logs: Vec::new(),
            version: 0,
        }
    }

    /// Append a progress entry; status and `last_updated_at` follow the newest entry.
    pub fn append(&mut self, entry: ProgressEntry) {
        self.status = entry.status;
        self.last_updated_at = entry.timestamp;
        self.progress_logs.push(entry);
    }

    /// Whether `service` has reported `Active` at any point in the log.
    #[must_use]
    pub fn has_reported_active(&self, service: ServiceName) -> bool {
        self.progress_logs
            .iter()
            .any(|entry| entry.service_name == service && entry.status == LabStatus::Active)
    }

    /// Remember a workspace path that was read; duplicates are ignored.
    pub fn mark_dirty_read(&mut self, path: &str) {
        if !self.dirty_read_paths.iter().any(|p| p == path) {
            self.dirty_read_paths.push(path.to_string());
        }
    }
}

/// Entry in the `labs_monitor` list. Presence counts against the concurrency cap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringEntry {
    pub lab_id: String,
    pub status: LabStatus,
    pub created_at: i64,
    pub last_updated_at: i64,
}
