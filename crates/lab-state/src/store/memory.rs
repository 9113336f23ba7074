//! In-process lab state store for tests and single-node development.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::LabStore;
use crate::derive::monitor_entry_for;
use crate::error::{Result, StoreError};
use crate::types::{LabInstance, MonitoringEntry, ProgressEntry};

#[derive(Debug, Default)]
struct MemoryState {
    instances: HashMap<String, LabInstance>,
    archive: HashMap<String, Vec<LabInstance>>,
    monitor: Vec<MonitoringEntry>,
}

/// [`LabStore`] kept behind a single async mutex, so every operation is atomic.
#[derive(Debug, Default)]
pub struct MemoryLabStore {
    state: Mutex<MemoryState>,
}

impl MemoryLabStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a monitor entry directly, bypassing status derivation.
    pub async fn push_monitor_entry(&self, entry: MonitoringEntry) {
        self.state.lock().await.monitor.insert(0, entry);
    }
}

#[async_trait]
impl LabStore for MemoryLabStore {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn create_instance(&self, instance: LabInstance) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(prior) = state.instances.remove(&instance.lab_id) {
            state
                .archive
                .entry(prior.lab_id.clone())
                .or_default()
                .push(prior);
        }
        state.instances.insert(instance.lab_id.clone(), instance);
        Ok(())
    }

    async fn get_instance(&self, lab_id: &str) -> Result<Option<LabInstance>> {
        Ok(self.state.lock().await.instances.get(lab_id).cloned())
    }

    async fn archived_instances(&self, lab_id: &str) -> Result<Vec<LabInstance>> {
        Ok(self
            .state
            .lock()
            .await
            .archive
            .get(lab_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append_progress(&self, lab_id: &str, entry: ProgressEntry) -> Result<LabInstance> {
        let mut state = self.state.lock().await;
        let instance = state
            .instances
            .get_mut(lab_id)
            .ok_or_else(|| StoreError::NotFound(lab_id.to_string()))?;

        instance.append(entry.clone());
        instance.version += 1;
        let updated = instance.clone();

        if let Some(monitored) = monitor_entry_for(&updated, &entry) {
            state.monitor.retain(|existing| existing.lab_id != lab_id);
            state.monitor.insert(0, monitored);
        }
        Ok(updated)
    }

    async fn record_dirty_read(&self, lab_id: &str, path: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let instance = state
            .instances
            .get_mut(lab_id)
            .ok_or_else(|| StoreError::NotFound(lab_id.to_string()))?;
        instance.mark_dirty_read(path);
        instance.version += 1;
        Ok(())
    }

    async fn remove_lab(&self, lab_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.instances.remove(lab_id);
        state.archive.remove(lab_id);
        state.monitor.retain(|entry| entry.lab_id != lab_id);
        Ok(())
    }

    async fn active_lab_count(&self) -> Result<usize> {
        Ok(self.state.lock().await.monitor.len())
    }

    async fn monitor_entries(&self) -> Result<Vec<MonitoringEntry>> {
        Ok(self.state.lock().await.monitor.clone())
    }

    async fn touch_monitor_entry(&self, lab_id: &str, now: i64) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.monitor.iter_mut().find(|entry| entry.lab_id == lab_id) {
            Some(entry) => {
                entry.last_updated_at = now;
                entry.status = crate::types::LabStatus::Active;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
