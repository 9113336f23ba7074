//! Progress reporting for components running inside a lab pod.

use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{Result, StoreError};
use crate::store::LabStore;
use crate::types::{LabStatus, ProgressEntry, ServiceName};

/// Environment variable carrying the lab id inside a lab pod.
pub const ENV_LAB_ID: &str = "LAB_ID";

/// Appends progress entries for exactly one service of one lab.
///
/// A reporter cannot write entries for any other service name, so a sidecar
/// can never impersonate another component.
#[derive(Clone)]
pub struct ServiceReporter {
    store: Arc<dyn LabStore>,
    lab_id: String,
    service: ServiceName,
}

impl ServiceReporter {
    #[must_use]
    pub fn new(store: Arc<dyn LabStore>, lab_id: impl Into<String>, service: ServiceName) -> Self {
        Self {
            store,
            lab_id: lab_id.into(),
            service,
        }
    }

    /// Build a reporter for the lab id found in `LAB_ID`.
    pub fn from_env(store: Arc<dyn LabStore>, service: ServiceName) -> Result<Self> {
        let lab_id = std::env::var(ENV_LAB_ID)
            .ok()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| StoreError::Config(format!("{ENV_LAB_ID} is not set")))?;
        Ok(Self::new(store, lab_id, service))
    }

    #[must_use]
    pub fn lab_id(&self) -> &str {
        &self.lab_id
    }

    #[must_use]
    pub const fn service(&self) -> ServiceName {
        self.service
    }

    pub async fn report(&self, status: LabStatus, message: impl Into<String> + Send) -> Result<()> {
        let entry = ProgressEntry::now(self.service, status, message);
        self.store.append_progress(&self.lab_id, entry).await?;
        Ok(())
    }

    /// Signal that this service is ready to serve requests.
    pub async fn report_active(&self, message: impl Into<String> + Send) -> Result<()> {
        let message = message.into();
        info!(lab_id = %self.lab_id, service = %self.service, "{}", message);
        self.report(LabStatus::Active, message).await
    }

    /// Refresh the lab's idle timer after user activity.
    pub async fn heartbeat(&self) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        if !self.store.touch_monitor_entry(&self.lab_id, now).await? {
            warn!(lab_id = %self.lab_id, "Heartbeat for a lab that is not monitored yet");
        }
        Ok(())
    }
}
