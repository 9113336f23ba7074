//! Admission control for new labs.
//!
//! The cap is soft: the count is read, compared and then acted on without a
//! lock, so concurrent starts can briefly overshoot it.

use lab_state::LabStore;
use std::sync::Arc;
use tracing::debug;

use super::types::{Error, Result};

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied { current: usize, limit: usize },
}

impl Admission {
    #[must_use]
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// `Err(CapacityExceeded)` when denied.
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Allowed => Ok(()),
            Self::Denied { current, limit } => Err(Error::CapacityExceeded { current, limit }),
        }
    }
}

/// Compare the monitored lab count against the configured cap.
///
/// A `limit` of zero disables the cap.
#[must_use]
pub const fn check_admission(count: usize, limit: usize) -> Admission {
    if limit > 0 && count >= limit {
        Admission::Denied {
            current: count,
            limit,
        }
    } else {
        Admission::Allowed
    }
}

#[derive(Clone)]
pub struct AdmissionController {
    store: Arc<dyn LabStore>,
    limit: usize,
}

impl AdmissionController {
    #[must_use]
    pub fn new(store: Arc<dyn LabStore>, limit: usize) -> Self {
        Self { store, limit }
    }

    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Make sure the monitor collection and instance table exist. Idempotent.
    pub async fn initialize(&self) -> Result<()> {
        self.store.initialize().await?;
        Ok(())
    }

    pub async fn active_lab_count(&self) -> Result<usize> {
        Ok(self.store.active_lab_count().await?)
    }

    /// Read the current count and decide.
    pub async fn admit(&self) -> Result<Admission> {
        let count = self.active_lab_count().await?;
        let decision = check_admission(count, self.limit);
        debug!(count, limit = self.limit, ?decision, "Admission check");
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lab_state::{MemoryLabStore, MonitoringEntry};

    #[test]
    fn test_threshold() {
        assert_eq!(check_admission(0, 5), Admission::Allowed);
        assert_eq!(check_admission(4, 5), Admission::Allowed);
        assert_eq!(
            check_admission(5, 5),
            Admission::Denied {
                current: 5,
                limit: 5
            }
        );
        assert!(!check_admission(9, 5).is_allowed());
    }

    #[test]
    fn test_zero_limit_disables_cap() {
        assert!(check_admission(1_000, 0).is_allowed());
    }

    #[test]
    fn test_denial_maps_to_capacity_error() {
        let err = check_admission(2, 2).into_result().unwrap_err();
        assert!(matches!(
            err,
            Error::CapacityExceeded {
                current: 2,
                limit: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_counts_monitor_entries() {
        let store = Arc::new(MemoryLabStore::new());
        let admission = AdmissionController::new(store.clone(), 2);
        admission.initialize().await.unwrap();
        admission.initialize().await.unwrap();
        assert_eq!(admission.admit().await.unwrap(), Admission::Allowed);

        for lab_id in ["a", "b"] {
            store
                .push_monitor_entry(MonitoringEntry {
                    lab_id: lab_id.to_string(),
                    status: lab_state::LabStatus::Active,
                    created_at: 1,
                    last_updated_at: 1,
                })
                .await;
        }
        assert_eq!(admission.active_lab_count().await.unwrap(), 2);
        assert!(!admission.admit().await.unwrap().is_allowed());
    }
}
