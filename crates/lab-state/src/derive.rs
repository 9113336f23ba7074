//! Status derivation: when a lab starts counting against the concurrency cap.

use crate::types::{LabInstance, LabStatus, MonitoringEntry, ProgressEntry, ServiceName};

/// Services that must both report `Active` before a lab is monitored.
pub const READINESS_SERVICES: [ServiceName; 2] = [ServiceName::FileSystem, ServiceName::Pty];

/// Whether a service's `Active` report takes part in lab readiness.
#[must_use]
pub const fn is_readiness_service(service: ServiceName) -> bool {
    match service {
        ServiceName::FileSystem | ServiceName::Pty => true,
        ServiceName::Ssl | ServiceName::Server | ServiceName::S3 | ServiceName::K8s => false,
    }
}

/// Compute the monitor entry to upsert after `appended` was added to `instance`.
///
/// `instance` must already contain `appended`. Returns `None` unless the new
/// entry is `Active` and every readiness service has reported `Active`.
#[must_use]
pub fn monitor_entry_for(
    instance: &LabInstance,
    appended: &ProgressEntry,
) -> Option<MonitoringEntry> {
    if appended.status != LabStatus::Active {
        return None;
    }

    let ready = READINESS_SERVICES
        .iter()
        .all(|service| instance.has_reported_active(*service));
    if !ready {
        return None;
    }

    Some(MonitoringEntry {
        lab_id: instance.lab_id.clone(),
        status: LabStatus::Active,
        created_at: instance.created_at,
        last_updated_at: appended.timestamp,
    })
}
