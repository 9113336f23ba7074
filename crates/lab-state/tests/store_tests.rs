//! Behavioural tests for the lab state store contract.

use lab_state::{
    LabInstance, LabStatus, LabStore, MemoryLabStore, MonitoringEntry, ProgressEntry,
    ServiceName, ServiceReporter,
};
use std::sync::Arc;

fn entry(service: ServiceName, status: LabStatus, ts: i64) -> ProgressEntry {
    ProgressEntry {
        timestamp: ts,
        status,
        message: format!("{service} is {status}"),
        service_name: service,
    }
}

async fn store_with_lab(lab_id: &str) -> MemoryLabStore {
    let store = MemoryLabStore::new();
    store
        .create_instance(LabInstance::new(lab_id, "node", 1_000))
        .await
        .unwrap();
    store
}

#[tokio::test]
async fn test_monitor_entry_requires_both_sidecars() {
    let store = store_with_lab("lab-p3").await;

    store
        .append_progress("lab-p3", entry(ServiceName::FileSystem, LabStatus::Active, 1_001))
        .await
        .unwrap();
    assert_eq!(store.active_lab_count().await.unwrap(), 0);

    store
        .append_progress("lab-p3", entry(ServiceName::Pty, LabStatus::Active, 1_002))
        .await
        .unwrap();
    assert_eq!(store.active_lab_count().await.unwrap(), 1);

    store
        .append_progress("lab-p3", entry(ServiceName::FileSystem, LabStatus::Active, 1_003))
        .await
        .unwrap();
    store
        .append_progress("lab-p3", entry(ServiceName::Pty, LabStatus::Active, 1_004))
        .await
        .unwrap();

    let entries = store.monitor_entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].lab_id, "lab-p3");
    assert_eq!(entries[0].last_updated_at, 1_004);
}

#[tokio::test]
async fn test_progress_log_is_append_only_and_status_follows_last_entry() {
    let store = store_with_lab("lab-p5").await;
    let appended = vec![
        entry(ServiceName::Server, LabStatus::Booting, 1_001),
        entry(ServiceName::K8s, LabStatus::Booting, 1_002),
        entry(ServiceName::S3, LabStatus::Active, 1_003),
        entry(ServiceName::Ssl, LabStatus::Error, 1_004),
        entry(ServiceName::Pty, LabStatus::Active, 1_005),
    ];

    for e in &appended {
        store.append_progress("lab-p5", e.clone()).await.unwrap();
    }

    let instance = store.get_instance("lab-p5").await.unwrap().unwrap();
    assert_eq!(instance.progress_logs, appended);
    assert_eq!(instance.status, LabStatus::Active);
    assert_eq!(instance.last_updated_at, 1_005);
    assert_eq!(instance.version, appended.len() as u64);
}

#[tokio::test]
async fn test_append_to_unknown_lab_is_not_found() {
    let store = MemoryLabStore::new();
    let err = store
        .append_progress("ghost", entry(ServiceName::Pty, LabStatus::Active, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, lab_state::StoreError::NotFound(id) if id == "ghost"));
}

#[tokio::test]
async fn test_concurrent_appends_are_not_lost() {
    let store = Arc::new(store_with_lab("lab-race").await);
    let mut handles = Vec::new();
    for i in 0..20 {
        let store = Arc::clone(&store);
        let service = if i % 2 == 0 {
            ServiceName::FileSystem
        } else {
            ServiceName::Pty
        };
        handles.push(tokio::spawn(async move {
            store
                .append_progress("lab-race", entry(service, LabStatus::Active, 2_000 + i))
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let instance = store.get_instance("lab-race").await.unwrap().unwrap();
    assert_eq!(instance.progress_logs.len(), 20);
    assert_eq!(store.active_lab_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_remove_lab_matches_monitor_entries_by_value() {
    let store = store_with_lab("lab-a").await;
    store
        .create_instance(LabInstance::new("lab-b", "go", 1_000))
        .await
        .unwrap();
    for lab in ["lab-a", "lab-b"] {
        store
            .append_progress(lab, entry(ServiceName::FileSystem, LabStatus::Active, 1_001))
            .await
            .unwrap();
        store
            .append_progress(lab, entry(ServiceName::Pty, LabStatus::Active, 1_002))
            .await
            .unwrap();
    }
    assert_eq!(store.active_lab_count().await.unwrap(), 2);

    store.remove_lab("lab-a").await.unwrap();
    store.remove_lab("lab-a").await.unwrap();

    let remaining = store.monitor_entries().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].lab_id, "lab-b");
    assert!(store.get_instance("lab-a").await.unwrap().is_none());
}

#[tokio::test]
async fn test_restart_archives_previous_record() {
    let store = store_with_lab("dup1").await;
    store
        .append_progress("dup1", entry(ServiceName::Server, LabStatus::Booting, 1_001))
        .await
        .unwrap();

    store
        .create_instance(LabInstance::new("dup1", "node", 2_000))
        .await
        .unwrap();

    let current = store.get_instance("dup1").await.unwrap().unwrap();
    assert_eq!(current.status, LabStatus::Created);
    assert!(current.progress_logs.is_empty());

    let archived = store.archived_instances("dup1").await.unwrap();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].created_at, 1_000);
    assert_eq!(archived[0].progress_logs.len(), 1);
}

#[tokio::test]
async fn test_restarts_within_one_second_keep_every_record() {
    let store = store_with_lab("dup2").await;
    for message in ["first", "second"] {
        store
            .append_progress(
                "dup2",
                ProgressEntry {
                    timestamp: 1_000,
                    status: LabStatus::Booting,
                    message: message.to_string(),
                    service_name: ServiceName::Server,
                },
            )
            .await
            .unwrap();
        store
            .create_instance(LabInstance::new("dup2", "node", 1_000))
            .await
            .unwrap();
    }

    let archived = store.archived_instances("dup2").await.unwrap();
    assert_eq!(archived.len(), 2);
    assert_eq!(archived[0].progress_logs[0].message, "first");
    assert_eq!(archived[1].progress_logs[0].message, "second");
}

#[tokio::test]
async fn test_remove_lab_drops_archive() {
    let store = store_with_lab("dup3").await;
    store
        .create_instance(LabInstance::new("dup3", "node", 2_000))
        .await
        .unwrap();
    assert_eq!(store.archived_instances("dup3").await.unwrap().len(), 1);

    store.remove_lab("dup3").await.unwrap();

    assert!(store.archived_instances("dup3").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_touch_updates_only_monitored_labs() {
    let store = MemoryLabStore::new();
    store
        .push_monitor_entry(MonitoringEntry {
            lab_id: "lab-idle".to_string(),
            status: LabStatus::Active,
            created_at: 10,
            last_updated_at: 10,
        })
        .await;

    assert!(store.touch_monitor_entry("lab-idle", 99).await.unwrap());
    assert!(!store.touch_monitor_entry("lab-other", 99).await.unwrap());

    let entries = store.monitor_entries().await.unwrap();
    assert_eq!(entries[0].last_updated_at, 99);
}

#[tokio::test]
async fn test_reporter_writes_its_own_service_name() {
    let store = Arc::new(store_with_lab("lab-rep").await);
    let fs = ServiceReporter::new(store.clone(), "lab-rep", ServiceName::FileSystem);
    let pty = ServiceReporter::new(store.clone(), "lab-rep", ServiceName::Pty);

    fs.report_active("File System Service Started").await.unwrap();
    pty.report_active("PTY Service Started").await.unwrap();
    pty.heartbeat().await.unwrap();

    let instance = store.get_instance("lab-rep").await.unwrap().unwrap();
    let services: Vec<ServiceName> = instance
        .progress_logs
        .iter()
        .map(|e| e.service_name)
        .collect();
    assert_eq!(services, vec![ServiceName::FileSystem, ServiceName::Pty]);
    assert_eq!(store.active_lab_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_dirty_reads_are_recorded() {
    let store = store_with_lab("lab-dirty").await;
    store.record_dirty_read("lab-dirty", "src/app.js").await.unwrap();
    store.record_dirty_read("lab-dirty", "src/app.js").await.unwrap();

    let instance = store.get_instance("lab-dirty").await.unwrap().unwrap();
    assert_eq!(instance.dirty_read_paths, vec!["src/app.js".to_string()]);
}
