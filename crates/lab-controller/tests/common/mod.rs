#![allow(dead_code)]

use async_trait::async_trait;
use kube::core::ErrorResponse;
use lab_controller::lab::{
    ClusterApi, ClusterError, ControllerConfig, LabOrchestrator, LabResource, Propagation,
    QuestCatalog, QuestMetadata, ResourceKind, ResourceRef, ResourceTemplates,
};
use lab_state::MemoryLabStore;
use lab_storage::MemoryObjectStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One call made against the fake cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Exists(ResourceRef),
    Create(ResourceRef),
    Delete(ResourceRef, Propagation),
}

#[derive(Default)]
struct FakeState {
    objects: HashMap<ResourceRef, LabResource>,
    calls: Vec<Call>,
    failing_creates: Option<ResourceKind>,
    failing_deletes: Option<ResourceKind>,
    hide_existing: bool,
    exists_delay: Option<Duration>,
}

/// In-memory cluster that records every call and mimics API server statuses.
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<FakeState>,
}

pub fn api_error(code: u16, reason: &str) -> ClusterError {
    ClusterError::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{reason} (fake)"),
        reason: reason.to_string(),
        code,
    }))
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates of `kind` fail with a 500.
    pub fn fail_creates_of(&self, kind: ResourceKind) {
        self.state.lock().unwrap().failing_creates = Some(kind);
    }

    /// Deletes of `kind` fail with a 500.
    pub fn fail_deletes_of(&self, kind: ResourceKind) {
        self.state.lock().unwrap().failing_deletes = Some(kind);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock().unwrap();
        state.failing_creates = None;
        state.failing_deletes = None;
    }

    /// Report every object as absent, as if another writer created it after the lookup.
    pub fn hide_existing(&self) {
        self.state.lock().unwrap().hide_existing = true;
    }

    pub fn delay_lookups(&self, delay: Duration) {
        self.state.lock().unwrap().exists_delay = Some(delay);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn reset_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn created(&self) -> Vec<ResourceRef> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Create(target) => Some(target),
                _ => None,
            })
            .collect()
    }

    pub fn contains(&self, kind: ResourceKind, name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .objects
            .contains_key(&ResourceRef::new(kind, name))
    }

    pub fn get(&self, kind: ResourceKind, name: &str) -> Option<LabResource> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&ResourceRef::new(kind, name))
            .cloned()
    }

    pub fn object_count(&self) -> usize {
        self.state.lock().unwrap().objects.len()
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn exists(&self, _namespace: &str, target: &ResourceRef) -> Result<bool, ClusterError> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::Exists(target.clone()));
            state.exists_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let state = self.state.lock().unwrap();
        Ok(!state.hide_existing && state.objects.contains_key(target))
    }

    async fn create(&self, _namespace: &str, resource: &LabResource) -> Result<(), ClusterError> {
        let target = resource.reference();
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Create(target.clone()));
        if state.failing_creates == Some(target.kind) {
            return Err(api_error(500, "InternalError"));
        }
        if state.objects.contains_key(&target) {
            return Err(api_error(409, "AlreadyExists"));
        }
        state.objects.insert(target, resource.clone());
        Ok(())
    }

    async fn delete(
        &self,
        _namespace: &str,
        target: &ResourceRef,
        propagation: Propagation,
    ) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Delete(target.clone(), propagation));
        if state.failing_deletes == Some(target.kind) {
            return Err(api_error(500, "InternalError"));
        }
        match state.objects.remove(target) {
            Some(_) => Ok(()),
            None => Err(api_error(404, "NotFound")),
        }
    }
}

/// Fixed set of quests.
#[derive(Default)]
pub struct StaticCatalog {
    quests: HashMap<String, QuestMetadata>,
}

impl StaticCatalog {
    pub fn with_quest(mut self, slug: &str, boilerplate_key: &str) -> Self {
        self.quests.insert(
            slug.to_string(),
            QuestMetadata {
                slug: slug.to_string(),
                name: format!("Quest {slug}"),
                boilerplate_key: boilerplate_key.to_string(),
            },
        );
        self
    }
}

#[async_trait]
impl QuestCatalog for StaticCatalog {
    async fn find_quest(&self, slug: &str) -> lab_controller::Result<Option<QuestMetadata>> {
        Ok(self.quests.get(slug).cloned())
    }
}

pub struct Harness {
    pub cluster: Arc<FakeCluster>,
    pub store: Arc<MemoryLabStore>,
    pub objects: Arc<MemoryObjectStore>,
    pub orchestrator: Arc<LabOrchestrator>,
}

pub fn harness_with(config: ControllerConfig, catalog: StaticCatalog) -> Harness {
    let cluster = Arc::new(FakeCluster::new());
    let store = Arc::new(MemoryLabStore::new());
    let objects = Arc::new(MemoryObjectStore::new());
    let templates =
        Arc::new(ResourceTemplates::new(config.clone(), "redis://redis:6379").unwrap());
    let orchestrator = Arc::new(LabOrchestrator::new(
        cluster.clone(),
        store.clone(),
        objects.clone(),
        Arc::new(catalog),
        templates,
        Arc::new(config),
    ));
    Harness {
        cluster,
        store,
        objects,
        orchestrator,
    }
}

pub fn harness() -> Harness {
    harness_with(
        ControllerConfig::default(),
        StaticCatalog::default().with_quest("http-server", "quests/http-server/boilerplate/"),
    )
}
