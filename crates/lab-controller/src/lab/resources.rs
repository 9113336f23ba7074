//! Cluster access for lab resources.
//!
//! The orchestrator only ever needs three verbs against the cluster: check
//! whether a named object exists, create a rendered object, and delete a named
//! object. [`ClusterApi`] captures exactly that so lifecycle logic can run
//! against [`KubeCluster`] in production and a recording fake in tests.

use async_trait::async_trait;
use k8s_openapi::api::{
    apps::v1::Deployment,
    batch::v1::{CronJob, Job},
    core::v1::{ConfigMap, Namespace, Secret, Service},
    networking::v1::Ingress,
};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, PostParams, PropagationPolicy};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Resource kinds the orchestrator manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Namespace,
    Deployment,
    Service,
    Ingress,
    Job,
    CronJob,
    ConfigMap,
    Secret,
}

impl ResourceKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Namespace => "Namespace",
            Self::Deployment => "Deployment",
            Self::Service => "Service",
            Self::Ingress => "Ingress",
            Self::Job => "Job",
            Self::CronJob => "CronJob",
            Self::ConfigMap => "ConfigMap",
            Self::Secret => "Secret",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A kind plus name, enough to look up or delete an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceRef {
    #[must_use]
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// A fully rendered, typed cluster object.
#[derive(Debug, Clone)]
pub enum LabResource {
    Namespace(Namespace),
    Deployment(Deployment),
    Service(Service),
    Ingress(Ingress),
    Job(Job),
    CronJob(CronJob),
    ConfigMap(ConfigMap),
    Secret(Secret),
}

impl LabResource {
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::Namespace(_) => ResourceKind::Namespace,
            Self::Deployment(_) => ResourceKind::Deployment,
            Self::Service(_) => ResourceKind::Service,
            Self::Ingress(_) => ResourceKind::Ingress,
            Self::Job(_) => ResourceKind::Job,
            Self::CronJob(_) => ResourceKind::CronJob,
            Self::ConfigMap(_) => ResourceKind::ConfigMap,
            Self::Secret(_) => ResourceKind::Secret,
        }
    }

    /// `metadata.name`, empty when the manifest left it unset.
    #[must_use]
    pub fn name(&self) -> &str {
        let meta = match self {
            Self::Namespace(r) => &r.metadata,
            Self::Deployment(r) => &r.metadata,
            Self::Service(r) => &r.metadata,
            Self::Ingress(r) => &r.metadata,
            Self::Job(r) => &r.metadata,
            Self::CronJob(r) => &r.metadata,
            Self::ConfigMap(r) => &r.metadata,
            Self::Secret(r) => &r.metadata,
        };
        meta.name.as_deref().unwrap_or_default()
    }

    #[must_use]
    pub fn reference(&self) -> ResourceRef {
        ResourceRef::new(self.kind(), self.name())
    }
}

/// How dependents of a deleted object are cleaned up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Propagation {
    /// Let the API server's default apply
    #[default]
    Default,
    /// Return immediately and let the garbage collector remove dependents
    Background,
    Foreground,
}

impl Propagation {
    fn delete_params(self) -> DeleteParams {
        let propagation_policy = match self {
            Self::Default => None,
            Self::Background => Some(PropagationPolicy::Background),
            Self::Foreground => Some(PropagationPolicy::Foreground),
        };
        DeleteParams {
            propagation_policy,
            ..Default::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Cluster call timed out after {0:?}")]
    Timeout(Duration),
}

impl ClusterError {
    /// HTTP status returned by the API server, if the call got that far.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Kube(kube::Error::Api(response)) => Some(response.code),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404)
    }

    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        self.status_code() == Some(409)
    }
}

/// Bound a cluster call by `limit`.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, ClusterError>
where
    F: Future<Output = Result<T, ClusterError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| ClusterError::Timeout(limit))?
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// `Ok(false)` when the object does not exist. `namespace` is ignored for
    /// cluster-scoped kinds.
    async fn exists(&self, namespace: &str, target: &ResourceRef) -> Result<bool, ClusterError>;

    async fn create(&self, namespace: &str, resource: &LabResource) -> Result<(), ClusterError>;

    async fn delete(
        &self,
        namespace: &str,
        target: &ResourceRef,
        propagation: Propagation,
    ) -> Result<(), ClusterError>;
}

/// [`ClusterApi`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }
}

async fn get_exists<K>(api: Api<K>, name: &str) -> Result<bool, ClusterError>
where
    K: Clone + DeserializeOwned + fmt::Debug,
{
    match api.get(name).await {
        Ok(_) => Ok(true),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
        Err(e) => Err(e.into()),
    }
}

async fn create_in<K>(api: Api<K>, resource: &K) -> Result<(), ClusterError>
where
    K: Clone + DeserializeOwned + Serialize + fmt::Debug,
{
    api.create(&PostParams::default(), resource).await?;
    Ok(())
}

async fn delete_in<K>(api: Api<K>, name: &str, params: &DeleteParams) -> Result<(), ClusterError>
where
    K: Clone + DeserializeOwned + fmt::Debug,
{
    api.delete(name, params).await?;
    Ok(())
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn exists(&self, namespace: &str, target: &ResourceRef) -> Result<bool, ClusterError> {
        let name = target.name.as_str();
        match target.kind {
            ResourceKind::Namespace => get_exists(self.namespaces(), name).await,
            ResourceKind::Deployment => {
                get_exists(self.namespaced::<Deployment>(namespace), name).await
            }
            ResourceKind::Service => get_exists(self.namespaced::<Service>(namespace), name).await,
            ResourceKind::Ingress => get_exists(self.namespaced::<Ingress>(namespace), name).await,
            ResourceKind::Job => get_exists(self.namespaced::<Job>(namespace), name).await,
            ResourceKind::CronJob => get_exists(self.namespaced::<CronJob>(namespace), name).await,
            ResourceKind::ConfigMap => {
                get_exists(self.namespaced::<ConfigMap>(namespace), name).await
            }
            ResourceKind::Secret => get_exists(self.namespaced::<Secret>(namespace), name).await,
        }
    }

    async fn create(&self, namespace: &str, resource: &LabResource) -> Result<(), ClusterError> {
        match resource {
            LabResource::Namespace(r) => create_in(self.namespaces(), r).await,
            LabResource::Deployment(r) => create_in(self.namespaced(namespace), r).await,
            LabResource::Service(r) => create_in(self.namespaced(namespace), r).await,
            LabResource::Ingress(r) => create_in(self.namespaced(namespace), r).await,
            LabResource::Job(r) => create_in(self.namespaced(namespace), r).await,
            LabResource::CronJob(r) => create_in(self.namespaced(namespace), r).await,
            LabResource::ConfigMap(r) => create_in(self.namespaced(namespace), r).await,
            LabResource::Secret(r) => create_in(self.namespaced(namespace), r).await,
        }
    }

    async fn delete(
        &self,
        namespace: &str,
        target: &ResourceRef,
        propagation: Propagation,
    ) -> Result<(), ClusterError> {
        let params = propagation.delete_params();
        let name = target.name.as_str();
        match target.kind {
            ResourceKind::Namespace => delete_in(self.namespaces(), name, &params).await,
            ResourceKind::Deployment => {
                delete_in(self.namespaced::<Deployment>(namespace), name, &params).await
            }
            ResourceKind::Service => {
                delete_in(self.namespaced::<Service>(namespace), name, &params).await
            }
            ResourceKind::Ingress => {
                delete_in(self.namespaced::<Ingress>(namespace), name, &params).await
            }
            ResourceKind::Job => delete_in(self.namespaced::<Job>(namespace), name, &params).await,
            ResourceKind::CronJob => {
                delete_in(self.namespaced::<CronJob>(namespace), name, &params).await
            }
            ResourceKind::ConfigMap => {
                delete_in(self.namespaced::<ConfigMap>(namespace), name, &params).await
            }
            ResourceKind::Secret => {
                delete_in(self.namespaced::<Secret>(namespace), name, &params).await
            }
        }
    }
}
