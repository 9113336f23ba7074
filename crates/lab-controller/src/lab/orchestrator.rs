//! Lab lifecycle orchestration.
//!
//! `start` turns a request into the namespace, deployment, service, ingress,
//! TLS progress job and shared cleanup resources for a lab, recording each
//! step in the lab's progress log. `end` reverses the per-lab part. Every
//! cluster step is create-if-absent or delete-if-present, so both directions
//! converge when retried.

use lab_state::{LabInstance, LabStatus, LabStore, ProgressEntry, ServiceName};
use lab_storage::{boilerplate_prefix, copy_prefix, delete_prefix, ObjectStore, WorkspaceScope};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::admission::AdmissionController;
use super::catalog::QuestCatalog;
use super::config::ControllerConfig;
use super::naming::ResourceNaming;
use super::resources::{
    with_timeout, ClusterApi, ClusterError, LabResource, Propagation, ResourceKind, ResourceRef,
};
use super::templates::{ResourceTemplates, SpinUpParameters, TemplateName};
use super::types::{Error, Result};

/// Result of a create-if-absent step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ensured {
    Created,
    AlreadyExists,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedLab {
    pub lab_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedLab {
    pub lab_id: String,
    /// Workspace objects removed from the bucket
    pub objects_removed: usize,
}

/// Shared collaborators, constructed once at process start.
pub struct LabOrchestrator {
    cluster: Arc<dyn ClusterApi>,
    store: Arc<dyn LabStore>,
    objects: Arc<dyn ObjectStore>,
    catalog: Arc<dyn QuestCatalog>,
    templates: Arc<ResourceTemplates>,
    admission: AdmissionController,
    config: Arc<ControllerConfig>,
}

impl LabOrchestrator {
    #[must_use]
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        store: Arc<dyn LabStore>,
        objects: Arc<dyn ObjectStore>,
        catalog: Arc<dyn QuestCatalog>,
        templates: Arc<ResourceTemplates>,
        config: Arc<ControllerConfig>,
    ) -> Self {
        let admission = AdmissionController::new(store.clone(), config.max_concurrent_labs);
        Self {
            cluster,
            store,
            objects,
            catalog,
            templates,
            admission,
            config,
        }
    }

    #[must_use]
    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    #[must_use]
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Start a playground lab seeded from the language boilerplate.
    #[instrument(skip(self))]
    pub async fn start_lab(&self, language: &str, lab_id: Option<&str>) -> Result<StartedLab> {
        let lab_id = resolve_lab_id(lab_id);
        ResourceNaming::validate(language, &lab_id)?;
        self.admission.admit().await?.into_result()?;

        let params = SpinUpParameters::new(&self.config, language, &lab_id);
        self.provision(&params).await?;
        Ok(StartedLab { lab_id })
    }

    /// Start a lab seeded from a quest's boilerplate.
    #[instrument(skip(self))]
    pub async fn start_quest(
        &self,
        language: &str,
        project_slug: &str,
        lab_id: Option<&str>,
    ) -> Result<StartedLab> {
        let lab_id = resolve_lab_id(lab_id);
        ResourceNaming::validate(language, &lab_id)?;
        if project_slug.trim().is_empty() {
            return Err(Error::Validation("projectSlug is required".to_string()));
        }
        self.admission.admit().await?.into_result()?;

        let quest = self
            .catalog
            .find_quest(project_slug)
            .await?
            .ok_or_else(|| Error::QuestNotFound(project_slug.to_string()))?;

        let boilerplate = if quest.boilerplate_key.trim().is_empty() {
            warn!(
                "Quest '{}' has no boilerplate, seeding from the {} boilerplate",
                project_slug, language
            );
            boilerplate_prefix(language)
        } else {
            quest.boilerplate_key
        };

        let params = SpinUpParameters::new(&self.config, language, &lab_id)
            .for_quest(project_slug, &boilerplate);
        self.provision(&params).await?;
        Ok(StartedLab { lab_id })
    }

    async fn provision(&self, params: &SpinUpParameters) -> Result<()> {
        let lab_id = params.lab_id.as_str();
        info!(
            lab_id = %lab_id,
            bucket = %params.bucket,
            key = %params.key,
            "🚀 Starting to spin up resources"
        );

        let now = chrono::Utc::now().timestamp();
        self.store
            .create_instance(LabInstance::new(lab_id, &params.language, now))
            .await?;
        self.record(
            lab_id,
            ServiceName::Server,
            LabStatus::Booting,
            "Starting to spin up resources",
        )
        .await;

        if let Err(e) = self.spin_up(params).await {
            error!(lab_id = %lab_id, "❌ Failed to spin up lab: {}", e);
            self.record(
                lab_id,
                ServiceName::Server,
                LabStatus::Error,
                format!("Failed to spin up resources: {e}"),
            )
            .await;
            return Err(e);
        }

        info!(lab_id = %lab_id, "✅ Successfully spun up all resources");
        Ok(())
    }

    async fn spin_up(&self, params: &SpinUpParameters) -> Result<()> {
        let lab_id = params.lab_id.as_str();

        if self.config.storage.seed_on_start {
            self.seed_workspace(lab_id, &params.language, &params.key)
                .await?;
        }

        let mut steps = Vec::with_capacity(4);
        if params.should_create_namespace {
            steps.push(TemplateName::Namespace);
        }
        steps.extend([
            TemplateName::Deployment,
            TemplateName::Service,
            TemplateName::Ingress,
        ]);

        for template in steps {
            let resource = self.templates.render(template, params)?;
            if self.ensure_resource(&params.namespace, &resource).await? == Ensured::Created {
                self.record(
                    lab_id,
                    ServiceName::Server,
                    LabStatus::Booting,
                    format!("{} '{}' created successfully", resource.kind(), resource.name()),
                )
                .await;
                if template == TemplateName::Ingress {
                    info!(
                        lab_id = %lab_id,
                        ssl_started_at = %chrono::Utc::now().to_rfc3339(),
                        "TLS issuance started"
                    );
                }
            }
        }

        // Reports TLS progress on its own; not awaited.
        self.ensure(TemplateName::SslProgressJob, params).await?;

        // Shared across labs, so these are usually already present.
        for template in [
            TemplateName::CleanupConfigMap,
            TemplateName::CleanupSecret,
            TemplateName::CleanupCronJob,
        ] {
            self.ensure(template, params).await?;
        }

        Ok(())
    }

    /// Render `template` and create it unless an object with its name exists.
    pub async fn ensure(
        &self,
        template: TemplateName,
        params: &SpinUpParameters,
    ) -> Result<Ensured> {
        let resource = self.templates.render(template, params)?;
        self.ensure_resource(&params.namespace, &resource).await
    }

    /// A create that loses a race to a concurrent creator counts as present.
    async fn ensure_resource(&self, namespace: &str, resource: &LabResource) -> Result<Ensured> {
        let target = resource.reference();
        let limit = self.config.timeouts.cluster_call();
        let creation_error = |source: ClusterError| Error::ResourceCreation {
            kind: target.kind,
            name: target.name.clone(),
            source,
        };

        if with_timeout(limit, self.cluster.exists(namespace, &target))
            .await
            .map_err(creation_error)?
        {
            debug!("{} already exists, skipping", target);
            return Ok(Ensured::AlreadyExists);
        }

        match with_timeout(limit, self.cluster.create(namespace, resource)).await {
            Ok(()) => {
                info!("Created {}", target);
                Ok(Ensured::Created)
            }
            Err(e) if e.is_already_exists() => {
                info!("{} was created concurrently", target);
                Ok(Ensured::AlreadyExists)
            }
            Err(e) => Err(creation_error(e)),
        }
    }

    /// Tear down a lab's cluster resources and forget its state.
    ///
    /// The namespace is shared and never deleted. Deletions that already
    /// happened are not rolled back when a later one fails.
    #[instrument(skip(self))]
    pub async fn end_lab(&self, language: &str, lab_id: &str) -> Result<()> {
        ResourceNaming::validate(language, lab_id)?;
        info!(lab_id = %lab_id, "🧹 Tearing down lab resources");

        for (target, propagation) in teardown_targets(lab_id) {
            self.delete_if_present(&target, propagation).await?;
        }

        self.store.remove_lab(lab_id).await?;
        info!(lab_id = %lab_id, "✅ Lab torn down");
        Ok(())
    }

    /// [`Self::end_lab`] plus removal of the lab's persisted workspace.
    #[instrument(skip(self))]
    pub async fn delete_lab(&self, language: &str, lab_id: &str) -> Result<DeletedLab> {
        self.end_lab(language, lab_id).await?;

        let scope = WorkspaceScope::new(language, lab_id);
        let objects_removed = delete_prefix(self.objects.as_ref(), &scope.prefix()).await?;
        info!(
            lab_id = %lab_id,
            prefix = %scope.prefix(),
            objects_removed,
            "Deleted workspace content"
        );
        Ok(DeletedLab {
            lab_id: lab_id.to_string(),
            objects_removed,
        })
    }

    /// Copy `source_prefix` into the lab's workspace prefix, reporting progress
    /// under the `s3` service.
    #[instrument(skip(self))]
    pub async fn seed_workspace(
        &self,
        lab_id: &str,
        language: &str,
        source_prefix: &str,
    ) -> Result<usize> {
        let scope = WorkspaceScope::new(language, lab_id);
        let source = if source_prefix.ends_with('/') {
            source_prefix.to_string()
        } else {
            format!("{source_prefix}/")
        };

        self.record(
            lab_id,
            ServiceName::S3,
            LabStatus::Booting,
            "Starting file copy from boilerplate",
        )
        .await;

        match copy_prefix(self.objects.as_ref(), &source, &scope.prefix()).await {
            Ok(copied) => {
                info!(lab_id = %lab_id, from = %source, copied, "Seeded workspace");
                self.record(
                    lab_id,
                    ServiceName::S3,
                    LabStatus::Booting,
                    "Files copied successfully, setting up environment",
                )
                .await;
                Ok(copied)
            }
            Err(e) => {
                self.record(
                    lab_id,
                    ServiceName::S3,
                    LabStatus::Error,
                    format!("Failed to copy files: {e}"),
                )
                .await;
                Err(e.into())
            }
        }
    }

    /// Stored instance record, if any.
    pub async fn lab_status(&self, lab_id: &str) -> Result<Option<LabInstance>> {
        ResourceNaming::validate_lab_id(lab_id)?;
        Ok(self.store.get_instance(lab_id).await?)
    }

    async fn delete_if_present(&self, target: &ResourceRef, propagation: Propagation) -> Result<()> {
        let limit = self.config.timeouts.cluster_call();
        match with_timeout(
            limit,
            self.cluster
                .delete(&self.config.namespace, target, propagation),
        )
        .await
        {
            Ok(()) => {
                info!("Deleted {}", target);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!("{} not found, nothing to delete", target);
                Ok(())
            }
            Err(source) => Err(Error::ResourceDeletion {
                kind: target.kind,
                name: target.name.clone(),
                source,
            }),
        }
    }

    /// Progress writes never fail the step that produced them.
    async fn record(
        &self,
        lab_id: &str,
        service: ServiceName,
        status: LabStatus,
        message: impl Into<String>,
    ) {
        let entry = ProgressEntry::now(service, status, message);
        if let Err(e) = self.store.append_progress(lab_id, entry).await {
            warn!(lab_id = %lab_id, "Failed to record progress: {}", e);
        }
    }
}

fn resolve_lab_id(requested: Option<&str>) -> String {
    match requested.map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => Uuid::new_v4().to_string(),
    }
}

/// Per-lab resources in teardown order, with the propagation used for each.
fn teardown_targets(lab_id: &str) -> [(ResourceRef, Propagation); 4] {
    [
        (
            ResourceRef::new(ResourceKind::Job, ResourceNaming::ssl_job_name(lab_id)),
            Propagation::Background,
        ),
        (
            ResourceRef::new(ResourceKind::Deployment, ResourceNaming::deployment_name(lab_id)),
            Propagation::Default,
        ),
        (
            ResourceRef::new(ResourceKind::Service, ResourceNaming::service_name(lab_id)),
            Propagation::Default,
        ),
        (
            ResourceRef::new(ResourceKind::Ingress, ResourceNaming::ingress_name(lab_id)),
            Propagation::Default,
        ),
    ]
}
