//! Resource Template Engine
//!
//! Manifests live as Handlebars templates under `templates/` and are embedded
//! at compile time. Rendering is pure: a template name plus parameters go in,
//! a typed [`LabResource`] comes out, and nothing touches the cluster.

use handlebars::{handlebars_helper, Handlebars};
use lab_state::store::{LABS_MONITOR_KEY, LAB_INSTANCES_KEY};
use lab_storage::boilerplate_prefix;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use thiserror::Error;

use super::config::ControllerConfig;
use super::naming::{
    ResourceNaming, CLEANUP_CONFIGMAP_NAME, CLEANUP_CRONJOB_NAME, CLEANUP_SECRET_NAME,
};
use super::resources::{LabResource, ResourceKind};

/// Port of the user's application preview server
pub const PREVIEW_PORT: u16 = 3000;
/// Port of the workspace filesystem sidecar
pub const FILE_SYSTEM_PORT: u16 = 8081;
/// Port of the terminal sidecar
pub const PTY_PORT: u16 = 8082;

const NAMESPACE_TEMPLATE: &str = include_str!("../../templates/namespace.yaml.hbs");
const DEPLOYMENT_TEMPLATE: &str = include_str!("../../templates/deployment.yaml.hbs");
const SERVICE_TEMPLATE: &str = include_str!("../../templates/service.yaml.hbs");
const INGRESS_TEMPLATE: &str = include_str!("../../templates/ingress.yaml.hbs");
const SSL_JOB_TEMPLATE: &str = include_str!("../../templates/ssl-progress-job.yaml.hbs");
const CLEANUP_CRONJOB_TEMPLATE: &str = include_str!("../../templates/cleanup-cronjob.yaml.hbs");
const CLEANUP_CONFIGMAP_TEMPLATE: &str =
    include_str!("../../templates/cleanup-configmap.yaml.hbs");
const CLEANUP_SECRET_TEMPLATE: &str = include_str!("../../templates/cleanup-secret.yaml.hbs");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateName {
    Namespace,
    Deployment,
    Service,
    Ingress,
    SslProgressJob,
    CleanupCronJob,
    CleanupConfigMap,
    CleanupSecret,
}

impl TemplateName {
    pub const ALL: [TemplateName; 8] = [
        Self::Namespace,
        Self::Deployment,
        Self::Service,
        Self::Ingress,
        Self::SslProgressJob,
        Self::CleanupCronJob,
        Self::CleanupConfigMap,
        Self::CleanupSecret,
    ];

    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            Self::Namespace => "namespace",
            Self::Deployment => "deployment",
            Self::Service => "service",
            Self::Ingress => "ingress",
            Self::SslProgressJob => "ssl-progress-job",
            Self::CleanupCronJob => "cleanup-cronjob",
            Self::CleanupConfigMap => "cleanup-configmap",
            Self::CleanupSecret => "cleanup-secret",
        }
    }

    /// Kind of object the template produces
    #[must_use]
    pub const fn kind(self) -> ResourceKind {
        match self {
            Self::Namespace => ResourceKind::Namespace,
            Self::Deployment => ResourceKind::Deployment,
            Self::Service => ResourceKind::Service,
            Self::Ingress => ResourceKind::Ingress,
            Self::SslProgressJob => ResourceKind::Job,
            Self::CleanupCronJob => ResourceKind::CronJob,
            Self::CleanupConfigMap => ResourceKind::ConfigMap,
            Self::CleanupSecret => ResourceKind::Secret,
        }
    }

    const fn source(self) -> &'static str {
        match self {
            Self::Namespace => NAMESPACE_TEMPLATE,
            Self::Deployment => DEPLOYMENT_TEMPLATE,
            Self::Service => SERVICE_TEMPLATE,
            Self::Ingress => INGRESS_TEMPLATE,
            Self::SslProgressJob => SSL_JOB_TEMPLATE,
            Self::CleanupCronJob => CLEANUP_CRONJOB_TEMPLATE,
            Self::CleanupConfigMap => CLEANUP_CONFIGMAP_TEMPLATE,
            Self::CleanupSecret => CLEANUP_SECRET_TEMPLATE,
        }
    }
}

impl fmt::Display for TemplateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Failed to register template '{template}': {message}")]
    Registration {
        template: TemplateName,
        message: String,
    },

    #[error("Missing required template parameter '{0}'")]
    MissingParameter(&'static str),

    #[error("Failed to render template '{template}': {message}")]
    Render {
        template: TemplateName,
        message: String,
    },

    #[error("Template '{template}' did not produce a valid {kind}: {message}")]
    InvalidManifest {
        template: TemplateName,
        kind: ResourceKind,
        message: String,
    },
}

/// Per-lab template parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpinUpParameters {
    pub lab_id: String,
    pub language: String,
    pub app_name: String,
    pub bucket: String,
    /// Object-store prefix the workspace is seeded from
    pub key: String,
    pub namespace: String,
    pub should_create_namespace: bool,
    pub project_slug: Option<String>,
}

impl SpinUpParameters {
    /// Playground parameters: seeded from the language boilerplate.
    #[must_use]
    pub fn new(config: &ControllerConfig, language: &str, lab_id: &str) -> Self {
        Self {
            lab_id: lab_id.to_string(),
            language: language.to_string(),
            app_name: ResourceNaming::app_name(language, lab_id),
            bucket: config.storage.bucket.clone(),
            key: boilerplate_prefix(language),
            namespace: config.namespace.clone(),
            should_create_namespace: config.create_namespace,
            project_slug: None,
        }
    }

    /// Seed the workspace from a quest's boilerplate instead.
    #[must_use]
    pub fn for_quest(mut self, project_slug: &str, boilerplate_key: &str) -> Self {
        self.project_slug = Some(project_slug.to_string());
        self.key = boilerplate_key.to_string();
        self
    }

    fn check(&self) -> Result<(), TemplateError> {
        for (name, value) in [
            ("labId", &self.lab_id),
            ("language", &self.language),
            ("appName", &self.app_name),
            ("bucket", &self.bucket),
            ("key", &self.key),
            ("namespace", &self.namespace),
        ] {
            if value.trim().is_empty() {
                return Err(TemplateError::MissingParameter(name));
            }
        }
        Ok(())
    }
}

handlebars_helper!(json_literal: |value: Json| serde_json::to_string(value).unwrap_or_default());

/// Renders the embedded manifests for one controller configuration.
pub struct ResourceTemplates {
    registry: Handlebars<'static>,
    config: ControllerConfig,
    redis_uri: String,
}

impl ResourceTemplates {
    /// `redis_uri` ends up in the cleanup Secret, which is also where lab
    /// pods and jobs read it from.
    pub fn new(config: ControllerConfig, redis_uri: impl Into<String>) -> Result<Self, TemplateError> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry.register_escape_fn(handlebars::no_escape);
        registry.register_helper("json", Box::new(json_literal));

        for template in TemplateName::ALL {
            registry
                .register_template_string(template.id(), template.source())
                .map_err(|e| TemplateError::Registration {
                    template,
                    message: e.to_string(),
                })?;
        }

        Ok(Self {
            registry,
            config,
            redis_uri: redis_uri.into(),
        })
    }

    /// Render a template into a typed resource.
    pub fn render(
        &self,
        template: TemplateName,
        params: &SpinUpParameters,
    ) -> Result<LabResource, TemplateError> {
        params.check()?;
        let yaml = self.render_manifest(template, &self.context(params))?;

        let resource = match template {
            TemplateName::Namespace => LabResource::Namespace(parse(template, &yaml)?),
            TemplateName::Deployment => LabResource::Deployment(parse(template, &yaml)?),
            TemplateName::Service => LabResource::Service(parse(template, &yaml)?),
            TemplateName::Ingress => LabResource::Ingress(parse(template, &yaml)?),
            TemplateName::SslProgressJob => LabResource::Job(parse(template, &yaml)?),
            TemplateName::CleanupCronJob => LabResource::CronJob(parse(template, &yaml)?),
            TemplateName::CleanupConfigMap => LabResource::ConfigMap(parse(template, &yaml)?),
            TemplateName::CleanupSecret => LabResource::Secret(parse(template, &yaml)?),
        };
        Ok(resource)
    }

    /// Render a template to YAML against an arbitrary context.
    pub fn render_manifest<T: Serialize>(
        &self,
        template: TemplateName,
        context: &T,
    ) -> Result<String, TemplateError> {
        self.registry
            .render(template.id(), context)
            .map_err(|e| TemplateError::Render {
                template,
                message: e.to_string(),
            })
    }

    fn context(&self, params: &SpinUpParameters) -> Value {
        let lab_id = params.lab_id.as_str();
        let config = &self.config;
        let image = config.images.for_language(&params.language);

        json!({
            "labId": lab_id,
            "language": params.language,
            "appName": params.app_name,
            "namespace": params.namespace,
            "bucket": params.bucket,
            "seedKey": params.key,
            "projectSlug": params.project_slug,
            "host": ResourceNaming::host(lab_id, &config.ingress.domain),
            "names": {
                "deployment": ResourceNaming::deployment_name(lab_id),
                "service": ResourceNaming::service_name(lab_id),
                "ingress": ResourceNaming::ingress_name(lab_id),
                "sslJob": ResourceNaming::ssl_job_name(lab_id),
                "tlsSecret": ResourceNaming::tls_secret_name(lab_id),
                "cleanupCronJob": CLEANUP_CRONJOB_NAME,
                "cleanupConfigMap": CLEANUP_CONFIGMAP_NAME,
                "cleanupSecret": CLEANUP_SECRET_NAME,
            },
            "image": {
                "reference": image.reference(),
                "pullPolicy": config.images.pull_policy,
            },
            "imagePullSecrets": config.images.image_pull_secrets,
            "ports": {
                "preview": PREVIEW_PORT,
                "fileSystem": FILE_SYSTEM_PORT,
                "pty": PTY_PORT,
            },
            "ingress": {
                "className": config.ingress.class_name,
                "clusterIssuer": config.ingress.cluster_issuer,
            },
            "sslJob": {
                "image": config.ssl_job.image.reference(),
                "activeDeadlineSeconds": config.ssl_job.active_deadline_seconds,
                "ttlSecondsAfterFinished": config.ssl_job.ttl_seconds_after_finished,
                "serviceAccountName": config.ssl_job.service_account_name,
            },
            "cleanup": {
                "schedule": config.cleanup.schedule,
                "idleTimeoutMinutes": config.cleanup.idle_timeout_minutes,
                "image": config.cleanup.image.reference(),
                "serviceAccountName": config.cleanup.service_account_name,
            },
            "stateKeys": {
                "instances": LAB_INSTANCES_KEY,
                "monitor": LABS_MONITOR_KEY,
            },
            "redisUri": self.redis_uri,
        })
    }
}

fn parse<T: DeserializeOwned>(template: TemplateName, yaml: &str) -> Result<T, TemplateError> {
    serde_yaml::from_str(yaml).map_err(|e| TemplateError::InvalidManifest {
        template,
        kind: template.kind(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lab_state::store::redis_store::ENV_REDIS_URI;

    fn engine() -> ResourceTemplates {
        ResourceTemplates::new(ControllerConfig::default(), "redis://redis:6379").unwrap()
    }

    fn params() -> SpinUpParameters {
        SpinUpParameters::new(&ControllerConfig::default(), "node", "abc123")
    }

    #[test]
    fn test_every_template_renders_its_kind() {
        let engine = engine();
        for template in TemplateName::ALL {
            let resource = engine.render(template, &params()).unwrap();
            assert_eq!(resource.kind(), template.kind(), "template {template}");
            assert!(!resource.name().is_empty(), "template {template}");
        }
    }

    #[test]
    fn test_per_lab_names() {
        let engine = engine();
        let p = params();
        let name = |t| engine.render(t, &p).unwrap().name().to_string();
        assert_eq!(name(TemplateName::Namespace), "devsarena");
        assert_eq!(name(TemplateName::Deployment), "abc123-deployment");
        assert_eq!(name(TemplateName::Service), "abc123-service");
        assert_eq!(name(TemplateName::Ingress), "abc123-ingress");
        assert_eq!(name(TemplateName::SslProgressJob), "abc123-ssl-progress-job");
        assert_eq!(name(TemplateName::CleanupCronJob), CLEANUP_CRONJOB_NAME);
        assert_eq!(name(TemplateName::CleanupConfigMap), CLEANUP_CONFIGMAP_NAME);
        assert_eq!(name(TemplateName::CleanupSecret), CLEANUP_SECRET_NAME);
    }

    #[test]
    fn test_deployment_carries_lab_environment() {
        let LabResource::Deployment(deployment) =
            engine().render(TemplateName::Deployment, &params()).unwrap()
        else {
            panic!("expected a deployment");
        };
        let pod = deployment.spec.unwrap().template.spec.unwrap();
        let container = &pod.containers[0];
        assert_eq!(container.image.as_deref(), Some("ghcr.io/5dlabs/lab-runtime:latest"));

        let env = container.env.clone().unwrap();
        let value = |name: &str| {
            env.iter()
                .find(|var| var.name == name)
                .and_then(|var| var.value.clone())
        };
        assert_eq!(value("LAB_ID").as_deref(), Some("abc123"));
        assert_eq!(value("LANGUAGE").as_deref(), Some("node"));
        assert_eq!(value("AWS_S3_BUCKET_NAME").as_deref(), Some("devsarena"));
        assert_eq!(value("S3_SEED_KEY").as_deref(), Some("boilerplate/node/"));
        assert_eq!(value("PROJECT_SLUG"), None);

        let ports: Vec<i32> = container
            .ports
            .clone()
            .unwrap()
            .iter()
            .map(|p| p.container_port)
            .collect();
        assert_eq!(ports, vec![3000, 8081, 8082]);
        assert!(pod.image_pull_secrets.is_none());
    }

    #[test]
    fn test_quest_parameters_change_seed() {
        let p = params().for_quest("intro-to-http", "quests/intro-to-http/boilerplate/");
        let LabResource::Deployment(deployment) =
            engine().render(TemplateName::Deployment, &p).unwrap()
        else {
            panic!("expected a deployment");
        };
        let env = deployment.spec.unwrap().template.spec.unwrap().containers[0]
            .env
            .clone()
            .unwrap();
        let seed = env.iter().find(|v| v.name == "S3_SEED_KEY").unwrap();
        assert_eq!(seed.value.as_deref(), Some("quests/intro-to-http/boilerplate/"));
        let slug = env.iter().find(|v| v.name == "PROJECT_SLUG").unwrap();
        assert_eq!(slug.value.as_deref(), Some("intro-to-http"));
    }

    #[test]
    fn test_ingress_host_and_tls() {
        let LabResource::Ingress(ingress) =
            engine().render(TemplateName::Ingress, &params()).unwrap()
        else {
            panic!("expected an ingress");
        };
        let annotations = ingress.metadata.annotations.unwrap();
        assert_eq!(
            annotations.get("cert-manager.io/cluster-issuer").map(String::as_str),
            Some("letsencrypt-prod")
        );
        let spec = ingress.spec.unwrap();
        let tls = &spec.tls.unwrap()[0];
        assert_eq!(tls.hosts.clone().unwrap(), vec!["abc123.labs.devsarena.dev"]);
        assert_eq!(tls.secret_name.as_deref(), Some("abc123-tls"));
        assert_eq!(
            spec.rules.unwrap()[0].host.as_deref(),
            Some("abc123.labs.devsarena.dev")
        );
    }

    #[test]
    fn test_cleanup_secret_escapes_values() {
        let engine =
            ResourceTemplates::new(ControllerConfig::default(), "redis://:p\"a:ss@redis:6379")
                .unwrap();
        let LabResource::Secret(secret) =
            engine.render(TemplateName::CleanupSecret, &params()).unwrap()
        else {
            panic!("expected a secret");
        };
        let data = secret.string_data.unwrap();
        assert_eq!(data[ENV_REDIS_URI], "redis://:p\"a:ss@redis:6379");
    }

    #[test]
    fn test_lab_pods_read_store_uri_from_cleanup_secret() {
        let engine = engine();
        let p = params();
        let LabResource::Deployment(deployment) =
            engine.render(TemplateName::Deployment, &p).unwrap()
        else {
            panic!("expected a deployment");
        };
        let LabResource::Job(job) = engine.render(TemplateName::SslProgressJob, &p).unwrap() else {
            panic!("expected a job");
        };

        let pods = [
            deployment.spec.unwrap().template.spec.unwrap(),
            job.spec.unwrap().template.spec.unwrap(),
        ];
        for pod in pods {
            let env = pod.containers[0].env.clone().unwrap();
            let var = env.iter().find(|v| v.name == ENV_REDIS_URI).unwrap();
            let secret_ref = var
                .value_from
                .as_ref()
                .and_then(|source| source.secret_key_ref.as_ref())
                .unwrap();
            assert_eq!(secret_ref.name, CLEANUP_SECRET_NAME);
            assert_eq!(secret_ref.key, ENV_REDIS_URI);
        }
    }

    #[test]
    fn test_missing_parameter_is_rejected() {
        let mut p = params();
        p.lab_id = String::new();
        let err = engine().render(TemplateName::Deployment, &p).unwrap_err();
        assert!(matches!(err, TemplateError::MissingParameter("labId")));
    }

    #[test]
    fn test_strict_mode_rejects_incomplete_context() {
        let err = engine()
            .render_manifest(TemplateName::Service, &json!({ "labId": "abc123" }))
            .unwrap_err();
        assert!(matches!(
            err,
            TemplateError::Render {
                template: TemplateName::Service,
                ..
            }
        ));
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let engine = engine();
        let first = engine.render_manifest(TemplateName::Ingress, &engine.context(&params()));
        let second = engine.render_manifest(TemplateName::Ingress, &engine.context(&params()));
        assert_eq!(first.unwrap(), second.unwrap());
    }
}
