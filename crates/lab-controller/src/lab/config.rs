//! Lab Controller Configuration
//!
//! Loaded from a mounted YAML file and then adjusted by a small set of
//! environment overrides. Secrets (Redis URI, object-store credentials) are
//! never part of this file; they are read from the environment by the
//! components that need them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

/// Main controller configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    /// Namespace every lab resource is created in
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Create the namespace on start if it does not exist
    #[serde(default = "default_true")]
    pub create_namespace: bool,

    /// Monitored labs allowed at once. `0` disables the cap.
    #[serde(default = "default_max_concurrent_labs")]
    pub max_concurrent_labs: usize,

    #[serde(default)]
    pub images: ImagesConfig,

    #[serde(default)]
    pub ingress: IngressConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub ssl_job: SslJobConfig,

    #[serde(default)]
    pub cleanup: CleanupConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,
}

/// Image configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ImageConfig {
    /// Image repository (e.g., "ghcr.io/5dlabs/lab-runtime-node")
    pub repository: String,

    /// Image tag (e.g., "latest", "v2.1.0")
    pub tag: String,
}

impl ImageConfig {
    fn new(repository: &str, tag: &str) -> Self {
        Self {
            repository: repository.to_string(),
            tag: tag.to_string(),
        }
    }

    /// Returns `true` when both repository and tag are populated.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.repository.trim().is_empty() && !self.tag.trim().is_empty()
    }

    /// `repository:tag`
    #[must_use]
    pub fn reference(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }
}

/// Lab runtime images
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagesConfig {
    /// Used for any language without an explicit entry
    #[serde(default = "default_runtime_image")]
    pub default: ImageConfig,

    /// Per-language runtime images, keyed by language
    #[serde(default)]
    pub languages: HashMap<String, ImageConfig>,

    #[serde(default = "default_pull_policy")]
    pub pull_policy: String,

    #[serde(default)]
    pub image_pull_secrets: Vec<String>,
}

impl ImagesConfig {
    /// Runtime image for `language`, falling back to the default image.
    #[must_use]
    pub fn for_language(&self, language: &str) -> &ImageConfig {
        self.languages
            .get(language)
            .or_else(|| {
                self.languages
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(language))
                    .map(|(_, image)| image)
            })
            .unwrap_or(&self.default)
    }
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            default: default_runtime_image(),
            languages: HashMap::new(),
            pull_policy: default_pull_policy(),
            image_pull_secrets: Vec::new(),
        }
    }
}

/// Public routing for lab workspaces
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressConfig {
    /// Labs are served at `{labId}.{domain}`
    #[serde(default = "default_domain")]
    pub domain: String,

    #[serde(default = "default_ingress_class")]
    pub class_name: String,

    /// cert-manager issuer used for lab TLS certificates
    #[serde(default = "default_cluster_issuer")]
    pub cluster_issuer: String,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            domain: default_domain(),
            class_name: default_ingress_class(),
            cluster_issuer: default_cluster_issuer(),
        }
    }
}

/// Workspace object storage
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Copy the language boilerplate into the lab prefix before provisioning.
    /// When disabled the runtime image seeds itself from the bucket.
    #[serde(default)]
    pub seed_on_start: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            seed_on_start: false,
        }
    }
}

/// TLS status polling job
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SslJobConfig {
    #[serde(default = "default_ssl_job_image")]
    pub image: ImageConfig,

    /// Give up waiting for the certificate after this many seconds
    #[serde(default = "default_ssl_job_deadline")]
    pub active_deadline_seconds: i64,

    /// Finished jobs are garbage-collected after this many seconds
    #[serde(default = "default_ttl_after_finished")]
    pub ttl_seconds_after_finished: i32,

    /// Needs read access to certificates and secrets in the namespace
    #[serde(default = "default_job_service_account")]
    pub service_account_name: String,
}

impl Default for SslJobConfig {
    fn default() -> Self {
        Self {
            image: default_ssl_job_image(),
            active_deadline_seconds: default_ssl_job_deadline(),
            ttl_seconds_after_finished: default_ttl_after_finished(),
            service_account_name: default_job_service_account(),
        }
    }
}

/// Shared sweeper for abandoned labs
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupConfig {
    #[serde(default = "default_cleanup_schedule")]
    pub schedule: String,

    /// Monitored labs idle for longer than this are torn down
    #[serde(default = "default_idle_timeout_minutes")]
    pub idle_timeout_minutes: u64,

    #[serde(default = "default_cleanup_image")]
    pub image: ImageConfig,

    /// Needs delete access to lab resources in the namespace
    #[serde(default = "default_job_service_account")]
    pub service_account_name: String,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            schedule: default_cleanup_schedule(),
            idle_timeout_minutes: default_idle_timeout_minutes(),
            image: default_cleanup_image(),
            service_account_name: default_job_service_account(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutConfig {
    /// Upper bound for every individual cluster API call
    #[serde(default = "default_cluster_seconds")]
    pub cluster_seconds: u64,
}

impl TimeoutConfig {
    #[must_use]
    pub fn cluster_call(&self) -> Duration {
        Duration::from_secs(self.cluster_seconds)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            cluster_seconds: default_cluster_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Whole-request timeout applied by the HTTP layer
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

/// Quest content service
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogConfig {
    /// Base URL of the quest service; quest starts are disabled when unset
    #[serde(default)]
    pub base_url: Option<String>,
}

fn default_namespace() -> String {
    "devsarena".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent_labs() -> usize {
    5
}

fn default_runtime_image() -> ImageConfig {
    ImageConfig::new("ghcr.io/5dlabs/lab-runtime", "latest")
}

fn default_pull_policy() -> String {
    "IfNotPresent".to_string()
}

fn default_domain() -> String {
    "labs.devsarena.dev".to_string()
}

fn default_ingress_class() -> String {
    "nginx".to_string()
}

fn default_cluster_issuer() -> String {
    "letsencrypt-prod".to_string()
}

fn default_bucket() -> String {
    "devsarena".to_string()
}

fn default_ssl_job_image() -> ImageConfig {
    ImageConfig::new("ghcr.io/5dlabs/lab-ssl-progress", "latest")
}

fn default_ssl_job_deadline() -> i64 {
    900
}

fn default_ttl_after_finished() -> i32 {
    300
}

fn default_job_service_account() -> String {
    "lab-controller-jobs".to_string()
}

fn default_cleanup_schedule() -> String {
    "*/10 * * * *".to_string()
}

fn default_idle_timeout_minutes() -> u64 {
    30
}

fn default_cleanup_image() -> ImageConfig {
    ImageConfig::new("ghcr.io/5dlabs/lab-cleanup", "latest")
}

fn default_cluster_seconds() -> u64 {
    10
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

impl ControllerConfig {
    /// Reject configurations that would render broken resources.
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.namespace.trim().is_empty() {
            return Err(anyhow::anyhow!("namespace must not be empty"));
        }
        if self.ingress.domain.trim().is_empty() {
            return Err(anyhow::anyhow!("ingress.domain must not be empty"));
        }
        if self.storage.bucket.trim().is_empty() {
            return Err(anyhow::anyhow!("storage.bucket must not be empty"));
        }
        if self.timeouts.cluster_seconds == 0 {
            return Err(anyhow::anyhow!("timeouts.clusterSeconds must be positive"));
        }
        if !self.images.default.is_configured() {
            return Err(anyhow::anyhow!(
                "Default runtime image is not configured. Provide images.default.repository and images.default.tag."
            ));
        }
        for (language, image) in &self.images.languages {
            if !image.is_configured() {
                return Err(anyhow::anyhow!(format!(
                    "Runtime image for language '{language}' must specify both repository and tag."
                )));
            }
        }
        for (name, image) in [("sslJob", &self.ssl_job.image), ("cleanup", &self.cleanup.image)] {
            if !image.is_configured() {
                return Err(anyhow::anyhow!(format!(
                    "{name}.image must specify both repository and tag."
                )));
            }
        }
        Ok(())
    }

    pub fn from_mounted_file(config_path: &str) -> Result<Self, anyhow::Error> {
        let config_str = std::fs::read_to_string(config_path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {config_path}: {e}"))?;

        let config: ControllerConfig = serde_yaml::from_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse config YAML: {e}"))?;

        Ok(config)
    }

    /// Apply overrides from the process environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// Recognized: `ALLOWED_CONCURRENT_LABS`, `K8S_NAMESPACE`,
    /// `AWS_S3_BUCKET_NAME`, `LAB_DOMAIN`, `BIND_ADDRESS`, `QUEST_CATALOG_URL`.
    #[must_use]
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(raw) = get("ALLOWED_CONCURRENT_LABS") {
            match raw.trim().parse::<usize>() {
                Ok(limit) => self.max_concurrent_labs = limit,
                Err(e) => warn!(
                    "Ignoring invalid ALLOWED_CONCURRENT_LABS '{}': {}. Keeping {}.",
                    raw, e, self.max_concurrent_labs
                ),
            }
        }
        if let Some(namespace) = get("K8S_NAMESPACE") {
            self.namespace = namespace;
        }
        if let Some(bucket) = get("AWS_S3_BUCKET_NAME") {
            self.storage.bucket = bucket;
        }
        if let Some(domain) = get("LAB_DOMAIN") {
            self.ingress.domain = domain;
        }
        if let Some(bind) = get("BIND_ADDRESS") {
            self.server.bind_address = bind;
        }
        if let Some(url) = get("QUEST_CATALOG_URL") {
            self.catalog.base_url = Some(url);
        }
        self
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            create_namespace: default_true(),
            max_concurrent_labs: default_max_concurrent_labs(),
            images: ImagesConfig::default(),
            ingress: IngressConfig::default(),
            storage: StorageConfig::default(),
            ssl_job: SslJobConfig::default(),
            cleanup: CleanupConfig::default(),
            timeouts: TimeoutConfig::default(),
            server: ServerConfig::default(),
            catalog: CatalogConfig::default(),
        }
    }
}
