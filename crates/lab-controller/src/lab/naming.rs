use regex::Regex;
use std::sync::OnceLock;

use super::types::{Error, Result};

const MAX_DNS_LABEL_LENGTH: usize = 63;
const DEPLOYMENT_SUFFIX: &str = "-deployment";
const SERVICE_SUFFIX: &str = "-service";
const INGRESS_SUFFIX: &str = "-ingress";
const SSL_JOB_SUFFIX: &str = "-ssl-progress-job";

/// Longest lab id whose derived names all stay valid DNS labels.
pub const MAX_LAB_ID_LENGTH: usize = MAX_DNS_LABEL_LENGTH - SSL_JOB_SUFFIX.len();
/// Longest language that keeps `{language}-{labId}` within a label value.
pub const MAX_LANGUAGE_LENGTH: usize = MAX_DNS_LABEL_LENGTH - 1 - MAX_LAB_ID_LENGTH;

pub const CLEANUP_CRONJOB_NAME: &str = "lab-cleanup-cronjob";
pub const CLEANUP_CONFIGMAP_NAME: &str = "lab-cleanup-config";
pub const CLEANUP_SECRET_NAME: &str = "lab-cleanup-secrets";

static DNS_LABEL_REGEX: OnceLock<Regex> = OnceLock::new();
static LANGUAGE_REGEX: OnceLock<Regex> = OnceLock::new();

pub struct ResourceNaming;

impl ResourceNaming {
    /// `{labId}-deployment`
    #[must_use]
    pub fn deployment_name(lab_id: &str) -> String {
        format!("{lab_id}{DEPLOYMENT_SUFFIX}")
    }

    /// `{labId}-service`
    #[must_use]
    pub fn service_name(lab_id: &str) -> String {
        format!("{lab_id}{SERVICE_SUFFIX}")
    }

    /// `{labId}-ingress`
    #[must_use]
    pub fn ingress_name(lab_id: &str) -> String {
        format!("{lab_id}{INGRESS_SUFFIX}")
    }

    /// `{labId}-ssl-progress-job`
    #[must_use]
    pub fn ssl_job_name(lab_id: &str) -> String {
        format!("{lab_id}{SSL_JOB_SUFFIX}")
    }

    /// `{language}-{labId}`, used as the pod selector label
    #[must_use]
    pub fn app_name(language: &str, lab_id: &str) -> String {
        format!("{language}-{lab_id}")
    }

    /// TLS secret holding the lab certificate
    #[must_use]
    pub fn tls_secret_name(lab_id: &str) -> String {
        format!("{lab_id}-tls")
    }

    /// Public host for a lab
    #[must_use]
    pub fn host(lab_id: &str, domain: &str) -> String {
        format!("{lab_id}.{domain}")
    }

    /// Lab ids become part of resource names and hostnames.
    pub fn validate_lab_id(lab_id: &str) -> Result<()> {
        if lab_id.trim().is_empty() {
            return Err(Error::Validation("labId is required".to_string()));
        }
        if lab_id.len() > MAX_LAB_ID_LENGTH {
            return Err(Error::Validation(format!(
                "labId must be at most {MAX_LAB_ID_LENGTH} characters, got {}",
                lab_id.len()
            )));
        }
        let regex = DNS_LABEL_REGEX.get_or_init(|| {
            Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").expect("Invalid regex pattern")
        });
        if !regex.is_match(lab_id) {
            return Err(Error::Validation(format!(
                "labId '{lab_id}' must contain only lowercase letters, digits and '-', and start and end with an alphanumeric character"
            )));
        }
        Ok(())
    }

    pub fn validate_language(language: &str) -> Result<()> {
        if language.trim().is_empty() {
            return Err(Error::Validation("language is required".to_string()));
        }
        if language.len() > MAX_LANGUAGE_LENGTH {
            return Err(Error::Validation(format!(
                "language must be at most {MAX_LANGUAGE_LENGTH} characters, got {}",
                language.len()
            )));
        }
        let regex = LANGUAGE_REGEX
            .get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9-]*$").expect("Invalid regex pattern"));
        if !regex.is_match(language) {
            return Err(Error::Validation(format!(
                "language '{language}' must contain only lowercase letters, digits and '-'"
            )));
        }
        Ok(())
    }

    /// Validate a (language, labId) pair, including the derived app label.
    pub fn validate(language: &str, lab_id: &str) -> Result<()> {
        Self::validate_language(language)?;
        Self::validate_lab_id(lab_id)?;
        let app = Self::app_name(language, lab_id);
        if app.len() > MAX_DNS_LABEL_LENGTH {
            return Err(Error::Validation(format!(
                "'{app}' exceeds {MAX_DNS_LABEL_LENGTH} characters; use a shorter labId"
            )));
        }
        Ok(())
    }
}
