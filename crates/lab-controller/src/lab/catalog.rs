//! Quest metadata lookup.
//!
//! Quest content lives in a separate service. The orchestrator only needs to
//! know where a quest's boilerplate is stored, so the catalog is reduced to a
//! single lookup by slug.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::types::{Error, Result};

const CATALOG_TIMEOUT: Duration = Duration::from_secs(10);

/// The slice of quest metadata needed to start a lab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestMetadata {
    pub slug: String,

    #[serde(default)]
    pub name: String,

    /// Object-store prefix holding the quest's starter code
    #[serde(default, rename = "boiler_plate_code")]
    pub boilerplate_key: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuestCatalog: Send + Sync {
    /// `Ok(None)` when no quest has this slug.
    async fn find_quest(&self, slug: &str) -> Result<Option<QuestMetadata>>;
}

/// Reads quests from the content service's `GET /v0/quests/{slug}`.
#[derive(Clone)]
pub struct HttpQuestCatalog {
    client: reqwest::Client,
    base_url: String,
}

impl HttpQuestCatalog {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(CATALOG_TIMEOUT)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl QuestCatalog for HttpQuestCatalog {
    async fn find_quest(&self, slug: &str) -> Result<Option<QuestMetadata>> {
        let url = format!("{}/v0/quests/{slug}", self.base_url);
        debug!(url = %url, "Fetching quest metadata");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Catalog(format!("request to {url} failed: {e}")))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let quest = response
                    .json::<QuestMetadata>()
                    .await
                    .map_err(|e| Error::Catalog(format!("invalid quest payload: {e}")))?;
                Ok(Some(quest))
            }
            status => Err(Error::Catalog(format!(
                "quest service returned {status} for '{slug}'"
            ))),
        }
    }
}

/// Used when no quest service is configured.
pub struct DisabledQuestCatalog;

#[async_trait]
impl QuestCatalog for DisabledQuestCatalog {
    async fn find_quest(&self, _slug: &str) -> Result<Option<QuestMetadata>> {
        Err(Error::Catalog("quest catalog is not configured".to_string()))
    }
}
