//! Object key layout for lab workspaces.

/// Prefix holding live workspace content.
pub const CODE_ROOT: &str = "code";
/// Prefix holding the seed content for each language.
pub const BOILERPLATE_ROOT: &str = "boilerplate";

/// Seed prefix for a language, e.g. `boilerplate/node/`.
#[must_use]
pub fn boilerplate_prefix(language: &str) -> String {
    format!("{BOILERPLATE_ROOT}/{language}/")
}

/// The object-store location of one lab's workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceScope {
    language: String,
    lab_id: String,
}

impl WorkspaceScope {
    #[must_use]
    pub fn new(language: impl Into<String>, lab_id: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            lab_id: lab_id.into(),
        }
    }

    #[must_use]
    pub fn language(&self) -> &str {
        &self.language
    }

    #[must_use]
    pub fn lab_id(&self) -> &str {
        &self.lab_id
    }

    /// `code/{language}/{labId}/`
    #[must_use]
    pub fn prefix(&self) -> String {
        format!("{CODE_ROOT}/{}/{}/", self.language, self.lab_id)
    }

    /// Object key for a workspace-relative path. Leading slashes are ignored.
    #[must_use]
    pub fn key_for(&self, relative_path: &str) -> String {
        let relative = relative_path.trim_start_matches('/').trim_end_matches('/');
        format!("{}{relative}", self.prefix())
    }
}
