pub mod admission;
pub mod catalog;
pub mod config;
pub mod naming;
pub mod orchestrator;
pub mod resources;
pub mod templates;
pub mod types;

// Re-export commonly used items
pub use admission::{check_admission, Admission, AdmissionController};
pub use catalog::{DisabledQuestCatalog, HttpQuestCatalog, QuestCatalog, QuestMetadata};
pub use config::ControllerConfig;
pub use naming::ResourceNaming;
pub use orchestrator::{DeletedLab, Ensured, LabOrchestrator, StartedLab};
pub use resources::{
    ClusterApi, ClusterError, KubeCluster, LabResource, Propagation, ResourceKind, ResourceRef,
};
pub use templates::{ResourceTemplates, SpinUpParameters, TemplateError, TemplateName};
pub use types::{Error, Result};
