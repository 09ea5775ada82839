pub mod api;
pub mod cleanup;
pub mod config;
pub mod deployment;
pub mod engine;
pub mod project;

pub use api::{ActionResult, DeployOutcome, LogsOutcome};
pub use cleanup::{CleanupReport, CleanupScope};
pub use config::{OrchestratorConfig, PortRange, RetentionPolicy, RetryPolicy, Timeouts};
pub use deployment::{
    ContainerStats, Deployment, DeploymentEvent, DeploymentListing, DeploymentStatus, Health,
    StatusReport,
};
pub use engine::{BuildSpec, ContainerInspect, ContainerSummary, RunSpec, StatsSample};
pub use project::Project;
