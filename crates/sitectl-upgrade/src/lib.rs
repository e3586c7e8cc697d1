mod cache;
mod collaborators;
mod context;
mod error;
mod helper_output;
mod orchestrator;
mod policy;

pub use cache::InventoryCache;
pub use collaborators::{AssumeYes, Database, Prompt, SourceControl};
pub use context::{UpgradeContext, UpgradePhase};
pub use error::StepFailure;
pub use helper_output::{scan_migration_line, MigrationEvent};
pub use orchestrator::{
    AddonUpgradeReport, MigrationRequest, Orchestrator, Preflight, RunReport, Site,
    UpgradeRequest,
};
pub use policy::{ModularRule, UpgradePolicy};
