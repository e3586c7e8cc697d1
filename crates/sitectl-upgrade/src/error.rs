use thiserror::Error;

/// Why a run stopped early.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepFailure {
    #[error("could not block the site: {0}")]
    Block(String),
    #[error("source control update failed: {0}")]
    SourceSync(String),
    #[error("could not inventory modular components: {0}")]
    ComponentInventory(String),
    #[error("database migration failed: {0}")]
    DatabaseMigration(String),
    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl StepFailure {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}
