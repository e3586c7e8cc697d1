use std::fmt;

use sitectl_core::{branch_number, is_major_upgrade, Warning};
use sitectl_installer::BlockKind;

use crate::policy::UpgradePolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradePhase {
    Idle,
    Blocked,
    PreUpgrade,
    SourceSync,
    DatabaseMigrated,
    AddonsReconciled,
    Unblocked,
    Failed,
    /// The operator declined at a prompt before anything destructive ran.
    Cancelled,
}

impl UpgradePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Blocked => "blocked",
            Self::PreUpgrade => "pre-upgrade",
            Self::SourceSync => "source-sync",
            Self::DatabaseMigrated => "database-migrated",
            Self::AddonsReconciled => "addons-reconciled",
            Self::Unblocked => "unblocked",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for UpgradePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything one run knows about where it started, where it is going, and how far it got.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeContext {
    pub old_branch: String,
    pub new_branch: String,
    pub old_repository: String,
    pub new_repository: String,
    pub old_branch_number: u32,
    pub new_branch_number: u32,
    pub is_major_version_change: bool,
    pub crosses_legacy_boundary: bool,
    pub old_uses_modular_plugins: bool,
    pub new_uses_modular_plugins: bool,
    pub blocked_state: Option<BlockKind>,
    pub phase: UpgradePhase,
    /// Every phase entered, in order.
    pub phases: Vec<UpgradePhase>,
    pub warnings: Vec<Warning>,
    pub log: Vec<String>,
}

impl UpgradeContext {
    pub fn new(
        policy: &UpgradePolicy,
        old_branch: impl Into<String>,
        new_branch: impl Into<String>,
        old_repository: impl Into<String>,
        new_repository: impl Into<String>,
    ) -> Self {
        let old_branch = old_branch.into();
        let new_branch = new_branch.into();
        let old_repository = old_repository.into();
        let new_repository = new_repository.into();
        let old_branch_number = branch_number(&old_branch);
        let new_branch_number = branch_number(&new_branch);

        Self {
            is_major_version_change: is_major_upgrade(old_branch_number, new_branch_number),
            crosses_legacy_boundary: policy
                .crosses_legacy_boundary(old_branch_number, new_branch_number),
            old_uses_modular_plugins: policy
                .uses_modular_addons(&old_repository, old_branch_number),
            new_uses_modular_plugins: policy
                .uses_modular_addons(&new_repository, new_branch_number),
            old_branch,
            new_branch,
            old_repository,
            new_repository,
            old_branch_number,
            new_branch_number,
            blocked_state: None,
            phase: UpgradePhase::Idle,
            phases: Vec::new(),
            warnings: Vec::new(),
            log: Vec::new(),
        }
    }

    /// Blocking only matters when the code moves to another branch.
    pub fn needs_block(&self) -> bool {
        self.old_branch_number != self.new_branch_number
    }

    pub fn reached(&self, phase: UpgradePhase) -> bool {
        self.phases.contains(&phase)
    }

    pub fn enter(&mut self, phase: UpgradePhase) {
        tracing::info!(phase = phase.as_str(), "entering phase");
        self.phase = phase;
        self.phases.push(phase);
        self.log.push(format!("phase: {phase}"));
    }

    pub fn note(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(phase = self.phase.as_str(), "{message}");
        self.log.push(message);
    }

    pub fn warn(&mut self, warning: Warning) {
        tracing::warn!(
            phase = self.phase.as_str(),
            kind = warning.kind.as_str(),
            "{}",
            warning.message
        );
        self.log.push(format!("warning: {warning}"));
        self.warnings.push(warning);
    }

    pub fn warn_all(&mut self, warnings: impl IntoIterator<Item = Warning>) {
        for warning in warnings {
            self.warn(warning);
        }
    }
}
