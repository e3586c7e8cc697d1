use std::path::{Path, PathBuf};

use anyhow::Result;

pub trait SourceControl {
    fn current_branch(&self) -> Result<String>;
    fn current_repository(&self) -> Result<String>;
    /// Switches the checkout to `branch` of `repository` and brings it up to date.
    fn change_to(&self, branch: &str, repository: &str) -> Result<()>;
    /// Paths, relative to the site root, of the registered submodules.
    fn list_modular_components(&self) -> Result<Vec<String>>;
    fn remove_modular_components(&self) -> Result<()>;
    fn is_working_tree_clean(&self, path: &Path) -> Result<bool>;
    fn status_snapshot(&self, path: &Path) -> Result<String>;
    /// Restores tracked files under `paths` that a bulk delete may have taken out.
    fn restore_paths(&self, paths: &[PathBuf]) -> Result<()>;
}

pub trait Database {
    fn migrate(&self) -> Result<()>;
    /// Runs the legacy pre-upgrade script; `Ok(false)` when the site has none.
    fn run_preupgrade(&self) -> Result<bool>;
}

pub trait Prompt {
    fn confirm(&self, question: &str) -> bool;
}

/// Answers yes to everything, for unattended runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeYes;

impl Prompt for AssumeYes {
    fn confirm(&self, question: &str) -> bool {
        tracing::info!(question, "confirmed without prompting");
        true
    }
}
