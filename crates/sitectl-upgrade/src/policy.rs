use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use sitectl_core::{branch_name, branch_number, repository_basename, split_full_name};

/// A repository whose checkouts leave addons out of the core tree from `from_branch` on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModularRule {
    pub repository: String,
    #[serde(default)]
    pub from_branch: u32,
}

impl ModularRule {
    fn new(repository: &str, from_branch: u32) -> Self {
        Self {
            repository: repository.to_string(),
            from_branch,
        }
    }
}

/// Branch thresholds and site conventions that steer the upgrade workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradePolicy {
    /// First branch of the current platform generation; the database helper only runs from here.
    pub legacy_boundary: u32,
    /// From this branch on, addons may not be carried as submodules.
    pub submodule_free_from: u32,
    /// From this branch on, addons come from the reference catalog.
    pub catalog_managed_from: u32,
    pub modular_repositories: Vec<ModularRule>,
    /// Repositories that migrate to `modular_target_repository`.
    pub plain_repositories: Vec<String>,
    pub modular_target_repository: String,
    pub required_addons: Vec<String>,
    /// Paths, relative to the site root, of components the modular layout ships separately.
    /// Empty means "ask the catalog".
    pub modular_components: Vec<String>,
}

impl Default for UpgradePolicy {
    fn default() -> Self {
        Self {
            legacy_boundary: 20,
            submodule_free_from: 21,
            catalog_managed_from: 27,
            modular_repositories: vec![
                ModularRule::new("rlmoodle.gao", 0),
                ModularRule::new("rlmoodle.elis", 21),
                ModularRule::new("rlmoodle.elisfiles", 21),
            ],
            plain_repositories: vec!["rlmoodle.plain".to_string(), "moodle".to_string()],
            modular_target_repository: "rlmoodle.gao".to_string(),
            required_addons: vec!["auth_rladmin".to_string(), "block_rlagent".to_string()],
            modular_components: Vec::new(),
        }
    }
}

impl UpgradePolicy {
    pub fn validate(&self) -> Result<()> {
        if self.legacy_boundary > self.submodule_free_from
            || self.submodule_free_from > self.catalog_managed_from
        {
            bail!(
                "branch thresholds must ascend: legacy_boundary={} submodule_free_from={} catalog_managed_from={}",
                self.legacy_boundary,
                self.submodule_free_from,
                self.catalog_managed_from
            );
        }
        for addon in &self.required_addons {
            if split_full_name(addon).is_none() {
                bail!("required addon '{addon}' is not of the form type_name");
            }
        }
        if self.modular_target_repository.trim().is_empty() {
            bail!("modular_target_repository must not be empty");
        }
        Ok(())
    }

    pub fn uses_modular_addons(&self, repository: &str, branch: u32) -> bool {
        let name = repository_basename(repository);
        self.modular_repositories.iter().any(|rule| {
            repository_basename(&rule.repository) == name && branch >= rule.from_branch
        })
    }

    /// Old code predates the boundary, new code is on or past it.
    pub fn crosses_legacy_boundary(&self, old_branch: u32, new_branch: u32) -> bool {
        old_branch < self.legacy_boundary && new_branch >= self.legacy_boundary
    }

    pub fn database_migrates(&self, branch: u32) -> bool {
        branch >= self.legacy_boundary
    }

    pub fn is_catalog_managed(&self, branch: u32) -> bool {
        branch >= self.catalog_managed_from
    }

    pub fn requires_submodule_removal(&self, new_is_modular: bool, new_branch: u32) -> bool {
        new_is_modular || new_branch >= self.submodule_free_from
    }

    /// Plain repositories become the modular one; variants keep their name.
    pub fn migration_repository(&self, current: &str) -> String {
        let name = repository_basename(current);
        if self
            .plain_repositories
            .iter()
            .any(|plain| repository_basename(plain) == name)
        {
            repository_basename(&self.modular_target_repository).to_string()
        } else {
            name.to_string()
        }
    }

    /// Migration never targets a branch that still allows submodules.
    pub fn migration_branch(&self, requested: &str) -> String {
        if branch_number(requested) < self.submodule_free_from {
            branch_name(self.submodule_free_from)
        } else {
            requested.to_string()
        }
    }
}
