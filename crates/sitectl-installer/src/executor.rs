use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use sitectl_core::{split_full_name, Action, ActionPlan, ActionRequest, AddonTypeCatalog, Catalog};

/// What an install, uninstall, or upgrade hook reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookOutput {
    pub success: bool,
    pub output: String,
}

impl HookOutput {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// Everything a hook or code store needs to act on one addon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddonTarget {
    pub full_name: String,
    pub addon_type: String,
    pub name: String,
    pub path: PathBuf,
    pub code_source: Option<String>,
}

pub trait AddonHooks {
    fn install(&self, target: &AddonTarget) -> Result<HookOutput>;
    fn uninstall(&self, target: &AddonTarget) -> Result<HookOutput>;
    fn upgrade_hook(&self, target: &AddonTarget) -> Result<HookOutput>;
}

/// Puts addon code into the site tree and takes it out again.
pub trait CodeStore {
    fn place(&self, target: &AddonTarget) -> Result<()>;
    fn delete(&self, target: &AddonTarget) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Success,
    Failure(String),
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub added: usize,
    pub removed: usize,
    pub updated: usize,
    pub failed: usize,
    pub failures: Vec<(ActionRequest, String)>,
}

impl BatchReport {
    pub fn record(&mut self, request: &ActionRequest, outcome: &ActionOutcome) {
        match outcome {
            ActionOutcome::Success => match request.action {
                Action::Add => self.added += 1,
                Action::Remove => self.removed += 1,
                Action::Update => self.updated += 1,
            },
            ActionOutcome::Failure(reason) => {
                self.failed += 1;
                self.failures.push((request.clone(), reason.clone()));
            }
        }
    }

    pub fn merge(&mut self, other: BatchReport) {
        self.added += other.added;
        self.removed += other.removed;
        self.updated += other.updated;
        self.failed += other.failed;
        self.failures.extend(other.failures);
    }

    pub fn succeeded(&self) -> usize {
        self.added + self.removed + self.updated
    }

    pub fn total(&self) -> usize {
        self.succeeded() + self.failed
    }
}

/// Applies queued addon actions one at a time. No retries.
pub struct AddonExecutor<'a> {
    types: &'a AddonTypeCatalog,
    dirroot: &'a Path,
    catalog: Option<&'a Catalog>,
    hooks: &'a dyn AddonHooks,
    store: &'a dyn CodeStore,
}

impl<'a> AddonExecutor<'a> {
    pub fn new(
        types: &'a AddonTypeCatalog,
        dirroot: &'a Path,
        hooks: &'a dyn AddonHooks,
        store: &'a dyn CodeStore,
    ) -> Self {
        Self {
            types,
            dirroot,
            catalog: None,
            hooks,
            store,
        }
    }

    /// Catalog entries supply the code source and the storage path when present.
    pub fn with_catalog(mut self, catalog: &'a Catalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn target(&self, full_name: &str) -> Result<AddonTarget> {
        let (addon_type, name) = split_full_name(full_name)
            .ok_or_else(|| anyhow!("malformed addon name '{full_name}'"))?;
        let definition = self
            .types
            .get(addon_type)
            .ok_or_else(|| anyhow!("unknown addon type '{addon_type}' for {full_name}"))?;
        let listed = self.catalog.and_then(|catalog| catalog.get(full_name));

        let path = listed
            .and_then(|addon| addon.path.as_deref())
            .filter(|path| path.is_relative())
            .map(|path| self.dirroot.join(path))
            .unwrap_or_else(|| definition.addon_path(self.dirroot, name));

        Ok(AddonTarget {
            full_name: full_name.to_string(),
            addon_type: addon_type.to_string(),
            name: name.to_string(),
            path,
            code_source: listed.and_then(|addon| addon.metadata.code_source.clone()),
        })
    }

    pub fn apply(&self, request: &ActionRequest) -> ActionOutcome {
        let outcome = match self.try_apply(request) {
            Ok(()) => ActionOutcome::Success,
            Err(err) => ActionOutcome::Failure(format!("{err:#}")),
        };
        match &outcome {
            ActionOutcome::Success => tracing::info!(
                action = request.action.as_str(),
                addon = %request.full_name,
                "addon action applied"
            ),
            ActionOutcome::Failure(reason) => tracing::warn!(
                action = request.action.as_str(),
                addon = %request.full_name,
                reason = %reason,
                "addon action failed"
            ),
        }
        outcome
    }

    fn try_apply(&self, request: &ActionRequest) -> Result<()> {
        let target = self.target(&request.full_name)?;
        match request.action {
            Action::Add => {
                self.store.place(&target)?;
                check_hook("install", self.hooks.install(&target)?)
            }
            Action::Remove => {
                check_hook("uninstall", self.hooks.uninstall(&target)?)?;
                self.store.delete(&target)
            }
            Action::Update => check_hook("upgrade", self.hooks.upgrade_hook(&target)?),
        }
    }

    pub fn execute_plan(&self, plan: &ActionPlan) -> BatchReport {
        self.execute_plan_with_progress(plan, |_, _| {})
    }

    /// Remove, then add, then update. A failed action does not stop the batch.
    pub fn execute_plan_with_progress(
        &self,
        plan: &ActionPlan,
        mut progress: impl FnMut(&ActionRequest, &ActionOutcome),
    ) -> BatchReport {
        let mut report = BatchReport::default();
        for request in plan.ordered() {
            let outcome = self.apply(&request);
            progress(&request, &outcome);
            report.record(&request, &outcome);
        }
        report
    }
}

fn check_hook(hook: &str, output: HookOutput) -> Result<()> {
    if output.success {
        return Ok(());
    }
    let detail = output.output.trim();
    if detail.is_empty() {
        Err(anyhow!("{hook} hook reported failure"))
    } else {
        Err(anyhow!("{hook} hook reported failure: {detail}"))
    }
}
