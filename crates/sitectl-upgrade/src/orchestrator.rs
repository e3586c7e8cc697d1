use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sitectl_core::{
    branch_number, full_name, repository_basename, AddonType, AddonTypeCatalog, Catalog,
    DiskInventory, InstalledLedger, Inventory, LevelMask, ReferenceCatalog, Warning,
};
use sitectl_installer::{
    current_unix_timestamp, AddonExecutor, AddonHooks, BatchReport, BlockKind, CodeStore,
    RunJournal, RunMetadata, SiteBlocker, SiteFiles, SiteLayout,
};
use sitectl_resolver::{Planned, Planner};

use crate::cache::InventoryCache;
use crate::collaborators::{Database, Prompt, SourceControl};
use crate::context::{UpgradeContext, UpgradePhase};
use crate::error::StepFailure;
use crate::policy::UpgradePolicy;

/// The collaborators one site run talks to.
#[derive(Clone, Copy)]
pub struct Site<'a> {
    pub types: &'a AddonTypeCatalog,
    pub disk: &'a dyn DiskInventory,
    pub ledger: &'a dyn InstalledLedger,
    pub catalog: &'a dyn ReferenceCatalog,
    pub source: &'a dyn SourceControl,
    pub database: &'a dyn Database,
    pub blocker: &'a dyn SiteBlocker,
    pub files: &'a dyn SiteFiles,
    pub hooks: &'a dyn AddonHooks,
    pub store: &'a dyn CodeStore,
    pub prompt: &'a dyn Prompt,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeRequest {
    /// Target branch; the current one when absent.
    pub branch: Option<String>,
    /// Target repository; the current one when absent.
    pub repository: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationRequest {
    pub branch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub context: UpgradeContext,
    pub success: bool,
    pub failure: Option<StepFailure>,
    pub actions: BatchReport,
    /// Addons left out of an add because their dependencies could not be met.
    pub held_back: Vec<String>,
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddonUpgradeReport {
    pub branch: u32,
    pub actions: BatchReport,
    pub warnings: Vec<Warning>,
}

/// What an upgrade to a branch would leave behind, computed without changing anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preflight {
    pub branch: u32,
    /// Installed addons with no release for the branch.
    pub unavailable: Vec<String>,
    /// Addon directories on disk the branch's catalog does not know.
    pub unknown_on_disk: Vec<String>,
    pub warnings: Vec<Warning>,
}

#[derive(Default)]
struct Progress {
    actions: BatchReport,
    held_back: Vec<String>,
}

pub struct Orchestrator<'a> {
    site: Site<'a>,
    layout: SiteLayout,
    policy: UpgradePolicy,
    block_kind: BlockKind,
    cache: InventoryCache<'a>,
    record_runs: bool,
    journal: Option<RunJournal>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(site: Site<'a>, layout: SiteLayout, policy: UpgradePolicy) -> Self {
        Self {
            cache: InventoryCache::new(site.ledger, site.types),
            site,
            layout,
            policy,
            block_kind: BlockKind::Maintenance,
            record_runs: true,
            journal: None,
        }
    }

    pub fn with_block_kind(mut self, kind: BlockKind) -> Self {
        self.block_kind = kind;
        self
    }

    /// Runs are journaled under the data root unless turned off.
    pub fn with_run_journal(mut self, enabled: bool) -> Self {
        self.record_runs = enabled;
        self
    }

    pub fn policy(&self) -> &UpgradePolicy {
        &self.policy
    }

    /// Moves the site to another branch and/or repository.
    ///
    /// Errors only when the run cannot start; step failures come back in the report.
    pub fn upgrade(&mut self, request: &UpgradeRequest) -> Result<RunReport> {
        let (old_branch, old_repository) = self.current_checkout()?;
        let new_branch = request
            .branch
            .clone()
            .filter(|branch| !branch.trim().is_empty())
            .unwrap_or_else(|| old_branch.clone());
        let new_repository = request
            .repository
            .as_deref()
            .map(repository_basename)
            .filter(|repository| !repository.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| old_repository.clone());

        let mut ctx = UpgradeContext::new(
            &self.policy,
            old_branch,
            new_branch,
            old_repository,
            new_repository,
        );
        self.begin_run("upgrade", &ctx)?;
        ctx.note(format!(
            "upgrading {} {} to {} {}",
            ctx.old_repository, ctx.old_branch, ctx.new_repository, ctx.new_branch
        ));

        let mut progress = Progress::default();
        if ctx.is_major_version_change && !self.confirm_major_upgrade(&mut ctx) {
            let failure = StepFailure::Cancelled("major upgrade declined".to_string());
            return Ok(self.finish(ctx, Err(failure), progress));
        }

        if ctx.needs_block() {
            if let Err(err) = self.site.blocker.block(self.block_kind) {
                let failure = StepFailure::Block(format!("{err:#}"));
                return Ok(self.finish(ctx, Err(failure), progress));
            }
            ctx.blocked_state = Some(self.block_kind);
            self.enter(&mut ctx, UpgradePhase::Blocked);
        }

        let result = self.run_upgrade_steps(&mut ctx, &mut progress);

        if let Some(kind) = ctx.blocked_state {
            match self.site.blocker.unblock(kind) {
                Ok(()) => {
                    ctx.blocked_state = None;
                    self.enter(&mut ctx, UpgradePhase::Unblocked);
                }
                Err(err) => ctx.warn(Warning::recoverable(format!(
                    "failed to lift {kind} block: {err:#}"
                ))),
            }
        }

        Ok(self.finish(ctx, result, progress))
    }

    fn run_upgrade_steps(
        &mut self,
        ctx: &mut UpgradeContext,
        progress: &mut Progress,
    ) -> Result<(), StepFailure> {
        self.prepare_structure(ctx);

        if ctx.crosses_legacy_boundary {
            self.enter(ctx, UpgradePhase::PreUpgrade);
            match self.site.database.run_preupgrade() {
                Ok(true) => ctx.note("pre-upgrade script completed"),
                Ok(false) => ctx.note("no pre-upgrade script present"),
                Err(err) => ctx.warn(Warning::recoverable(format!(
                    "pre-upgrade script failed: {err:#}"
                ))),
            }
        }

        self.sync_source(ctx)?;
        let new_branch = ctx.new_branch_number;
        self.migrate_database(ctx, new_branch)?;
        self.enter(ctx, UpgradePhase::DatabaseMigrated);

        if self.policy.is_catalog_managed(new_branch) {
            self.reconcile_addons(ctx, progress)?;
        }
        Ok(())
    }

    /// Same-branch refresh: pull, restore catalog addons, migrate the database.
    pub fn update(&mut self) -> Result<RunReport> {
        let (branch, repository) = self.current_checkout()?;
        let mut ctx = UpgradeContext::new(
            &self.policy,
            branch.clone(),
            branch,
            repository.clone(),
            repository,
        );
        self.begin_run("update", &ctx)?;

        let mut progress = Progress::default();
        let result = self.run_update_steps(&mut ctx, &mut progress);
        Ok(self.finish(ctx, result, progress))
    }

    fn run_update_steps(
        &mut self,
        ctx: &mut UpgradeContext,
        progress: &mut Progress,
    ) -> Result<(), StepFailure> {
        self.sync_source(ctx)?;
        let branch = ctx.new_branch_number;

        if self.policy.is_catalog_managed(branch) {
            if let Some(catalog) = self.fetch_catalog(ctx, LevelMask::ALL, branch) {
                if let Some(installed) = self.installed(ctx) {
                    let planner =
                        Planner::new(self.site.types, self.site.disk, &installed, &catalog);
                    let missing = planner.plan_missing(&installed);
                    self.execute(ctx, &catalog, missing, progress);
                    let unsatisfied = planner.plan_unsatisfied_removals(&installed);
                    self.execute(ctx, &catalog, unsatisfied, progress);
                    self.enter(ctx, UpgradePhase::AddonsReconciled);
                }
            }
        }

        self.migrate_database(ctx, branch)?;
        self.enter(ctx, UpgradePhase::DatabaseMigrated);
        Ok(())
    }

    /// Removes uncatalogued non-core addons and updates the rest for `branch`.
    pub fn upgrade_addons(&mut self, branch: Option<u32>) -> Result<AddonUpgradeReport> {
        let branch = match branch {
            Some(branch) => branch,
            None => branch_number(
                &self
                    .site
                    .source
                    .current_branch()
                    .context("failed to read current branch")?,
            ),
        };

        let loaded = self
            .site
            .catalog
            .fetch(LevelMask::ALL, branch)
            .with_context(|| format!("failed to fetch catalog for branch {branch}"))?;
        let catalog = loaded.value;
        let mut warnings = loaded.warnings;
        let installed = self
            .cache
            .load(&mut warnings)
            .context("failed to load installed addons")?
            .clone();

        let planner = Planner::new(self.site.types, self.site.disk, &installed, &catalog);
        let planned = planner.plan_branch_upgrade(&installed);
        warnings.extend(planned.warnings);
        let actions = self.executor(&catalog).execute_plan(&planned.plan);
        for (request, reason) in &actions.failures {
            warnings.push(Warning::recoverable(format!(
                "{} {} failed: {reason}",
                request.action, request.full_name
            )));
        }

        tracing::info!(
            branch,
            updated = actions.updated,
            removed = actions.removed,
            failed = actions.failed,
            "addon upgrade finished"
        );
        Ok(AddonUpgradeReport {
            branch,
            actions,
            warnings,
        })
    }

    /// Reports what moving to `branch` would drop, without changing the site.
    pub fn preflight(&mut self, branch: u32) -> Result<Preflight> {
        let loaded = self
            .site
            .catalog
            .fetch(LevelMask::ALL, branch)
            .with_context(|| format!("failed to fetch catalog for branch {branch}"))?;
        let catalog = loaded.value;
        let mut warnings = loaded.warnings;
        let installed = self
            .cache
            .load(&mut warnings)
            .context("failed to load installed addons")?
            .clone();

        let planner = Planner::new(self.site.types, self.site.disk, &installed, &catalog);
        let unavailable = planner.report_unavailable(&installed);
        let unknown_on_disk = self
            .unknown_on_disk(&catalog, &mut warnings)
            .into_iter()
            .map(|(full_name, _)| full_name)
            .collect();

        Ok(Preflight {
            branch,
            unavailable,
            unknown_on_disk,
            warnings,
        })
    }

    /// Converts a submodule-based checkout to the modular layout.
    pub fn migrate(&mut self, request: &MigrationRequest) -> Result<RunReport> {
        let (old_branch, old_repository) = self.current_checkout()?;
        let new_repository = self.policy.migration_repository(&old_repository);
        let requested = request
            .branch
            .clone()
            .filter(|branch| !branch.trim().is_empty())
            .unwrap_or_else(|| old_branch.clone());
        let new_branch = self.policy.migration_branch(&requested);

        let mut ctx = UpgradeContext::new(
            &self.policy,
            old_branch,
            new_branch,
            old_repository,
            new_repository,
        );
        self.begin_run("migrate", &ctx)?;

        let progress = Progress::default();
        let question = format!(
            "Migrate {} {} to {} {}? Back up {} before continuing.",
            ctx.old_repository,
            ctx.old_branch,
            ctx.new_repository,
            ctx.new_branch,
            self.layout.dirroot().display()
        );
        if !self.site.prompt.confirm(&question) {
            let failure = StepFailure::Cancelled("migration declined".to_string());
            return Ok(self.finish(ctx, Err(failure), progress));
        }

        let result = self.run_migration_steps(&mut ctx);
        Ok(self.finish(ctx, result, progress))
    }

    fn run_migration_steps(&mut self, ctx: &mut UpgradeContext) -> Result<(), StepFailure> {
        let backup_dir = self.layout.migration_backup_dir();
        let components = self.modular_components(ctx)?;
        let registered = self
            .site
            .source
            .list_modular_components()
            .map_err(|err| {
                StepFailure::ComponentInventory(format!("could not list submodules: {err:#}"))
            })?
            .into_iter()
            .map(PathBuf::from)
            .collect::<BTreeSet<_>>();
        // Submodule removal takes every registered submodule, listed or not.
        let checked = components
            .iter()
            .cloned()
            .chain(registered.iter().cloned())
            .collect::<BTreeSet<_>>();

        let mut archived = 0;
        for component in &checked {
            if !self.site.files.exists(component) {
                continue;
            }
            let archive_name = component.to_string_lossy().replace('/', "_");

            let message = if registered.contains(component) {
                let clean = match self.site.source.is_working_tree_clean(component) {
                    Ok(clean) => clean,
                    Err(err) => {
                        ctx.warn(Warning::recoverable(format!(
                            "status check failed for {}: {err:#}",
                            component.display()
                        )));
                        false
                    }
                };
                if clean {
                    continue;
                }
                match self.site.source.status_snapshot(component) {
                    Ok(snapshot) => {
                        let path = backup_dir.join(format!("git-status-{archive_name}.txt"));
                        if let Err(err) = self.site.files.write_snapshot(&path, &snapshot) {
                            ctx.warn(Warning::recoverable(format!(
                                "could not save status of {}: {err:#}",
                                component.display()
                            )));
                        }
                    }
                    Err(err) => ctx.warn(Warning::recoverable(format!(
                        "could not read status of {}: {err:#}",
                        component.display()
                    ))),
                }
                format!(
                    "submodule at {} contains possible customizations; archived",
                    component.display()
                )
            } else {
                format!("conflicting addon at {}; archived", component.display())
            };

            let archive = backup_dir.join(format!("{archive_name}.tgz"));
            if let Err(err) = self.site.files.archive_directory(component, &archive) {
                ctx.warn(Warning::recoverable(format!(
                    "could not archive {}: {err:#}",
                    component.display()
                )));
            }
            ctx.warn(Warning::recoverable(message));
            archived += 1;
        }

        if archived > 0 {
            let question = format!(
                "{archived} component(s) were archived to {}. Proceed? Conflicts and customizations will be overwritten.",
                backup_dir.display()
            );
            if !self.site.prompt.confirm(&question) {
                return Err(StepFailure::Cancelled(
                    "migration declined after archiving".to_string(),
                ));
            }
        }

        if let Err(err) = self.site.source.remove_modular_components() {
            ctx.warn(Warning::recoverable(format!(
                "failed to remove submodules: {err:#}"
            )));
        }
        if let Err(err) = self.site.files.delete_directories(&components) {
            ctx.warn(Warning::recoverable(format!(
                "failed to delete modular components: {err:#}"
            )));
        }

        self.sync_source(ctx)?;
        let new_branch = ctx.new_branch_number;
        self.migrate_database(ctx, new_branch)?;
        self.enter(ctx, UpgradePhase::DatabaseMigrated);
        Ok(())
    }

    fn current_checkout(&self) -> Result<(String, String)> {
        let branch = self
            .site
            .source
            .current_branch()
            .context("failed to read current branch")?;
        let repository = self
            .site
            .source
            .current_repository()
            .context("failed to read current repository")?;
        Ok((branch, repository_basename(&repository).to_string()))
    }

    fn confirm_major_upgrade(&mut self, ctx: &mut UpgradeContext) -> bool {
        ctx.note(format!(
            "{} to {} is a major version upgrade",
            ctx.old_branch, ctx.new_branch
        ));
        let branch = ctx.new_branch_number;
        let mut unknown = Vec::new();
        if let Some(catalog) = self.fetch_catalog(ctx, LevelMask::ALL, branch) {
            let mut warnings = Vec::new();
            unknown = self
                .unknown_on_disk(&catalog, &mut warnings)
                .into_iter()
                .map(|(full_name, _)| full_name)
                .collect();
            ctx.warn_all(warnings);
        }
        if !unknown.is_empty() {
            ctx.note(format!(
                "addons unknown to {} that will have to be removed: {}",
                ctx.new_branch,
                unknown.join(", ")
            ));
        }
        self.site.prompt.confirm(&format!(
            "Proceed with the upgrade to {}?",
            ctx.new_branch
        ))
    }

    /// Clears out code that would block the checkout change. Every failure here is recoverable.
    fn prepare_structure(&mut self, ctx: &mut UpgradeContext) {
        match self.site.source.list_modular_components() {
            Ok(components)
                if !components.is_empty()
                    && self.policy.requires_submodule_removal(
                        ctx.new_uses_modular_plugins,
                        ctx.new_branch_number,
                    ) =>
            {
                match self.site.source.remove_modular_components() {
                    Ok(()) => ctx.note(format!("removed {} submodule(s)", components.len())),
                    Err(err) => ctx.warn(Warning::recoverable(format!(
                        "failed to remove submodules: {err:#}"
                    ))),
                }
            }
            Ok(_) => {}
            Err(err) => ctx.warn(Warning::recoverable(format!(
                "could not list submodules: {err:#}"
            ))),
        }

        if !ctx.old_uses_modular_plugins && ctx.new_uses_modular_plugins {
            let branch = ctx.new_branch_number;
            if let Some(catalog) =
                self.fetch_catalog(ctx, LevelMask::CORE | LevelMask::PLUS, branch)
            {
                let mut warnings = Vec::new();
                let shipped = self.listed_on_disk(&catalog, &mut warnings);
                ctx.warn_all(warnings);
                self.delete_and_restore(ctx, "catalog-shipped", shipped);
            }
        }

        if ctx.crosses_legacy_boundary {
            let branch = ctx.new_branch_number;
            if let Some(catalog) = self.fetch_catalog(ctx, LevelMask::ALL, branch) {
                let mut warnings = Vec::new();
                let unknown = self.unknown_on_disk(&catalog, &mut warnings);
                ctx.warn_all(warnings);
                self.delete_and_restore(ctx, "unknown", unknown);
            }
        }

        if self.policy.is_catalog_managed(ctx.old_branch_number) {
            let mut warnings = Vec::new();
            let non_core = self.non_core_on_disk(&mut warnings);
            ctx.warn_all(warnings);
            if !non_core.is_empty() {
                let paths = non_core.iter().map(|(_, path)| path.clone()).collect::<Vec<_>>();
                match self.site.files.delete_directories(&paths) {
                    Ok(()) => ctx.note(format!(
                        "deleted {} non-core addon(s); they are restored after the database upgrade",
                        paths.len()
                    )),
                    Err(err) => ctx.warn(Warning::recoverable(format!(
                        "failed to delete non-core addons: {err:#}"
                    ))),
                }
            }
        }
    }

    fn delete_and_restore(
        &self,
        ctx: &mut UpgradeContext,
        label: &str,
        addons: Vec<(String, PathBuf)>,
    ) {
        if addons.is_empty() {
            return;
        }
        let paths = addons.iter().map(|(_, path)| path.clone()).collect::<Vec<_>>();
        match self.site.files.delete_directories(&paths) {
            Ok(()) => ctx.note(format!("deleted {} {label} addon(s)", paths.len())),
            Err(err) => ctx.warn(Warning::recoverable(format!(
                "failed to delete {label} addons: {err:#}"
            ))),
        }

        // Restores core files a bulk delete may have caught.
        let roots = paths
            .iter()
            .filter_map(|path| path.parent().map(PathBuf::from))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>();
        if let Err(err) = self.site.source.restore_paths(&roots) {
            ctx.warn(Warning::recoverable(format!(
                "failed to restore tracked files: {err:#}"
            )));
        }
    }

    fn reconcile_addons(
        &mut self,
        ctx: &mut UpgradeContext,
        progress: &mut Progress,
    ) -> Result<(), StepFailure> {
        let branch = ctx.new_branch_number;
        let Some(catalog) = self.fetch_catalog(ctx, LevelMask::ALL, branch) else {
            return Ok(());
        };
        let Some(installed) = self.installed(ctx) else {
            return Ok(());
        };

        let planner = Planner::new(self.site.types, self.site.disk, &installed, &catalog);
        let missing = planner.plan_missing(&installed);
        self.execute(ctx, &catalog, missing, progress);
        let required = planner.plan_required(&self.policy.required_addons);
        self.execute(ctx, &catalog, required, progress);

        self.cache.invalidate();
        let Some(refreshed) = self.installed(ctx) else {
            return Ok(());
        };
        let planner = Planner::new(self.site.types, self.site.disk, &refreshed, &catalog);
        let unsatisfied = planner.plan_unsatisfied_removals(&refreshed);
        self.execute(ctx, &catalog, unsatisfied, progress);

        // Addon code changed underneath the database; migrate again.
        self.migrate_database(ctx, branch)?;
        self.enter(ctx, UpgradePhase::AddonsReconciled);
        Ok(())
    }

    fn sync_source(&mut self, ctx: &mut UpgradeContext) -> Result<(), StepFailure> {
        self.enter(ctx, UpgradePhase::SourceSync);
        self.site
            .source
            .change_to(&ctx.new_branch, &ctx.new_repository)
            .map_err(|err| StepFailure::SourceSync(format!("{err:#}")))?;
        ctx.note(format!(
            "checkout now on {} {}",
            ctx.new_repository, ctx.new_branch
        ));
        Ok(())
    }

    fn migrate_database(
        &mut self,
        ctx: &mut UpgradeContext,
        branch: u32,
    ) -> Result<(), StepFailure> {
        if !self.policy.database_migrates(branch) {
            ctx.note(format!("no database migration below branch {}", self.policy.legacy_boundary));
            return Ok(());
        }
        self.site
            .database
            .migrate()
            .map_err(|err| StepFailure::DatabaseMigration(format!("{err:#}")))?;
        ctx.note("database migration completed");
        Ok(())
    }

    fn fetch_catalog(
        &self,
        ctx: &mut UpgradeContext,
        levels: LevelMask,
        branch: u32,
    ) -> Option<Catalog> {
        match self.site.catalog.fetch(levels, branch) {
            Ok(loaded) => {
                ctx.warn_all(loaded.warnings);
                Some(loaded.value)
            }
            Err(err) => {
                ctx.warn(Warning::recoverable(format!(
                    "catalog for branch {branch} unavailable: {err:#}"
                )));
                None
            }
        }
    }

    fn installed(&mut self, ctx: &mut UpgradeContext) -> Option<Inventory> {
        let mut warnings = Vec::new();
        let loaded = self.cache.load(&mut warnings).cloned();
        ctx.warn_all(warnings);
        match loaded {
            Ok(installed) => Some(installed),
            Err(err) => {
                ctx.warn(Warning::recoverable(format!(
                    "installed addons unavailable: {err:#}"
                )));
                None
            }
        }
    }

    fn execute(
        &mut self,
        ctx: &mut UpgradeContext,
        catalog: &Catalog,
        planned: Planned,
        progress: &mut Progress,
    ) {
        ctx.warn_all(planned.warnings);
        if !planned.held_back.is_empty() {
            ctx.note(format!(
                "held back for unmet dependencies: {}",
                planned.held_back.join(", ")
            ));
            progress.held_back.extend(planned.held_back);
        }
        if planned.plan.is_empty() {
            return;
        }

        let report = self.executor(catalog).execute_plan(&planned.plan);
        for (request, reason) in &report.failures {
            ctx.warn(Warning::recoverable(format!(
                "{} {} failed: {reason}",
                request.action, request.full_name
            )));
        }
        if let Some(journal) = self.journal.as_mut() {
            let detail = format!(
                "added={} removed={} updated={} failed={}",
                report.added, report.removed, report.updated, report.failed
            );
            if let Err(err) = journal.record(ctx.phase.as_str(), "actions", Some(&detail)) {
                ctx.warn(Warning::recoverable(format!(
                    "failed to journal addon actions: {err:#}"
                )));
            }
        }
        progress.actions.merge(report);
    }

    fn executor<'s>(&'s self, catalog: &'s Catalog) -> AddonExecutor<'s> {
        AddonExecutor::new(
            self.site.types,
            self.layout.dirroot(),
            self.site.hooks,
            self.site.store,
        )
        .with_catalog(catalog)
    }

    /// Addon directories on disk, as (full name, path relative to the site root).
    fn scan_disk(
        &self,
        warnings: &mut Vec<Warning>,
        keep: impl Fn(&AddonType, &str, &str) -> bool,
    ) -> Vec<(String, PathBuf)> {
        let mut found = Vec::new();
        for addon_type in self.site.types.iter() {
            let names = match self.site.disk.list_instances(addon_type) {
                Ok(names) => names,
                Err(err) => {
                    warnings.push(Warning::recoverable(format!(
                        "could not list {} addons: {err:#}",
                        addon_type.key
                    )));
                    continue;
                }
            };
            for name in names {
                let qualified = full_name(&addon_type.key, &name);
                if keep(addon_type, &name, &qualified) {
                    found.push((qualified, addon_type.addon_path(Path::new(""), &name)));
                }
            }
        }
        found
    }

    fn unknown_on_disk(
        &self,
        catalog: &Catalog,
        warnings: &mut Vec<Warning>,
    ) -> Vec<(String, PathBuf)> {
        self.scan_disk(warnings, |_, _, full_name| !catalog.contains(full_name))
    }

    fn listed_on_disk(
        &self,
        catalog: &Catalog,
        warnings: &mut Vec<Warning>,
    ) -> Vec<(String, PathBuf)> {
        self.scan_disk(warnings, |_, _, full_name| catalog.contains(full_name))
    }

    /// Addons carrying their own checkout; core code never does.
    fn non_core_on_disk(&self, warnings: &mut Vec<Warning>) -> Vec<(String, PathBuf)> {
        let disk = self.site.disk;
        self.scan_disk(warnings, |addon_type, name, _| {
            disk.has_vcs_marker(addon_type, name)
        })
    }

    /// Components the modular layout ships on its own, relative to the site root.
    fn modular_components(&self, ctx: &mut UpgradeContext) -> Result<Vec<PathBuf>, StepFailure> {
        if !self.policy.modular_components.is_empty() {
            return Ok(self
                .policy
                .modular_components
                .iter()
                .map(PathBuf::from)
                .collect());
        }
        let branch = ctx.new_branch_number;
        let loaded = self
            .site
            .catalog
            .fetch(LevelMask::CORE | LevelMask::PLUS, branch)
            .map_err(|err| {
                StepFailure::ComponentInventory(format!(
                    "catalog for branch {branch} unavailable: {err:#}"
                ))
            })?;
        ctx.warn_all(loaded.warnings);
        let mut components = BTreeSet::new();
        for (_, addon) in loaded.value.iter() {
            let path = match (&addon.path, self.site.types.get(&addon.addon_type)) {
                (Some(path), _) if path.is_relative() => path.clone(),
                (_, Some(addon_type)) => addon_type.addon_path(Path::new(""), &addon.name),
                _ => continue,
            };
            components.insert(path);
        }
        Ok(components.into_iter().collect())
    }

    fn begin_run(&mut self, operation: &str, ctx: &UpgradeContext) -> Result<()> {
        if !self.record_runs {
            return Ok(());
        }
        let mut metadata = RunMetadata::new(operation, current_unix_timestamp()?);
        metadata.from_branch = Some(ctx.old_branch.clone());
        metadata.to_branch = Some(ctx.new_branch.clone());
        let journal = RunJournal::begin(&self.layout, &metadata)
            .with_context(|| format!("failed to start {operation} run"))?;
        tracing::info!(run = journal.run_id(), operation, "run started");
        self.journal = Some(journal);
        Ok(())
    }

    fn enter(&mut self, ctx: &mut UpgradeContext, phase: UpgradePhase) {
        ctx.enter(phase);
        if let Some(journal) = self.journal.as_mut() {
            if let Err(err) = journal.record(phase.as_str(), "entered", None) {
                ctx.warn(Warning::recoverable(format!(
                    "failed to journal phase {phase}: {err:#}"
                )));
            }
        }
    }

    fn finish(
        &mut self,
        mut ctx: UpgradeContext,
        result: Result<(), StepFailure>,
        progress: Progress,
    ) -> RunReport {
        let failure = result.err();
        let status = match &failure {
            None => "completed",
            Some(failure) if failure.is_cancellation() => {
                self.enter(&mut ctx, UpgradePhase::Cancelled);
                ctx.note(failure.to_string());
                "cancelled"
            }
            Some(failure) => {
                self.enter(&mut ctx, UpgradePhase::Failed);
                ctx.note(failure.to_string());
                "failed"
            }
        };

        let run_id = match self.journal.take() {
            Some(journal) => {
                let run_id = journal.run_id().to_string();
                if let Err(err) = journal.finish(status) {
                    ctx.warn(Warning::recoverable(format!(
                        "failed to close run {run_id}: {err:#}"
                    )));
                }
                Some(run_id)
            }
            None => None,
        };

        tracing::info!(
            status,
            phase = ctx.phase.as_str(),
            warnings = ctx.warnings.len(),
            "run finished"
        );
        RunReport {
            success: failure.is_none(),
            failure,
            context: ctx,
            actions: progress.actions,
            held_back: progress.held_back,
            run_id,
        }
    }
}
