use std::fs;
use std::io;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use sitectl_core::{
    branch_number, check_upgrade_path, parse_release, ActionPlan, AddonTypeCatalog, Catalog,
    DiskInventory, InstalledLedger, Inventory, Presence, ReferenceCatalog, Source,
};
use sitectl_installer::{
    active_run, list_runs, write_action_request, ActionOutcome, AddonExecutor, BlockKind,
    CommandHooks, FileBlocker, GitCodeStore, LocalSiteFiles, SiteBlocker, SiteLayout,
};
use sitectl_registry::{FilesystemCatalog, HelperLedger, HttpCatalog, SiteTree};
use sitectl_resolver::{Planned, Planner};
use sitectl_upgrade::{
    AssumeYes, MigrationRequest, Orchestrator, Prompt, RunReport, Site, SourceControl,
    UpgradeRequest,
};

use crate::completion::write_completions_script;
use crate::config::{CatalogKind, SiteConfig, DEFAULT_CONFIG_PATH};
use crate::git_ops::GitCheckout;
use crate::helpers::{read_ledger_output, HelperDatabase, StdinPrompt};
use crate::render::{
    format_addon_upgrade_lines, format_batch_summary, format_plan_lines,
    format_preflight_lines, format_run_list_lines, format_run_report_lines, format_warning_lines,
    TerminalRenderer,
};
use crate::{Cli, CliBlockKind, Commands, PlanKind};

type LedgerFetch = Box<dyn Fn() -> Result<String>>;

impl From<CliBlockKind> for BlockKind {
    fn from(kind: CliBlockKind) -> Self {
        match kind {
            CliBlockKind::Maintenance => BlockKind::Maintenance,
            CliBlockKind::AccessDenied => BlockKind::AccessDenied,
        }
    }
}

/// Concrete collaborators for one configured site.
pub(crate) struct SiteServices {
    config: SiteConfig,
    layout: SiteLayout,
    types: AddonTypeCatalog,
    disk: SiteTree,
    ledger: HelperLedger<LedgerFetch>,
    catalog: Box<dyn ReferenceCatalog>,
    source: GitCheckout,
    database: HelperDatabase,
    files: LocalSiteFiles,
    hooks: CommandHooks,
    store: GitCodeStore,
}

impl SiteServices {
    pub(crate) fn from_config(config: SiteConfig) -> Result<Self> {
        let layout = config.layout();
        let types = config.addon_types()?;
        let dirroot = config.site.dirroot.clone();

        let catalog: Box<dyn ReferenceCatalog> = match config.catalog.kind {
            CatalogKind::Filesystem => Box::new(FilesystemCatalog::new(
                resolve_catalog_root(&config),
                types.clone(),
            )),
            CatalogKind::Http => Box::new(HttpCatalog::new(
                config.catalog.location.clone(),
                config.catalog_token(),
                types.clone(),
            )?),
        };

        let ledger_template = config.helpers.ledger.clone();
        let ledger_root = dirroot.to_string_lossy().into_owned();
        let fetch: LedgerFetch =
            Box::new(move || read_ledger_output(&ledger_template, &ledger_root));

        Ok(Self {
            disk: SiteTree::new(&dirroot),
            ledger: HelperLedger::new(fetch),
            catalog,
            source: GitCheckout::new(&dirroot),
            database: HelperDatabase::new(
                &dirroot,
                config.helpers.migrate.clone(),
                config.helpers.preupgrade.clone(),
                layout.preupgrade_script_path(),
            ),
            files: LocalSiteFiles::new(&dirroot),
            hooks: CommandHooks::new(
                &dirroot,
                config.hooks.install.clone(),
                config.hooks.uninstall.clone(),
                config.hooks.upgrade.clone(),
            ),
            store: GitCodeStore,
            types,
            layout,
            config,
        })
    }

    /// Blocker for the code currently checked out.
    fn blocker(&self) -> Result<FileBlocker> {
        let branch = branch_number(
            &self
                .source
                .current_branch()
                .context("failed to read current branch")?,
        );
        let mut blocker = FileBlocker::new(self.layout.clone(), branch);
        if let Some(page) = &self.config.site.maintenance_page {
            let contents = fs::read_to_string(page)
                .with_context(|| format!("failed to read maintenance page: {}", page.display()))?;
            blocker = blocker.with_maintenance_page(contents);
        }
        Ok(blocker)
    }

    fn site<'a>(&'a self, blocker: &'a FileBlocker, prompt: &'a dyn Prompt) -> Site<'a> {
        Site {
            types: &self.types,
            disk: &self.disk,
            ledger: &self.ledger,
            catalog: self.catalog.as_ref(),
            source: &self.source,
            database: &self.database,
            blocker,
            files: &self.files,
            hooks: &self.hooks,
            store: &self.store,
            prompt,
        }
    }

    fn orchestrator<'a>(
        &'a self,
        blocker: &'a FileBlocker,
        prompt: &'a dyn Prompt,
    ) -> Orchestrator<'a> {
        Orchestrator::new(
            self.site(blocker, prompt),
            self.layout.clone(),
            self.config.policy.clone(),
        )
        .with_block_kind(self.config.run.block)
        .with_run_journal(self.config.run.journal)
    }

    fn current_branch_number(&self) -> Result<u32> {
        Ok(branch_number(
            &self
                .source
                .current_branch()
                .context("failed to read current branch")?,
        ))
    }
}

/// Filesystem catalogs given as relative paths live under the data root.
fn resolve_catalog_root(config: &SiteConfig) -> PathBuf {
    let location = PathBuf::from(&config.catalog.location);
    if location.is_absolute() {
        location
    } else {
        config.layout().state_dir().join(location)
    }
}

pub(crate) fn resolve_config_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| std::env::var_os("SITECTL_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Accepts `MOODLE_27_STABLE` or a bare `27`.
pub(crate) fn parse_branch_arg(value: &str) -> Result<u32> {
    let trimmed = value.trim();
    let number = trimmed
        .parse::<u32>()
        .unwrap_or_else(|_| branch_number(trimmed));
    if number == 0 {
        bail!("'{value}' does not name a branch");
    }
    Ok(number)
}

fn prompt_for(yes: bool) -> Box<dyn Prompt> {
    if yes {
        Box::new(AssumeYes)
    } else {
        Box::new(StdinPrompt)
    }
}

fn finish_run(operation: &str, report: &RunReport, renderer: TerminalRenderer) -> Result<()> {
    renderer.print_lines(&format_run_report_lines(operation, report, renderer.style()));
    match &report.failure {
        Some(failure) if !failure.is_cancellation() => Err(anyhow!("{operation} failed: {failure}")),
        _ => Ok(()),
    }
}

pub(crate) fn plan_for(
    kind: PlanKind,
    planner: &Planner<'_>,
    installed: &Inventory,
    required: &[String],
) -> Planned {
    match kind {
        PlanKind::Missing => planner.plan_missing(installed),
        PlanKind::Updates => planner.plan_updates(installed),
        PlanKind::Removals => planner.plan_removals(installed),
        PlanKind::Unsatisfied => planner.plan_unsatisfied_removals(installed),
        PlanKind::Required => planner.plan_required(required),
        PlanKind::BranchUpgrade => planner.plan_branch_upgrade(installed),
    }
}

pub(crate) fn presence_label(presence: Presence) -> &'static str {
    match presence {
        Presence::Installed => "installed",
        Presence::Missing => "missing",
        Presence::Placeholder => "placeholder",
        Presence::Incomplete => "incomplete",
    }
}

fn apply_plan(
    services: &SiteServices,
    catalog: &Catalog,
    plan: &ActionPlan,
    renderer: TerminalRenderer,
) -> Result<()> {
    let executor = AddonExecutor::new(
        &services.types,
        &services.config.site.dirroot,
        &services.hooks,
        &services.store,
    )
    .with_catalog(catalog);

    let mut progress = renderer.start_progress("apply", plan.len() as u64);
    let mut done = 0_u64;
    let report = executor.execute_plan_with_progress(plan, |request, outcome| {
        done += 1;
        progress.set(done);
        let line = match outcome {
            ActionOutcome::Success => format!("{} {}: ok", request.action, request.full_name),
            ActionOutcome::Failure(reason) => {
                format!("{} {}: {reason}", request.action, request.full_name)
            }
        };
        progress.println(&line);
    });
    progress.finish_success();

    let summary = format_batch_summary(&report);
    if report.failed > 0 {
        renderer.print_status("warn", &summary);
        bail!("{} addon action(s) failed", report.failed);
    }
    renderer.print_status("ok", &summary);
    Ok(())
}

pub(crate) fn run_cli(cli: Cli) -> Result<()> {
    let renderer = TerminalRenderer::current();

    if let Commands::Completions { shell } = &cli.command {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        return write_completions_script(*shell, &mut handle);
    }
    if let Commands::CheckBranch { release, branch } = &cli.command {
        let version = parse_release(release)?;
        let target = parse_branch_arg(branch)?;
        check_upgrade_path(&version, target)?;
        renderer.print_status(
            "ok",
            &format!("release {version} may upgrade directly to branch {target}"),
        );
        return Ok(());
    }

    let config_path = resolve_config_path(cli.config);
    let config = SiteConfig::load(&config_path)?;
    let services = SiteServices::from_config(config)?;
    tracing::debug!(config = %config_path.display(), "site config loaded");

    match cli.command {
        Commands::Upgrade {
            branch,
            repository,
            yes,
        } => {
            let blocker = services.blocker()?;
            let prompt = prompt_for(yes);
            let report = services
                .orchestrator(&blocker, prompt.as_ref())
                .upgrade(&UpgradeRequest { branch, repository })?;
            finish_run("upgrade", &report, renderer)?;
        }
        Commands::Update { yes } => {
            let blocker = services.blocker()?;
            let prompt = prompt_for(yes);
            let report = services.orchestrator(&blocker, prompt.as_ref()).update()?;
            finish_run("update", &report, renderer)?;
        }
        Commands::Migrate { branch, yes } => {
            let blocker = services.blocker()?;
            let prompt = prompt_for(yes);
            let report = services
                .orchestrator(&blocker, prompt.as_ref())
                .migrate(&MigrationRequest { branch })?;
            finish_run("migrate", &report, renderer)?;
        }
        Commands::UpgradeAddons { branch } => {
            let blocker = services.blocker()?;
            let report = services
                .orchestrator(&blocker, &AssumeYes)
                .upgrade_addons(branch)?;
            renderer.print_lines(&format_addon_upgrade_lines(&report, renderer.style()));
            if report.actions.failed > 0 {
                bail!("{} addon action(s) failed", report.actions.failed);
            }
        }
        Commands::Preflight { branch } => {
            let branch = parse_branch_arg(&branch)?;
            let blocker = services.blocker()?;
            let preflight = services
                .orchestrator(&blocker, &AssumeYes)
                .preflight(branch)?;
            renderer.print_lines(&format_preflight_lines(&preflight, renderer.style()));
        }
        Commands::Plan {
            kind,
            branch,
            queue,
            apply,
        } => {
            let branch = match branch {
                Some(branch) => branch,
                None => services.current_branch_number()?,
            };
            let levels = services.config.level_mask()?;
            let loaded_catalog = services
                .catalog
                .fetch(levels, branch)
                .with_context(|| format!("failed to fetch catalog for branch {branch}"))?;
            let loaded_ledger = services.ledger.load(&services.types)?;
            let catalog = loaded_catalog.value;
            let installed = loaded_ledger.value;

            let planner = Planner::new(&services.types, &services.disk, &installed, &catalog);
            let planned = plan_for(kind, &planner, &installed, &services.config.policy.required_addons);

            renderer.print_section("plan");
            renderer.print_lines(&format_plan_lines(&planned.plan));
            let mut warnings = loaded_catalog.warnings;
            warnings.extend(loaded_ledger.warnings);
            warnings.extend(planned.warnings.iter().cloned());
            renderer.print_lines(&format_warning_lines(renderer.style(), &warnings));
            if !planned.held_back.is_empty() {
                renderer.print_status(
                    "warn",
                    &format!("held back: {}", planned.held_back.join(", ")),
                );
            }

            if queue {
                match write_action_request(
                    &services.config.request_dir(),
                    &services.config.site.dirroot,
                    &planned.plan,
                )? {
                    Some(path) => renderer
                        .print_status("ok", &format!("queued request {}", path.display())),
                    None => renderer.print_status("ok", "nothing to queue"),
                }
            } else if apply && !planned.plan.is_empty() {
                apply_plan(&services, &catalog, &planned.plan, renderer)?;
            }
        }
        Commands::Block { kind } => {
            let kind = kind.map(BlockKind::from).unwrap_or(services.config.run.block);
            services.blocker()?.block(kind)?;
            renderer.print_status("ok", &format!("site blocked ({kind})"));
        }
        Commands::Unblock { kind } => {
            let kind = kind.map(BlockKind::from).unwrap_or(services.config.run.block);
            services.blocker()?.unblock(kind)?;
            renderer.print_status("ok", &format!("site unblocked ({kind})"));
        }
        Commands::Addons { addon_type } => {
            let loaded = services.ledger.load(&services.types)?;
            renderer.print_lines(&format_warning_lines(renderer.style(), &loaded.warnings));
            for addon in loaded.value.iter() {
                if addon_type
                    .as_deref()
                    .is_some_and(|wanted| wanted != addon.addon_type)
                {
                    continue;
                }
                let presence = services
                    .types
                    .get(&addon.addon_type)
                    .map(|definition| services.disk.presence(definition, &addon.name))
                    .unwrap_or(Presence::Missing);
                let version = addon
                    .version(Source::Disk)
                    .map(|version| version.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{} {} {}",
                    addon.full_name(),
                    version,
                    presence_label(presence)
                );
            }
        }
        Commands::Runs { json } => {
            let runs = list_runs(&services.layout)?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&runs).context("failed to encode run list")?
                );
                return Ok(());
            }
            if let Some(active) = active_run(&services.layout)? {
                renderer.print_status("warn", &format!("run in progress: {active}"));
            }
            renderer.print_lines(&format_run_list_lines(&runs));
        }
        Commands::Completions { .. } | Commands::CheckBranch { .. } => {}
    }

    Ok(())
}
