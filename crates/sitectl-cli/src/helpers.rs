use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use sitectl_installer::{run_captured, run_streaming, CommandTemplate};
use sitectl_upgrade::{scan_migration_line, Database, MigrationEvent, Prompt};

pub(crate) fn render_site_command(template: &CommandTemplate, dirroot: &str) -> Vec<String> {
    template.render(&[("dirroot", dirroot)])
}

/// Runs the ledger helper and hands back its stdout.
pub(crate) fn read_ledger_output(template: &CommandTemplate, dirroot: &str) -> Result<String> {
    if template.is_empty() {
        bail!("no ledger helper configured (helpers.ledger)");
    }
    let argv = render_site_command(template, dirroot);
    let output = run_captured(&argv, Some(Path::new(dirroot)))?;
    if !output.success {
        bail!("ledger helper failed: {}", output.combined());
    }
    Ok(output.stdout)
}

/// Database upgrades through the site's own command-line helpers.
pub(crate) struct HelperDatabase {
    dirroot: PathBuf,
    migrate: CommandTemplate,
    preupgrade: CommandTemplate,
    preupgrade_script: PathBuf,
}

impl HelperDatabase {
    pub(crate) fn new(
        dirroot: impl Into<PathBuf>,
        migrate: CommandTemplate,
        preupgrade: CommandTemplate,
        preupgrade_script: impl Into<PathBuf>,
    ) -> Self {
        Self {
            dirroot: dirroot.into(),
            migrate,
            preupgrade,
            preupgrade_script: preupgrade_script.into(),
        }
    }
}

/// Problems the migration helper reported, in output order.
pub(crate) fn migration_problems<'a>(lines: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut problems = Vec::new();
    for line in lines {
        match scan_migration_line(line) {
            MigrationEvent::DefectiveAddon(addon) => {
                problems.push(format!("addon {addon} is defective"))
            }
            MigrationEvent::Downgrade {
                addon,
                database_version,
                code_version,
            } => problems.push(format!(
                "addon {addon} would downgrade from {database_version} to {code_version}"
            )),
            _ => {}
        }
    }
    problems
}

fn log_migration_line(line: &str) {
    match scan_migration_line(line) {
        event if event.is_problem() => {
            tracing::warn!(?event, "migration helper reported a problem")
        }
        MigrationEvent::Stage(stage) => tracing::info!(stage = %stage, "migrating"),
        MigrationEvent::Success => tracing::debug!("migration step succeeded"),
        MigrationEvent::Status(status) => tracing::info!(status = %status, "migration status"),
        _ => tracing::trace!(line, "migration output"),
    }
}

impl Database for HelperDatabase {
    fn migrate(&self) -> Result<()> {
        if self.migrate.is_empty() {
            bail!("no database migration helper configured (helpers.migrate)");
        }
        let dirroot = self.dirroot.to_string_lossy();
        let argv = render_site_command(&self.migrate, &dirroot);
        let output = run_streaming(&argv, Some(self.dirroot.as_path()), log_migration_line)?;
        let problems = migration_problems(output.stdout.lines());
        if !output.success {
            bail!("migration helper failed: {}", output.combined());
        }
        if !problems.is_empty() {
            bail!("migration helper reported: {}", problems.join("; "));
        }
        Ok(())
    }

    fn run_preupgrade(&self) -> Result<bool> {
        if !self.preupgrade_script.is_file() {
            return Ok(false);
        }
        if self.preupgrade.is_empty() {
            bail!("no pre-upgrade helper configured (helpers.preupgrade)");
        }
        let dirroot = self.dirroot.to_string_lossy();
        let script = self.preupgrade_script.to_string_lossy();
        let argv = self
            .preupgrade
            .render(&[("dirroot", &*dirroot), ("script", &*script)]);
        let output = run_captured(&argv, Some(self.dirroot.as_path()))?;
        if !output.success {
            bail!("pre-upgrade script failed: {}", output.combined());
        }
        Ok(true)
    }
}

/// Asks on stderr, reads the answer from stdin. Anything but yes is no.
pub(crate) struct StdinPrompt;

pub(crate) fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

impl Prompt for StdinPrompt {
    fn confirm(&self, question: &str) -> bool {
        let mut stderr = io::stderr();
        if write!(stderr, "{question} [y/N] ").and_then(|_| stderr.flush()).is_err() {
            return false;
        }
        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => is_affirmative(&answer),
            Err(_) => false,
        }
    }
}
