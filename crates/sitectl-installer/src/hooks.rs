use std::fs;
use std::path::PathBuf;
use std::process::Command;

use anyhow::{anyhow, Context, Result};

use crate::executor::{AddonHooks, AddonTarget, CodeStore, HookOutput};
use crate::fs_utils::remove_path_if_exists;
use crate::process::{run_captured, run_command, CommandTemplate};

/// Hooks that shell out to configured command lines.
///
/// Templates may use `{dirroot}`, `{type}`, `{name}`, `{full_name}` and `{path}`.
/// An empty template is a hook that always succeeds.
#[derive(Debug, Clone)]
pub struct CommandHooks {
    dirroot: PathBuf,
    install: CommandTemplate,
    uninstall: CommandTemplate,
    upgrade: CommandTemplate,
}

impl CommandHooks {
    pub fn new(
        dirroot: impl Into<PathBuf>,
        install: CommandTemplate,
        uninstall: CommandTemplate,
        upgrade: CommandTemplate,
    ) -> Self {
        Self {
            dirroot: dirroot.into(),
            install,
            uninstall,
            upgrade,
        }
    }

    fn run(&self, hook: &str, template: &CommandTemplate, target: &AddonTarget) -> Result<HookOutput> {
        if template.is_empty() {
            tracing::debug!(hook, addon = %target.full_name, "no hook configured");
            return Ok(HookOutput::ok(""));
        }

        let dirroot = self.dirroot.display().to_string();
        let path = target.path.display().to_string();
        let argv = template.render(&[
            ("dirroot", dirroot.as_str()),
            ("type", target.addon_type.as_str()),
            ("name", target.name.as_str()),
            ("full_name", target.full_name.as_str()),
            ("path", path.as_str()),
        ]);
        let output = run_captured(&argv, Some(&self.dirroot))
            .with_context(|| format!("{hook} hook for {} failed to run", target.full_name))?;
        Ok(HookOutput {
            success: output.success,
            output: output.combined(),
        })
    }
}

impl AddonHooks for CommandHooks {
    fn install(&self, target: &AddonTarget) -> Result<HookOutput> {
        self.run("install", &self.install, target)
    }

    fn uninstall(&self, target: &AddonTarget) -> Result<HookOutput> {
        self.run("uninstall", &self.uninstall, target)
    }

    fn upgrade_hook(&self, target: &AddonTarget) -> Result<HookOutput> {
        self.run("upgrade", &self.upgrade, target)
    }
}

/// Places addon code by cloning the catalog's code source.
#[derive(Debug, Clone, Default)]
pub struct GitCodeStore;

impl CodeStore for GitCodeStore {
    fn place(&self, target: &AddonTarget) -> Result<()> {
        let source = target
            .code_source
            .as_deref()
            .ok_or_else(|| anyhow!("no code source known for {}", target.full_name))?;

        // Placeholders and half-installed directories are replaced outright.
        remove_path_if_exists(&target.path)
            .with_context(|| format!("failed to clear {}", target.path.display()))?;
        if let Some(parent) = target.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut command = Command::new("git");
        command
            .arg("clone")
            .arg("--quiet")
            .arg("--")
            .arg(source)
            .arg(&target.path);
        run_command(&mut command, &format!("failed cloning {}", target.full_name))
    }

    fn delete(&self, target: &AddonTarget) -> Result<()> {
        remove_path_if_exists(&target.path)
            .with_context(|| format!("failed to delete {}", target.path.display()))?;
        Ok(())
    }
}
