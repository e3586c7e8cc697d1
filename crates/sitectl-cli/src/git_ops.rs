use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use sitectl_core::repository_basename;
use sitectl_upgrade::SourceControl;

pub(crate) fn base_git_command() -> Command {
    let mut command = Command::new("git");
    command
        .arg("-c")
        .arg("core.autocrlf=false")
        .arg("-c")
        .arg("core.eol=lf");
    command
}

pub(crate) fn run_git_command(repo_root: &Path, args: &[&str]) -> Result<()> {
    git_output(repo_root, args).map(|_| ())
}

pub(crate) fn git_output(repo_root: &Path, args: &[&str]) -> Result<String> {
    let output = base_git_command()
        .args(args)
        .current_dir(repo_root)
        .output()
        .with_context(|| {
            format!(
                "failed launching git {} in {}",
                args.join(" "),
                repo_root.display()
            )
        })?;
    if !output.status.success() {
        anyhow::bail!(
            "git {} failed in {}: {}",
            args.join(" "),
            repo_root.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    String::from_utf8(output.stdout).context("git produced non-UTF-8 output")
}

/// Swaps the repository name at the end of a remote URL, keeping host, path, and suffix.
pub(crate) fn swap_repository(url: &str, repository: &str) -> String {
    let current = repository_basename(url);
    if current.is_empty() || current == repository {
        return url.to_string();
    }
    match url.rfind(current) {
        Some(index) => format!(
            "{}{}{}",
            &url[..index],
            repository,
            &url[index + current.len()..]
        ),
        None => url.to_string(),
    }
}

/// `git config --get-regexp` output for submodule paths, one path per line.
pub(crate) fn parse_submodule_paths(raw: &str) -> Vec<String> {
    raw.lines()
        .filter_map(|line| line.split_once(char::is_whitespace))
        .filter(|(key, _)| key.starts_with("submodule.") && key.ends_with(".path"))
        .map(|(_, path)| path.trim().to_string())
        .filter(|path| !path.is_empty())
        .collect()
}

/// The site's code checkout, driven through the git binary.
#[derive(Debug, Clone)]
pub(crate) struct GitCheckout {
    dirroot: PathBuf,
}

impl GitCheckout {
    pub(crate) fn new(dirroot: impl Into<PathBuf>) -> Self {
        Self {
            dirroot: dirroot.into(),
        }
    }

    fn remote_url(&self) -> Result<String> {
        Ok(git_output(&self.dirroot, &["config", "--get", "remote.origin.url"])
            .context("checkout has no origin remote")?
            .trim()
            .to_string())
    }
}

impl SourceControl for GitCheckout {
    fn current_branch(&self) -> Result<String> {
        Ok(git_output(&self.dirroot, &["rev-parse", "--abbrev-ref", "HEAD"])?
            .trim()
            .to_string())
    }

    fn current_repository(&self) -> Result<String> {
        self.remote_url()
    }

    fn change_to(&self, branch: &str, repository: &str) -> Result<()> {
        let url = self.remote_url()?;
        let target = swap_repository(&url, repository);
        if target != url {
            tracing::info!(from = %url, to = %target, "switching origin repository");
            run_git_command(&self.dirroot, &["remote", "set-url", "origin", target.as_str()])?;
        }
        run_git_command(&self.dirroot, &["fetch", "--prune", "origin"])?;
        run_git_command(&self.dirroot, &["checkout", branch])?;
        run_git_command(&self.dirroot, &["pull", "--ff-only", "origin", branch])?;
        if self.dirroot.join(".gitmodules").is_file() {
            run_git_command(
                &self.dirroot,
                &["submodule", "update", "--init", "--recursive"],
            )?;
        }
        Ok(())
    }

    fn list_modular_components(&self) -> Result<Vec<String>> {
        if !self.dirroot.join(".gitmodules").is_file() {
            return Ok(Vec::new());
        }
        let raw = git_output(
            &self.dirroot,
            &["config", "--file", ".gitmodules", "--get-regexp", "path"],
        )?;
        Ok(parse_submodule_paths(&raw))
    }

    fn remove_modular_components(&self) -> Result<()> {
        let paths = self.list_modular_components()?;
        if paths.is_empty() {
            return Ok(());
        }
        run_git_command(&self.dirroot, &["submodule", "deinit", "--force", "--all"])?;
        for path in &paths {
            run_git_command(&self.dirroot, &["rm", "-q", "-f", "--", path.as_str()])?;
        }
        let modules = self.dirroot.join(".git").join("modules");
        if modules.is_dir() {
            fs::remove_dir_all(&modules)
                .with_context(|| format!("failed to remove {}", modules.display()))?;
        }
        tracing::info!(count = paths.len(), "removed submodules");
        Ok(())
    }

    fn is_working_tree_clean(&self, path: &Path) -> Result<bool> {
        let status = git_output(&self.dirroot.join(path), &["status", "--porcelain"])?;
        Ok(status.trim().is_empty())
    }

    fn status_snapshot(&self, path: &Path) -> Result<String> {
        let root = self.dirroot.join(path);
        let status = git_output(&root, &["status"])?;
        let diff = git_output(&root, &["diff"])?;
        Ok(format!("{status}\n{diff}"))
    }

    fn restore_paths(&self, paths: &[PathBuf]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let rendered = paths
            .iter()
            .map(|path| path.to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        let mut args = vec!["checkout", "HEAD", "--"];
        args.extend(rendered.iter().map(String::as_str));
        run_git_command(&self.dirroot, &args)
    }
}
