use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Context, Result};

use crate::fs_utils::remove_path_if_exists;
use crate::process::run_command;

pub trait SiteFiles {
    /// Relative paths are taken from the site root.
    fn delete_directories(&self, paths: &[PathBuf]) -> Result<()>;
    fn archive_directory(&self, source: &Path, archive: &Path) -> Result<()>;
    fn write_snapshot(&self, path: &Path, contents: &str) -> Result<()>;
    fn exists(&self, path: &Path) -> bool;
}

/// Site file operations confined to one site root.
#[derive(Debug, Clone)]
pub struct LocalSiteFiles {
    dirroot: PathBuf,
}

impl LocalSiteFiles {
    pub fn new(dirroot: impl Into<PathBuf>) -> Self {
        Self {
            dirroot: dirroot.into(),
        }
    }

    /// Resolves `path` under the site root; anything that would land outside it is refused.
    pub fn resolve(&self, path: &Path) -> Result<PathBuf> {
        let resolved = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.dirroot.join(path)
        };
        let escapes = resolved
            .strip_prefix(&self.dirroot)
            .map(|relative| {
                relative.as_os_str().is_empty()
                    || relative
                        .components()
                        .any(|component| !matches!(component, Component::Normal(_)))
            })
            .unwrap_or(true);
        if escapes {
            return Err(anyhow!(
                "refusing to touch {} outside site root {}",
                resolved.display(),
                self.dirroot.display()
            ));
        }
        Ok(resolved)
    }
}

impl SiteFiles for LocalSiteFiles {
    fn delete_directories(&self, paths: &[PathBuf]) -> Result<()> {
        for path in paths {
            let resolved = self.resolve(path)?;
            if remove_path_if_exists(&resolved)
                .with_context(|| format!("failed to delete {}", resolved.display()))?
            {
                tracing::info!(path = %resolved.display(), "deleted site directory");
            }
        }
        Ok(())
    }

    fn archive_directory(&self, source: &Path, archive: &Path) -> Result<()> {
        let source = self.resolve(source)?;
        let (Some(parent), Some(name)) = (source.parent(), source.file_name()) else {
            return Err(anyhow!("cannot archive {}", source.display()));
        };
        if let Some(archive_parent) = archive.parent() {
            fs::create_dir_all(archive_parent)
                .with_context(|| format!("failed to create {}", archive_parent.display()))?;
        }

        let mut command = Command::new("tar");
        command
            .arg("-czf")
            .arg(archive)
            .arg("-C")
            .arg(parent)
            .arg(name);
        run_command(
            &mut command,
            &format!("failed archiving {} to {}", source.display(), archive.display()),
        )
    }

    fn write_snapshot(&self, path: &Path, contents: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(path, contents)
            .with_context(|| format!("failed to write snapshot: {}", path.display()))
    }

    fn exists(&self, path: &Path) -> bool {
        self.resolve(path)
            .map(|resolved| fs::symlink_metadata(resolved).is_ok())
            .unwrap_or(false)
    }
}
