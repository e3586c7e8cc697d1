use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sitectl_core::{AddonType, DiskInventory, Presence};

/// The site's code checkout, read straight from the filesystem.
#[derive(Debug, Clone)]
pub struct SiteTree {
    dirroot: PathBuf,
}

impl SiteTree {
    pub fn new(dirroot: impl Into<PathBuf>) -> Self {
        Self {
            dirroot: dirroot.into(),
        }
    }

    pub fn dirroot(&self) -> &Path {
        &self.dirroot
    }
}

impl DiskInventory for SiteTree {
    fn list_instances(&self, addon_type: &AddonType) -> Result<BTreeSet<String>> {
        let root = addon_type.root(&self.dirroot);
        let mut names = BTreeSet::new();
        if !root.exists() {
            return Ok(names);
        }

        for entry in fs::read_dir(&root)
            .with_context(|| format!("failed to read addon directory: {}", root.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            if entry.path().join(addon_type.marker_for(&name)).is_file() {
                names.insert(name);
            }
        }
        Ok(names)
    }

    fn presence(&self, addon_type: &AddonType, name: &str) -> Presence {
        let path = addon_type.addon_path(&self.dirroot, name);
        let Ok(metadata) = fs::symlink_metadata(&path) else {
            return Presence::Missing;
        };
        if metadata.file_type().is_symlink() {
            return Presence::Placeholder;
        }
        if metadata.is_dir() && path.join(addon_type.marker_for(name)).is_file() {
            Presence::Installed
        } else {
            Presence::Incomplete
        }
    }

    fn has_vcs_marker(&self, addon_type: &AddonType, name: &str) -> bool {
        addon_type
            .addon_path(&self.dirroot, name)
            .join(".git")
            .exists()
    }
}
