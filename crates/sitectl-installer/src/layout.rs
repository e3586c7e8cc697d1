use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

const MAINTENANCE_FILE: &str = "climaintenance.html";
const LEGACY_MAINTENANCE_FILE: &str = "1/maintenance.html";
const LEGACY_BRANCH_LIMIT: u32 = 20;

/// Where a site's code, data, and the tool's own state live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteLayout {
    dirroot: PathBuf,
    dataroot: PathBuf,
}

impl SiteLayout {
    pub fn new(dirroot: impl Into<PathBuf>, dataroot: impl Into<PathBuf>) -> Self {
        Self {
            dirroot: dirroot.into(),
            dataroot: dataroot.into(),
        }
    }

    pub fn dirroot(&self) -> &Path {
        &self.dirroot
    }

    pub fn dataroot(&self) -> &Path {
        &self.dataroot
    }

    pub fn state_dir(&self) -> PathBuf {
        self.dataroot.join("sitectl")
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.state_dir().join("runs")
    }

    pub fn run_active_path(&self) -> PathBuf {
        self.runs_dir().join("active")
    }

    pub fn run_metadata_path(&self, run_id: &str) -> PathBuf {
        self.runs_dir().join(format!("{run_id}.json"))
    }

    pub fn run_journal_path(&self, run_id: &str) -> PathBuf {
        self.runs_dir().join(format!("{run_id}.journal"))
    }

    pub fn requests_dir(&self) -> PathBuf {
        self.state_dir().join("requests")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.state_dir().join("backups")
    }

    pub fn migration_backup_dir(&self) -> PathBuf {
        self.backups_dir().join("submodule-migration")
    }

    /// Maintenance page the site checks for; older branches look in a different place.
    pub fn maintenance_path(&self, branch: u32) -> PathBuf {
        if branch < LEGACY_BRANCH_LIMIT {
            self.dataroot.join(LEGACY_MAINTENANCE_FILE)
        } else {
            self.dataroot.join(MAINTENANCE_FILE)
        }
    }

    pub fn maintenance_paths(&self) -> [PathBuf; 2] {
        [
            self.dataroot.join(MAINTENANCE_FILE),
            self.dataroot.join(LEGACY_MAINTENANCE_FILE),
        ]
    }

    pub fn htaccess_path(&self) -> PathBuf {
        self.dirroot.join(".htaccess")
    }

    pub fn preupgrade_script_path(&self) -> PathBuf {
        self.dirroot
            .join("elis")
            .join("core")
            .join("scripts")
            .join("preupgrade.php")
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [
            self.state_dir(),
            self.runs_dir(),
            self.requests_dir(),
            self.backups_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}
