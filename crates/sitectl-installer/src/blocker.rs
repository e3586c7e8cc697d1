use std::fmt;
use std::fs;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::fs_utils::remove_file_if_exists;
use crate::SiteLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockKind {
    /// The site serves its maintenance page.
    Maintenance,
    /// Web access is refused outright.
    AccessDenied,
}

impl BlockKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Maintenance => "maintenance",
            Self::AccessDenied => "access-denied",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.trim() {
            "maintenance" => Ok(Self::Maintenance),
            "access-denied" | "htaccess" => Ok(Self::AccessDenied),
            other => Err(anyhow!("unknown block kind: {other}")),
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait SiteBlocker {
    fn block(&self, kind: BlockKind) -> Result<()>;
    fn unblock(&self, kind: BlockKind) -> Result<()>;
}

const BLOCK_BEGIN: &str = "# BEGIN sitectl block";
const BLOCK_END: &str = "# END sitectl block";

const DEFAULT_MAINTENANCE_PAGE: &str = "<!DOCTYPE html>\n<html><head><title>Site maintenance</title></head>\n<body><p>This site is being upgraded and will be back shortly.</p></body></html>\n";

/// Blocks the site through files the web tier already honours.
#[derive(Debug, Clone)]
pub struct FileBlocker {
    layout: SiteLayout,
    branch: u32,
    maintenance_page: Option<String>,
}

impl FileBlocker {
    /// `branch` picks which maintenance file location the running code reads.
    pub fn new(layout: SiteLayout, branch: u32) -> Self {
        Self {
            layout,
            branch,
            maintenance_page: None,
        }
    }

    pub fn with_maintenance_page(mut self, page: impl Into<String>) -> Self {
        self.maintenance_page = Some(page.into());
        self
    }

    fn write_maintenance_file(&self) -> Result<()> {
        let path = self.layout.maintenance_path(self.branch);
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let page = self
            .maintenance_page
            .as_deref()
            .unwrap_or(DEFAULT_MAINTENANCE_PAGE);
        fs::write(&path, page)
            .with_context(|| format!("failed to write maintenance file: {}", path.display()))
    }

    fn remove_maintenance_files(&self) -> Result<()> {
        let mut removed = false;
        // The block may have been set up by a different branch's code, so check both.
        for path in self.layout.maintenance_paths() {
            removed |= remove_file_if_exists(&path)
                .with_context(|| format!("failed to remove maintenance file: {}", path.display()))?;
        }
        if !removed {
            tracing::debug!("no maintenance file was present");
        }
        Ok(())
    }

    fn add_access_rules(&self) -> Result<()> {
        let path = self.layout.htaccess_path();
        let existing = read_optional(&path)?;
        if existing.contains(BLOCK_BEGIN) {
            return Ok(());
        }
        let mut body = existing;
        if !body.is_empty() && !body.ends_with('\n') {
            body.push('\n');
        }
        body.push_str(&format!("{BLOCK_BEGIN}\nRequire all denied\n{BLOCK_END}\n"));
        fs::write(&path, body)
            .with_context(|| format!("failed to write access rules: {}", path.display()))
    }

    fn remove_access_rules(&self) -> Result<()> {
        let path = self.layout.htaccess_path();
        let existing = read_optional(&path)?;
        if !existing.contains(BLOCK_BEGIN) {
            return Ok(());
        }

        let mut kept = Vec::new();
        let mut inside = false;
        for line in existing.lines() {
            match line.trim() {
                BLOCK_BEGIN => inside = true,
                BLOCK_END => inside = false,
                _ if !inside => kept.push(line),
                _ => {}
            }
        }

        if kept.iter().all(|line| line.trim().is_empty()) {
            remove_file_if_exists(&path)
                .with_context(|| format!("failed to remove access rules: {}", path.display()))?;
            return Ok(());
        }
        fs::write(&path, format!("{}\n", kept.join("\n")))
            .with_context(|| format!("failed to write access rules: {}", path.display()))
    }
}

fn read_optional(path: &std::path::Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(raw),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

impl SiteBlocker for FileBlocker {
    fn block(&self, kind: BlockKind) -> Result<()> {
        match kind {
            BlockKind::Maintenance => self.write_maintenance_file()?,
            BlockKind::AccessDenied => self.add_access_rules()?,
        }
        tracing::info!(kind = kind.as_str(), "site blocked");
        Ok(())
    }

    fn unblock(&self, kind: BlockKind) -> Result<()> {
        match kind {
            BlockKind::Maintenance => self.remove_maintenance_files()?,
            BlockKind::AccessDenied => self.remove_access_rules()?,
        }
        tracing::info!(kind = kind.as_str(), "site unblocked");
        Ok(())
    }
}
