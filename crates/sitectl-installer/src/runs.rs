use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::SiteLayout;

pub const RUN_METADATA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub version: u32,
    pub run_id: String,
    pub operation: String,
    pub status: String,
    pub started_at_unix: u64,
    #[serde(default)]
    pub from_branch: Option<String>,
    #[serde(default)]
    pub to_branch: Option<String>,
}

impl RunMetadata {
    pub fn new(operation: &str, started_at_unix: u64) -> Self {
        Self {
            version: RUN_METADATA_VERSION,
            run_id: format!("{operation}-{started_at_unix}-{}", std::process::id()),
            operation: operation.to_string(),
            status: "running".to_string(),
            started_at_unix,
            from_branch: None,
            to_branch: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunJournalEntry {
    pub seq: u64,
    pub phase: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Which run holds the site; stored in the active marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveRun {
    pub run_id: String,
    pub operation: String,
    pub started_at_unix: u64,
    pub pid: u32,
}

impl ActiveRun {
    pub fn for_run(metadata: &RunMetadata) -> Self {
        Self {
            run_id: metadata.run_id.clone(),
            operation: metadata.operation.clone(),
            started_at_unix: metadata.started_at_unix,
            pid: std::process::id(),
        }
    }
}

impl fmt::Display for ActiveRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, pid {})", self.run_id, self.operation, self.pid)
    }
}

/// Claims the site for one run. Fails while another claim is in place.
pub fn claim_active_run(layout: &SiteLayout, metadata: &RunMetadata) -> Result<ActiveRun> {
    let path = layout.run_active_path();
    let claim = ActiveRun::for_run(metadata);
    let dir = layout.runs_dir();
    fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let opened = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path);
    let mut file = match opened {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            let holder = match active_run(layout) {
                Ok(Some(holder)) => holder.to_string(),
                Ok(None) | Err(_) => "an unidentified run".to_string(),
            };
            bail!(
                "site is held by {holder}; remove {} if that run is gone",
                path.display()
            );
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to claim {}", path.display()));
        }
    };

    serde_json::to_writer(&mut file, &claim)
        .with_context(|| format!("failed to write {}", path.display()))?;
    file.sync_all()
        .with_context(|| format!("failed to sync {}", path.display()))?;
    Ok(claim)
}

/// The run currently holding the site, if any.
pub fn active_run(layout: &SiteLayout) -> Result<Option<ActiveRun>> {
    let path = layout.run_active_path();
    let raw = match fs::read(&path) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        other => other.with_context(|| format!("failed to read {}", path.display()))?,
    };
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(&raw)
        .map(Some)
        .with_context(|| format!("active run marker is corrupt: {}", path.display()))
}

pub fn clear_active_run(layout: &SiteLayout) -> Result<()> {
    let path = layout.run_active_path();
    crate::fs_utils::remove_file_if_exists(&path)
        .with_context(|| format!("failed to clear active run file: {}", path.display()))?;
    Ok(())
}

pub fn write_run_metadata(layout: &SiteLayout, metadata: &RunMetadata) -> Result<PathBuf> {
    let path = layout.run_metadata_path(&metadata.run_id);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let body = serde_json::to_string_pretty(metadata).context("failed to encode run metadata")?;
    fs::write(&path, format!("{body}\n"))
        .with_context(|| format!("failed to write run metadata file: {}", path.display()))?;
    Ok(path)
}

pub fn read_run_metadata(layout: &SiteLayout, run_id: &str) -> Result<Option<RunMetadata>> {
    let path = layout.run_metadata_path(run_id);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read run metadata file: {}", path.display()));
        }
    };
    let metadata = serde_json::from_str(&raw)
        .with_context(|| format!("failed parsing run metadata file: {}", path.display()))?;
    Ok(Some(metadata))
}

pub fn update_run_status(layout: &SiteLayout, run_id: &str, status: &str) -> Result<()> {
    let mut metadata = read_run_metadata(layout, run_id)?
        .ok_or_else(|| anyhow!("run metadata not found for '{run_id}'"))?;
    metadata.status = status.to_string();
    write_run_metadata(layout, &metadata)?;
    Ok(())
}

pub fn append_run_journal_entry(
    layout: &SiteLayout,
    run_id: &str,
    entry: &RunJournalEntry,
) -> Result<PathBuf> {
    let path = layout.run_journal_path(run_id);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let line = serde_json::to_string(entry).context("failed to encode run journal entry")?;
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open run journal: {}", path.display()))?;
    file.write_all(format!("{line}\n").as_bytes())
        .with_context(|| format!("failed to append run journal: {}", path.display()))?;
    file.flush()
        .with_context(|| format!("failed to flush run journal: {}", path.display()))?;
    Ok(path)
}

pub fn read_run_journal(layout: &SiteLayout, run_id: &str) -> Result<Vec<RunJournalEntry>> {
    let path = layout.run_journal_path(run_id);
    let file = match fs::File::open(&path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to open run journal: {}", path.display()));
        }
    };

    let mut entries = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line =
            line.with_context(|| format!("failed to read run journal: {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let entry = serde_json::from_str(&line).with_context(|| {
            format!(
                "failed parsing run journal line {}: {}",
                index + 1,
                path.display()
            )
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

/// Every recorded run, oldest first.
pub fn list_runs(layout: &SiteLayout) -> Result<Vec<RunMetadata>> {
    let dir = layout.runs_dir();
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut runs = Vec::new();
    for entry in
        fs::read_dir(&dir).with_context(|| format!("failed to read {}", dir.display()))?
    {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let Some(run_id) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        if let Some(metadata) = read_run_metadata(layout, run_id)? {
            runs.push(metadata);
        }
    }
    runs.sort_by(|left, right| {
        left.started_at_unix
            .cmp(&right.started_at_unix)
            .then_with(|| left.run_id.cmp(&right.run_id))
    });
    Ok(runs)
}

pub fn current_unix_timestamp() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system time is before unix epoch")?
        .as_secs())
}

/// An open run: holds the active marker until `finish`.
#[derive(Debug)]
pub struct RunJournal {
    layout: SiteLayout,
    run_id: String,
    seq: u64,
}

impl RunJournal {
    pub fn begin(layout: &SiteLayout, metadata: &RunMetadata) -> Result<Self> {
        claim_active_run(layout, metadata)?;
        if let Err(err) = write_run_metadata(layout, metadata) {
            let _ = clear_active_run(layout);
            return Err(err);
        }
        tracing::debug!(run = %metadata.run_id, operation = %metadata.operation, "run started");
        Ok(Self {
            layout: layout.clone(),
            run_id: metadata.run_id.clone(),
            seq: 0,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn record(&mut self, phase: &str, state: &str, detail: Option<&str>) -> Result<()> {
        self.seq += 1;
        append_run_journal_entry(
            &self.layout,
            &self.run_id,
            &RunJournalEntry {
                seq: self.seq,
                phase: phase.to_string(),
                state: state.to_string(),
                detail: detail.map(str::to_string),
            },
        )?;
        Ok(())
    }

    pub fn finish(self, status: &str) -> Result<()> {
        update_run_status(&self.layout, &self.run_id, status)?;
        clear_active_run(&self.layout)?;
        tracing::debug!(run = %self.run_id, status, "run finished");
        Ok(())
    }
}
