//! Line-by-line reading of the database upgrade helper's output.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationEvent {
    /// `-->name`: the helper moved on to another component.
    Stage(String),
    Success,
    DefectiveAddon(String),
    Downgrade {
        addon: String,
        database_version: u64,
        code_version: u64,
    },
    Status(String),
    Other(String),
}

impl MigrationEvent {
    pub fn is_problem(&self) -> bool {
        matches!(self, Self::DefectiveAddon(_) | Self::Downgrade { .. })
    }
}

pub fn scan_migration_line(line: &str) -> MigrationEvent {
    let line = line.trim();

    if let Some(stage) = line.strip_prefix("-->") {
        let stage = stage.trim().to_lowercase();
        if stage == "system" {
            return MigrationEvent::Stage("core tables".to_string());
        }
        return MigrationEvent::Stage(stage);
    }
    if line.contains("++ Success ++") || line.contains("... done!") {
        return MigrationEvent::Success;
    }
    if let Some(addon) = between(line, "Plugin ", " is defective") {
        return MigrationEvent::DefectiveAddon(addon.to_string());
    }
    if let Some(event) = parse_downgrade(line) {
        return event;
    }
    if let Some(status) = line.split_once(">>> ").map(|(_, rest)| rest) {
        let status = status
            .split(|ch: char| !(ch.is_alphanumeric() || ch == '_' || ch == ' '))
            .next()
            .unwrap_or_default()
            .trim();
        if !status.is_empty() {
            return MigrationEvent::Status(status.to_string());
        }
    }
    MigrationEvent::Other(line.to_string())
}

fn between<'a>(line: &'a str, prefix: &str, suffix: &str) -> Option<&'a str> {
    let start = line.find(prefix)? + prefix.len();
    let rest = &line[start..];
    let end = rest.find(suffix)?;
    Some(&rest[..end]).filter(|value| !value.is_empty())
}

// "Cannot downgrade <addon> from <db> to <code>."
fn parse_downgrade(line: &str) -> Option<MigrationEvent> {
    let rest = &line[line.find("Cannot downgrade ")? + "Cannot downgrade ".len()..];
    let (addon, versions) = rest.split_once(" from ")?;
    let (database_version, code_version) = versions.split_once(" to ")?;
    Some(MigrationEvent::Downgrade {
        addon: addon.to_string(),
        database_version: database_version.trim().parse().ok()?,
        code_version: code_version.trim().trim_end_matches('.').parse().ok()?,
    })
}
