//! Installed-addon ledger as printed by the site's listing helper.
//!
//! One addon per line, tab separated:
//!
//! ```text
//! type  name  instances  visible  disk_version  db_version  release  dependencies
//! ```
//!
//! Trailing columns may be omitted. `dependencies` is a comma separated list of
//! `full_name:min_version` pairs. Blank lines and lines starting with `#` are ignored.

use anyhow::{Context, Result};
use sitectl_core::{
    AddonDescriptor, AddonTypeCatalog, InstalledLedger, Inventory, Loaded, Source, Warning,
};

pub fn parse_ledger(input: &str, types: &AddonTypeCatalog) -> Loaded<Inventory> {
    let mut inventory = Inventory::new();
    for key in types.keys() {
        inventory.ensure_type(key);
    }
    let mut warnings = Vec::new();

    for (index, raw_line) in input.lines().enumerate() {
        let line_no = index + 1;
        let line = raw_line.trim_end_matches('\r');
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }

        let fields = line.split('\t').map(str::trim).collect::<Vec<_>>();
        let addon_type = fields.first().copied().unwrap_or_default();
        let name = fields.get(1).copied().unwrap_or_default();
        if addon_type.is_empty() || name.is_empty() {
            warnings.push(Warning::data(format!(
                "ledger line {line_no}: expected at least a type and a name"
            )));
            continue;
        }
        if !types.contains(addon_type) {
            warnings.push(Warning::data(format!(
                "ledger line {line_no}: unknown addon type '{addon_type}'; skipping {addon_type}_{name}"
            )));
            continue;
        }

        let mut addon = AddonDescriptor::new(addon_type, name);
        let full_name = addon.full_name();

        if let Some(instances) = column(&fields, 2) {
            match instances.parse::<u64>() {
                Ok(count) => addon.instance_count = count,
                Err(_) => warnings.push(Warning::data(format!(
                    "ledger line {line_no}: invalid instance count '{instances}' for {full_name}"
                ))),
            }
        }
        if let Some(visible) = column(&fields, 3) {
            addon.visible = !matches!(visible, "0" | "false" | "no");
        }
        addon.facts_mut(Source::Disk).version =
            parse_version(column(&fields, 4), &full_name, line_no, &mut warnings);
        addon.facts_mut(Source::Database).version =
            parse_version(column(&fields, 5), &full_name, line_no, &mut warnings);
        addon.facts_mut(Source::Disk).release = column(&fields, 6).map(str::to_string);

        if let Some(dependencies) = column(&fields, 7) {
            for entry in dependencies.split(',').map(str::trim) {
                if entry.is_empty() {
                    continue;
                }
                let parsed = entry
                    .rsplit_once(':')
                    .and_then(|(dependency, version)| {
                        Some((dependency.trim(), version.trim().parse::<u64>().ok()?))
                    })
                    .filter(|(dependency, _)| !dependency.is_empty());
                match parsed {
                    Some((dependency, min_version)) => {
                        addon
                            .facts_mut(Source::Disk)
                            .dependencies
                            .insert(dependency.to_string(), min_version);
                    }
                    None => warnings.push(Warning::data(format!(
                        "ledger line {line_no}: malformed dependency '{entry}' for {full_name}"
                    ))),
                }
            }
        }

        if inventory.insert(addon).is_some() {
            warnings.push(Warning::data(format!(
                "ledger line {line_no}: {full_name} listed twice; keeping the later entry"
            )));
        }
    }

    Loaded {
        value: inventory,
        warnings,
    }
}

/// Empty cells and `-` both mean "not recorded".
fn column<'a>(fields: &[&'a str], index: usize) -> Option<&'a str> {
    fields
        .get(index)
        .copied()
        .filter(|value| !value.is_empty() && *value != "-")
}

fn parse_version(
    value: Option<&str>,
    full_name: &str,
    line_no: usize,
    warnings: &mut Vec<Warning>,
) -> Option<u64> {
    let value = value?;
    match value.parse::<u64>() {
        Ok(0) => None,
        Ok(version) => Some(version),
        Err(_) => {
            warnings.push(Warning::data(format!(
                "ledger line {line_no}: invalid version '{value}' for {full_name}"
            )));
            None
        }
    }
}

/// Ledger backed by a callback that produces the helper's raw listing.
pub struct HelperLedger<F> {
    fetch: F,
}

impl<F> HelperLedger<F>
where
    F: Fn() -> Result<String>,
{
    pub fn new(fetch: F) -> Self {
        Self { fetch }
    }
}

impl<F> InstalledLedger for HelperLedger<F>
where
    F: Fn() -> Result<String>,
{
    fn load(&self, types: &AddonTypeCatalog) -> Result<Loaded<Inventory>> {
        let raw = (self.fetch)().context("failed to read installed addon ledger")?;
        let loaded = parse_ledger(&raw, types);
        tracing::debug!(
            addons = loaded.value.len(),
            warnings = loaded.warnings.len(),
            "loaded installed addon ledger"
        );
        Ok(loaded)
    }
}
