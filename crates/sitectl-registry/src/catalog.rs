use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use sitectl_core::{
    full_name, AddonDescriptor, AddonTypeCatalog, Catalog, CatalogMetadata, LevelMask, Loaded,
    ReferenceCatalog, Source, Warning,
};

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    #[serde(rename = "type")]
    addon_type: String,
    name: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, alias = "source")]
    code_source: Option<String>,
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    version: Option<u64>,
    #[serde(default)]
    release: Option<String>,
    #[serde(default)]
    dependencies: BTreeMap<String, u64>,
}

/// Parses a catalog listing: `{"items": [{"<full_name>": {...}, ...}]}`.
///
/// A top-level or item-level `error` string, or a body without a listing, fails the fetch.
/// Entries that do not parse or name an unknown type are skipped with a warning.
pub fn parse_catalog_response(
    body: &str,
    branch: u32,
    levels: LevelMask,
    types: &AddonTypeCatalog,
) -> Result<Loaded<Catalog>> {
    let value: Value =
        serde_json::from_str(body).context("catalog response is not valid JSON")?;
    if let Some(error) = value.get("error").and_then(Value::as_str) {
        anyhow::bail!("catalog reported an error: {error}");
    }
    let Some(listing) = value
        .get("items")
        .and_then(Value::as_array)
        .and_then(|items| items.first())
        .and_then(Value::as_object)
    else {
        anyhow::bail!("catalog response for branch {branch} has no addon listing");
    };
    if let Some(error) = listing.get("error").and_then(Value::as_str) {
        anyhow::bail!("catalog reported an error: {error}");
    }

    let mut catalog = Catalog::new(branch);
    let mut warnings = Vec::new();
    for (key, raw) in listing {
        let entry = match CatalogEntry::deserialize(raw) {
            Ok(entry) => entry,
            Err(err) => {
                warnings.push(Warning::data(format!(
                    "skipping malformed catalog entry '{key}': {err}"
                )));
                continue;
            }
        };
        let entry_name = full_name(&entry.addon_type, &entry.name);
        if entry_name != *key {
            warnings.push(Warning::data(format!(
                "catalog entry '{key}' describes {entry_name}; using {entry_name}"
            )));
        }
        if !types.contains(&entry.addon_type) {
            warnings.push(Warning::data(format!(
                "catalog entry {entry_name} has unknown addon type '{}'",
                entry.addon_type
            )));
            continue;
        }
        if let Some(level) = entry.level.as_deref() {
            match LevelMask::parse_level(level) {
                Some(mask) if !levels.contains(mask) => continue,
                Some(_) => {}
                None => {
                    warnings.push(Warning::data(format!(
                        "catalog entry {entry_name} has unknown level '{level}'"
                    )));
                    continue;
                }
            }
        }
        catalog.insert(descriptor_from_entry(entry));
    }

    tracing::debug!(branch, addons = catalog.len(), "parsed catalog listing");
    Ok(Loaded {
        value: catalog,
        warnings,
    })
}

fn descriptor_from_entry(entry: CatalogEntry) -> AddonDescriptor {
    let mut addon = AddonDescriptor::new(entry.addon_type, entry.name);
    addon.path = entry.path.map(PathBuf::from);
    addon.metadata = CatalogMetadata {
        display_name: entry.display_name,
        description: entry.description,
        code_source: entry.code_source,
        level: entry.level,
    };
    let facts = addon.facts_mut(Source::Reference);
    facts.version = entry.version;
    facts.release = entry.release;
    facts.dependencies = entry.dependencies;
    addon
}

/// Catalog snapshots kept on disk as `<root>/<branch>.json`.
#[derive(Debug, Clone)]
pub struct FilesystemCatalog {
    root: PathBuf,
    types: AddonTypeCatalog,
}

impl FilesystemCatalog {
    pub fn new(root: impl Into<PathBuf>, types: AddonTypeCatalog) -> Self {
        Self {
            root: root.into(),
            types,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn snapshot_path(&self, branch: u32) -> PathBuf {
        self.root.join(format!("{branch}.json"))
    }
}

impl ReferenceCatalog for FilesystemCatalog {
    fn fetch(&self, levels: LevelMask, branch: u32) -> Result<Loaded<Catalog>> {
        let path = self.snapshot_path(branch);
        let body = fs::read_to_string(&path)
            .with_context(|| format!("failed to read catalog snapshot: {}", path.display()))?;
        parse_catalog_response(&body, branch, levels, &self.types)
            .with_context(|| format!("failed to parse catalog snapshot: {}", path.display()))
    }
}

/// Catalog web service queried with a JSON POST per branch.
pub struct HttpCatalog {
    endpoint: String,
    token: Option<String>,
    types: AddonTypeCatalog,
    client: reqwest::blocking::Client,
}

impl HttpCatalog {
    pub fn new(
        endpoint: impl Into<String>,
        token: Option<String>,
        types: AddonTypeCatalog,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("sitectl/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build catalog HTTP client")?;
        Ok(Self {
            endpoint: endpoint.into(),
            token,
            types,
            client,
        })
    }
}

impl ReferenceCatalog for HttpCatalog {
    fn fetch(&self, levels: LevelMask, branch: u32) -> Result<Loaded<Catalog>> {
        let body = json!({
            "data": {
                "branchnum": branch,
                "level": levels.bits(),
                "private": 1,
            }
        });
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        tracing::debug!(endpoint = %self.endpoint, branch, level = levels.bits(), "querying catalog");
        let response = request
            .send()
            .with_context(|| format!("catalog request to {} failed", self.endpoint))?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("catalog request to {} returned {status}", self.endpoint);
        }
        let text = response
            .text()
            .with_context(|| format!("failed to read catalog response from {}", self.endpoint))?;
        parse_catalog_response(&text, branch, levels, &self.types)
    }
}
