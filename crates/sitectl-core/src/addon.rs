use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where a version or dependency fact about an addon came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Disk,
    Database,
    Reference,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disk => "disk",
            Self::Database => "database",
            Self::Reference => "reference",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "disk" => Some(Self::Disk),
            "database" | "db" => Some(Self::Database),
            "reference" | "catalog" => Some(Self::Reference),
            _ => None,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFacts {
    pub version: Option<u64>,
    #[serde(default)]
    pub release: Option<String>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogMetadata {
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub code_source: Option<String>,
    pub level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddonDescriptor {
    pub addon_type: String,
    pub name: String,
    pub instance_count: u64,
    pub visible: bool,
    pub path: Option<PathBuf>,
    pub metadata: CatalogMetadata,
    facts: BTreeMap<Source, SourceFacts>,
}

impl AddonDescriptor {
    pub fn new(addon_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            addon_type: addon_type.into(),
            name: name.into(),
            instance_count: 0,
            visible: true,
            path: None,
            metadata: CatalogMetadata::default(),
            facts: BTreeMap::new(),
        }
    }

    pub fn full_name(&self) -> String {
        full_name(&self.addon_type, &self.name)
    }

    pub fn facts(&self, source: Source) -> Option<&SourceFacts> {
        self.facts.get(&source)
    }

    pub fn facts_mut(&mut self, source: Source) -> &mut SourceFacts {
        self.facts.entry(source).or_default()
    }

    pub fn version(&self, source: Source) -> Option<u64> {
        self.facts(source).and_then(|facts| facts.version)
    }

    /// Dependencies declared in one source's view; empty when that source says nothing.
    pub fn dependencies(&self, source: Source) -> impl Iterator<Item = (&str, u64)> {
        self.facts(source)
            .into_iter()
            .flat_map(|facts| facts.dependencies.iter())
            .map(|(name, version)| (name.as_str(), *version))
    }

    pub fn with_version(mut self, source: Source, version: u64) -> Self {
        self.facts_mut(source).version = Some(version);
        self
    }

    pub fn with_dependency(mut self, source: Source, full_name: &str, min_version: u64) -> Self {
        self.facts_mut(source)
            .dependencies
            .insert(full_name.to_string(), min_version);
        self
    }
}

pub fn full_name(addon_type: &str, name: &str) -> String {
    format!("{addon_type}_{name}")
}

/// Splits `type_name` on the first underscore; addon names may themselves contain underscores.
pub fn split_full_name(full_name: &str) -> Option<(&str, &str)> {
    let (addon_type, name) = full_name.split_once('_')?;
    if addon_type.is_empty() || name.is_empty() {
        return None;
    }
    Some((addon_type, name))
}
