use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

const BUILTIN_TYPES: &[(&str, &str, &str, &str)] = &[
    ("auth", "Authentication plugins", "auth", "version.php"),
    ("block", "Blocks", "blocks", "version.php"),
    ("editor", "Text editors", "lib/editor", "version.php"),
    ("enrol", "Enrolment plugins", "enrol", "version.php"),
    ("filter", "Filters", "filter", "version.php"),
    ("format", "Course formats", "course/format", "version.php"),
    ("local", "Local plugins", "local", "version.php"),
    ("mod", "Activity modules", "mod", "version.php"),
    ("qtype", "Question types", "question/type", "version.php"),
    ("report", "Reports", "report", "version.php"),
    ("repository", "Repositories", "repository", "version.php"),
    ("theme", "Themes", "theme", "config.php"),
    ("tool", "Admin tools", "admin/tool", "version.php"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonType {
    pub key: String,
    pub display_name: String,
    pub storage_path: String,
    #[serde(default = "default_file_marker")]
    pub file_marker: String,
}

impl AddonType {
    /// Directory that holds every addon of this type under `install_root`.
    pub fn root(&self, install_root: &Path) -> PathBuf {
        install_root.join(&self.storage_path)
    }

    pub fn addon_path(&self, install_root: &Path, name: &str) -> PathBuf {
        self.root(install_root).join(name)
    }

    /// Marker file expected inside an addon directory; `{name}` expands to the addon name.
    pub fn marker_for(&self, name: &str) -> String {
        self.file_marker.replace("{name}", name)
    }
}

fn default_file_marker() -> String {
    "version.php".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddonTypeCatalog {
    types: BTreeMap<String, AddonType>,
}

#[derive(Debug, Deserialize)]
struct AddonTypeFile {
    #[serde(default)]
    types: Vec<AddonType>,
}

impl AddonTypeCatalog {
    pub fn builtin() -> Self {
        let types = BUILTIN_TYPES
            .iter()
            .map(|(key, display_name, storage_path, file_marker)| {
                (
                    key.to_string(),
                    AddonType {
                        key: key.to_string(),
                        display_name: display_name.to_string(),
                        storage_path: storage_path.to_string(),
                        file_marker: file_marker.to_string(),
                    },
                )
            })
            .collect();
        Self { types }
    }

    pub fn from_types(types: impl IntoIterator<Item = AddonType>) -> anyhow::Result<Self> {
        let mut catalog = BTreeMap::new();
        for addon_type in types {
            validate_type(&addon_type)?;
            let key = addon_type.key.clone();
            if catalog.insert(key.clone(), addon_type).is_some() {
                return Err(anyhow!("duplicate addon type '{key}'"));
            }
        }
        Ok(Self { types: catalog })
    }

    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        let file: AddonTypeFile =
            toml::from_str(input).context("failed to parse addon type definitions")?;
        Self::from_types(file.types)
    }

    /// Replaces or adds the given definitions on top of this catalog.
    pub fn with_overrides(mut self, overrides: &[AddonType]) -> anyhow::Result<Self> {
        for addon_type in overrides {
            validate_type(addon_type)?;
            self.types
                .insert(addon_type.key.clone(), addon_type.clone());
        }
        Ok(self)
    }

    pub fn get(&self, key: &str) -> Option<&AddonType> {
        self.types.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.types.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AddonType> {
        self.types.values()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

fn validate_type(addon_type: &AddonType) -> anyhow::Result<()> {
    let key = addon_type.key.trim();
    if key.is_empty() {
        return Err(anyhow!("addon type key must not be empty"));
    }
    // Full names are split on the first underscore, so keys cannot contain one.
    if key.contains('_') || !key.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()) {
        return Err(anyhow!(
            "addon type key '{key}' must be lowercase ASCII letters or digits"
        ));
    }
    let storage = Path::new(&addon_type.storage_path);
    if addon_type.storage_path.trim().is_empty() || storage.is_absolute() {
        return Err(anyhow!(
            "addon type '{key}' storage path must be a non-empty relative path"
        ));
    }
    if storage
        .components()
        .any(|component| matches!(component, std::path::Component::ParentDir))
    {
        return Err(anyhow!(
            "addon type '{key}' storage path must not leave the install root"
        ));
    }
    if addon_type.file_marker.trim().is_empty() {
        return Err(anyhow!("addon type '{key}' file marker must not be empty"));
    }
    Ok(())
}
