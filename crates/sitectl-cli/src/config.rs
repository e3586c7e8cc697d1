use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sitectl_core::{AddonType, AddonTypeCatalog, LevelMask};
use sitectl_installer::{BlockKind, CommandTemplate, SiteLayout};
use sitectl_upgrade::UpgradePolicy;

pub(crate) const DEFAULT_CONFIG_PATH: &str = "sitectl.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum CatalogKind {
    /// `<location>/<branch>.json` snapshots on disk.
    Filesystem,
    Http,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct SiteSection {
    pub(crate) dirroot: PathBuf,
    pub(crate) dataroot: PathBuf,
    pub(crate) maintenance_page: Option<PathBuf>,
}

impl Default for SiteSection {
    fn default() -> Self {
        Self {
            dirroot: PathBuf::from("/var/www/moodle"),
            dataroot: PathBuf::from("/var/moodledata"),
            maintenance_page: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct CatalogSection {
    pub(crate) kind: CatalogKind,
    pub(crate) location: String,
    pub(crate) levels: Vec<String>,
    pub(crate) token: Option<String>,
    /// Environment variable holding the token; wins over `token`.
    pub(crate) token_env: Option<String>,
}

impl Default for CatalogSection {
    fn default() -> Self {
        Self {
            kind: CatalogKind::Filesystem,
            location: "catalog".to_string(),
            levels: vec!["all".to_string()],
            token: None,
            token_env: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct HelperSection {
    /// Prints the installed addon ledger on stdout.
    pub(crate) ledger: CommandTemplate,
    pub(crate) migrate: CommandTemplate,
    /// `{script}` expands to the pre-upgrade script path.
    pub(crate) preupgrade: CommandTemplate,
}

impl Default for HelperSection {
    fn default() -> Self {
        Self {
            ledger: CommandTemplate::new(["php", "{dirroot}/local/sitectl/cli/ledger.php"]),
            migrate: CommandTemplate::new([
                "php",
                "{dirroot}/admin/cli/upgrade.php",
                "--non-interactive",
            ]),
            preupgrade: CommandTemplate::new(["php", "{script}"]),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct HookSection {
    pub(crate) install: CommandTemplate,
    pub(crate) uninstall: CommandTemplate,
    pub(crate) upgrade: CommandTemplate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct RunSection {
    pub(crate) block: BlockKind,
    pub(crate) journal: bool,
    /// Where `plan --queue` drops request files; the data root's request dir when unset.
    pub(crate) request_dir: Option<PathBuf>,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            block: BlockKind::Maintenance,
            journal: true,
            request_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct SiteConfig {
    pub(crate) site: SiteSection,
    pub(crate) catalog: CatalogSection,
    pub(crate) helpers: HelperSection,
    pub(crate) hooks: HookSection,
    pub(crate) run: RunSection,
    pub(crate) policy: UpgradePolicy,
    pub(crate) types: Vec<AddonType>,
}

impl SiteConfig {
    pub(crate) fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).context("failed to parse site config")?;
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read site config: {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("invalid site config: {}", path.display()))
    }

    fn validate(&self) -> Result<()> {
        if !self.site.dirroot.is_absolute() {
            bail!(
                "site.dirroot must be an absolute path: {}",
                self.site.dirroot.display()
            );
        }
        if !self.site.dataroot.is_absolute() {
            bail!(
                "site.dataroot must be an absolute path: {}",
                self.site.dataroot.display()
            );
        }
        if self.catalog.location.trim().is_empty() {
            bail!("catalog.location must not be empty");
        }
        self.level_mask()?;
        self.policy.validate()?;
        Ok(())
    }

    pub(crate) fn layout(&self) -> SiteLayout {
        SiteLayout::new(&self.site.dirroot, &self.site.dataroot)
    }

    pub(crate) fn addon_types(&self) -> Result<AddonTypeCatalog> {
        AddonTypeCatalog::builtin()
            .with_overrides(&self.types)
            .context("invalid addon type override")
    }

    pub(crate) fn level_mask(&self) -> Result<LevelMask> {
        let mut mask = LevelMask::from_bits(0);
        for level in &self.catalog.levels {
            let Some(parsed) = LevelMask::parse_level(level) else {
                bail!("unknown catalog level '{level}'");
            };
            mask = mask | parsed;
        }
        if mask.bits() == 0 {
            bail!("catalog.levels must name at least one level");
        }
        Ok(mask)
    }

    pub(crate) fn catalog_token(&self) -> Option<String> {
        self.catalog
            .token_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|token| !token.trim().is_empty())
            .or_else(|| self.catalog.token.clone())
    }

    pub(crate) fn request_dir(&self) -> PathBuf {
        self.run
            .request_dir
            .clone()
            .unwrap_or_else(|| self.layout().requests_dir())
    }
}
