use std::collections::BTreeSet;
use std::ops::BitOr;

use anyhow::Result;

use crate::addon_type::{AddonType, AddonTypeCatalog};
use crate::inventory::{Catalog, Inventory};
use crate::warning::Warning;

/// State of an addon's directory on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Installed,
    Missing,
    /// A symbolic link standing in for real code.
    Placeholder,
    /// Directory exists but the type's marker file does not.
    Incomplete,
}

impl Presence {
    pub fn is_installed(self) -> bool {
        self == Self::Installed
    }
}

/// Result of a load that may have skipped malformed units along the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loaded<T> {
    pub value: T,
    pub warnings: Vec<Warning>,
}

impl<T> Loaded<T> {
    pub fn clean(value: T) -> Self {
        Self {
            value,
            warnings: Vec::new(),
        }
    }
}

pub trait DiskInventory {
    /// Names under the type's storage path that carry a valid marker file.
    fn list_instances(&self, addon_type: &AddonType) -> Result<BTreeSet<String>>;

    fn presence(&self, addon_type: &AddonType, name: &str) -> Presence;

    /// Non-core addons carry their own version-control metadata.
    fn has_vcs_marker(&self, addon_type: &AddonType, name: &str) -> bool;
}

pub trait InstalledLedger {
    fn load(&self, types: &AddonTypeCatalog) -> Result<Loaded<Inventory>>;
}

/// Bit set of catalog support levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LevelMask(u8);

impl LevelMask {
    pub const CORE: Self = Self(1);
    pub const PLUS: Self = Self(2);
    pub const THIRD_PARTY: Self = Self(4);
    pub const ALL: Self = Self(1 | 2 | 4);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn parse_level(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "core" | "gao" => Some(Self::CORE),
            "plus" => Some(Self::PLUS),
            "third" | "third-party" => Some(Self::THIRD_PARTY),
            "all" => Some(Self::ALL),
            _ => None,
        }
    }
}

impl BitOr for LevelMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

pub trait ReferenceCatalog {
    fn fetch(&self, levels: LevelMask, branch: u32) -> Result<Loaded<Catalog>>;
}
