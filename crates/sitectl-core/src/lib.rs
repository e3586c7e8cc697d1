mod action;
mod addon;
mod addon_type;
mod branch;
mod inventory;
mod release;
mod sources;
mod warning;

pub use action::{Action, ActionPlan, ActionRequest, QueueOutcome};
pub use addon::{full_name, split_full_name, AddonDescriptor, CatalogMetadata, Source, SourceFacts};
pub use addon_type::{AddonType, AddonTypeCatalog};
pub use branch::{branch_name, branch_number, is_major_upgrade, repository_basename};
pub use inventory::{Catalog, Inventory};
pub use release::{check_upgrade_path, first_release_of, known_branches, known_releases, parse_release, Release};
pub use sources::{DiskInventory, InstalledLedger, LevelMask, Loaded, Presence, ReferenceCatalog};
pub use warning::{Warning, WarningKind};
