use anyhow::Result;
use sitectl_core::{AddonTypeCatalog, InstalledLedger, Inventory, Warning};

/// Installed inventory loaded at most once until explicitly invalidated.
pub struct InventoryCache<'a> {
    ledger: &'a dyn InstalledLedger,
    types: &'a AddonTypeCatalog,
    cached: Option<Inventory>,
}

impl<'a> InventoryCache<'a> {
    pub fn new(ledger: &'a dyn InstalledLedger, types: &'a AddonTypeCatalog) -> Self {
        Self {
            ledger,
            types,
            cached: None,
        }
    }

    /// Load warnings are appended to `warnings` only when the ledger is actually read.
    pub fn load(&mut self, warnings: &mut Vec<Warning>) -> Result<&Inventory> {
        if self.cached.is_none() {
            let loaded = self.ledger.load(self.types)?;
            warnings.extend(loaded.warnings);
            tracing::debug!(
                addons = loaded.value.len(),
                types = loaded.value.types().count(),
                "installed inventory loaded"
            );
            self.cached = Some(loaded.value);
        }
        Ok(self.cached.get_or_insert_with(Inventory::new))
    }

    pub fn invalidate(&mut self) {
        self.cached = None;
    }
}
