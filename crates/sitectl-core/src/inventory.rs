use std::collections::BTreeMap;

use crate::addon::{split_full_name, AddonDescriptor};

/// Addons known to one source, keyed by type then name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    entries: BTreeMap<String, BTreeMap<String, AddonDescriptor>>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes sure `addon_type` is listed even when it has no addons.
    pub fn ensure_type(&mut self, addon_type: &str) {
        self.entries.entry(addon_type.to_string()).or_default();
    }

    /// Inserts or replaces the descriptor for its `(type, name)` slot.
    pub fn insert(&mut self, descriptor: AddonDescriptor) -> Option<AddonDescriptor> {
        self.entries
            .entry(descriptor.addon_type.clone())
            .or_default()
            .insert(descriptor.name.clone(), descriptor)
    }

    pub fn remove(&mut self, addon_type: &str, name: &str) -> Option<AddonDescriptor> {
        self.entries
            .get_mut(addon_type)
            .and_then(|addons| addons.remove(name))
    }

    pub fn get(&self, addon_type: &str, name: &str) -> Option<&AddonDescriptor> {
        self.entries
            .get(addon_type)
            .and_then(|addons| addons.get(name))
    }

    pub fn get_full(&self, full_name: &str) -> Option<&AddonDescriptor> {
        let (addon_type, name) = split_full_name(full_name)?;
        self.get(addon_type, name)
    }

    pub fn contains(&self, addon_type: &str, name: &str) -> bool {
        self.get(addon_type, name).is_some()
    }

    pub fn contains_full(&self, full_name: &str) -> bool {
        split_full_name(full_name).is_some_and(|(addon_type, name)| self.contains(addon_type, name))
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Type order, then name order.
    pub fn iter(&self) -> impl Iterator<Item = &AddonDescriptor> {
        self.entries.values().flat_map(|addons| addons.values())
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The reference catalog's answer for one branch, keyed by full name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    pub branch: u32,
    addons: BTreeMap<String, AddonDescriptor>,
}

impl Catalog {
    pub fn new(branch: u32) -> Self {
        Self {
            branch,
            addons: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, descriptor: AddonDescriptor) {
        self.addons.insert(descriptor.full_name(), descriptor);
    }

    pub fn get(&self, full_name: &str) -> Option<&AddonDescriptor> {
        self.addons.get(full_name)
    }

    pub fn contains(&self, full_name: &str) -> bool {
        self.addons.contains_key(full_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AddonDescriptor)> {
        self.addons
            .iter()
            .map(|(full_name, descriptor)| (full_name.as_str(), descriptor))
    }

    pub fn len(&self) -> usize {
        self.addons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addons.is_empty()
    }
}

impl FromIterator<AddonDescriptor> for Catalog {
    fn from_iter<T: IntoIterator<Item = AddonDescriptor>>(iter: T) -> Self {
        let mut catalog = Self::default();
        for descriptor in iter {
            catalog.insert(descriptor);
        }
        catalog
    }
}
