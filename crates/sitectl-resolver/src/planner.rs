use sitectl_core::{
    split_full_name, Action, ActionPlan, AddonDescriptor, AddonTypeCatalog, Catalog,
    DiskInventory, Inventory, Presence, QueueOutcome, Warning, WarningKind,
};

use crate::satisfy::{DependencyView, Resolver};

/// A plan plus everything the planner decided to leave out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Planned {
    pub plan: ActionPlan,
    pub warnings: Vec<Warning>,
    /// Addons that qualified for an action but were held back by unmet dependencies.
    pub held_back: Vec<String>,
}

impl Planned {
    /// Appends `other`, keeping group disjointness; conflicts become warnings.
    pub fn absorb(&mut self, other: Planned) {
        for (request, existing) in self.plan.merge(&other.plan) {
            self.warnings.push(Warning::new(
                WarningKind::PlanningAmbiguity,
                format!(
                    "{} already queued for {existing}; dropped {} request",
                    request.full_name, request.action
                ),
            ));
        }
        self.warnings.extend(other.warnings);
        self.held_back.extend(other.held_back);
    }

    fn queue(&mut self, action: Action, full_name: &str) {
        match self.plan.queue(action, full_name) {
            QueueOutcome::Queued => {
                tracing::debug!(action = action.as_str(), addon = full_name, "queued addon action");
            }
            QueueOutcome::AlreadyQueued => {}
            QueueOutcome::Conflicting(existing) => {
                self.warnings.push(Warning::new(
                    WarningKind::PlanningAmbiguity,
                    format!("{full_name} already queued for {existing}; dropped {action} request"),
                ));
            }
        }
    }
}

/// Builds addon action plans against one catalog snapshot.
///
/// `ledger` is the full installed inventory used for dependency checks; each planning call
/// takes the (possibly narrower) set of installed addons to consider.
pub struct Planner<'a> {
    types: &'a AddonTypeCatalog,
    disk: &'a dyn DiskInventory,
    ledger: &'a Inventory,
    catalog: &'a Catalog,
}

impl<'a> Planner<'a> {
    pub fn new(
        types: &'a AddonTypeCatalog,
        disk: &'a dyn DiskInventory,
        ledger: &'a Inventory,
        catalog: &'a Catalog,
    ) -> Self {
        Self {
            types,
            disk,
            ledger,
            catalog,
        }
    }

    pub fn branch(&self) -> u32 {
        self.catalog.branch
    }

    pub fn resolver(&self) -> Resolver<'a> {
        Resolver::new(self.ledger, self.catalog)
    }

    /// Installed addons whose code is gone from disk and that the catalog can restore.
    ///
    /// Single pass: an addon queued here does not unlock its dependents in the same call.
    pub fn plan_missing(&self, installed: &Inventory) -> Planned {
        let mut planned = Planned::default();
        let resolver = self.resolver();
        for addon in self.known_addons(installed, &mut planned) {
            let full_name = addon.full_name();
            if !self.catalog.contains(&full_name) {
                continue;
            }
            if self.presence(addon).is_installed() {
                continue;
            }
            let satisfaction = resolver.check(&full_name, DependencyView::Reference);
            planned.warnings.extend(satisfaction.warnings);
            if satisfaction.satisfied {
                planned.queue(Action::Add, &full_name);
            } else {
                planned.held_back.push(full_name);
            }
        }
        planned
    }

    /// Every installed addon with a catalog release. Updates are not dependency gated.
    pub fn plan_updates(&self, installed: &Inventory) -> Planned {
        let mut planned = Planned::default();
        for addon in self.known_addons(installed, &mut planned) {
            let full_name = addon.full_name();
            if self.catalog.contains(&full_name) {
                planned.queue(Action::Update, &full_name);
            }
        }
        planned
    }

    /// Installed non-core addons with no catalog release for this branch.
    pub fn plan_removals(&self, installed: &Inventory) -> Planned {
        let mut planned = Planned::default();
        for addon in self.known_addons(installed, &mut planned) {
            let full_name = addon.full_name();
            if self.catalog.contains(&full_name) {
                continue;
            }
            if self.presence(addon) == Presence::Missing {
                planned.warnings.push(Warning::new(
                    WarningKind::PlanningAmbiguity,
                    format!("{full_name} is neither on disk nor in the catalog; left alone"),
                ));
                continue;
            }
            if self.has_vcs_marker(addon) {
                planned.queue(Action::Remove, &full_name);
            }
        }
        planned
    }

    /// Catalogued installed addons whose on-disk dependency declarations can no longer be met.
    ///
    /// Addons the catalog does not list are never pruned here; their code did not come from it.
    pub fn plan_unsatisfied_removals(&self, installed: &Inventory) -> Planned {
        let mut planned = Planned::default();
        let resolver = self.resolver();
        for addon in self.known_addons(installed, &mut planned) {
            let full_name = addon.full_name();
            if !self.catalog.contains(&full_name) {
                continue;
            }
            let satisfaction = resolver.check(&full_name, DependencyView::Disk);
            planned.warnings.extend(satisfaction.warnings);
            if !satisfaction.satisfied {
                planned.queue(Action::Remove, &full_name);
            }
        }
        planned
    }

    /// Required addons missing from the ledger, added without a dependency gate.
    pub fn plan_required(&self, required: &[String]) -> Planned {
        let mut planned = Planned::default();
        for full_name in required {
            let Some((addon_type, _)) = split_full_name(full_name) else {
                planned
                    .warnings
                    .push(Warning::data(format!("malformed required addon '{full_name}'")));
                continue;
            };
            if !self.types.contains(addon_type) {
                planned.warnings.push(Warning::data(format!(
                    "required addon {full_name} has unknown type '{addon_type}'"
                )));
                continue;
            }
            if !self.ledger.contains_full(full_name) {
                planned.queue(Action::Add, full_name);
            }
        }
        planned
    }

    /// Removal of uncatalogued non-core addons, then updates for everything catalogued.
    pub fn plan_branch_upgrade(&self, installed: &Inventory) -> Planned {
        let mut planned = self.plan_removals(installed);
        planned.absorb(self.plan_updates(installed));
        planned
    }

    /// Installed addons with no release for this branch, in inventory order.
    pub fn report_unavailable(&self, installed: &Inventory) -> Vec<String> {
        installed
            .iter()
            .map(AddonDescriptor::full_name)
            .filter(|full_name| !self.catalog.contains(full_name))
            .collect()
    }

    fn known_addons<'i>(
        &self,
        installed: &'i Inventory,
        planned: &mut Planned,
    ) -> Vec<&'i AddonDescriptor> {
        let mut known = Vec::new();
        for addon in installed.iter() {
            if self.types.contains(&addon.addon_type) {
                known.push(addon);
            } else {
                planned.warnings.push(Warning::data(format!(
                    "unknown addon type '{}'; skipping {}",
                    addon.addon_type,
                    addon.full_name()
                )));
            }
        }
        known
    }

    fn presence(&self, addon: &AddonDescriptor) -> Presence {
        match self.types.get(&addon.addon_type) {
            Some(addon_type) => self.disk.presence(addon_type, &addon.name),
            None => Presence::Missing,
        }
    }

    fn has_vcs_marker(&self, addon: &AddonDescriptor) -> bool {
        self.types
            .get(&addon.addon_type)
            .is_some_and(|addon_type| self.disk.has_vcs_marker(addon_type, &addon.name))
    }
}
