use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use sitectl_core::{
    Action, AddonDescriptor, AddonType, AddonTypeCatalog, Catalog, DiskInventory, Inventory,
    Presence, Source, WarningKind,
};

use super::*;

#[derive(Default)]
struct FakeDisk {
    presence: BTreeMap<String, Presence>,
    vcs: BTreeSet<String>,
}

impl FakeDisk {
    fn with_presence(mut self, full_name: &str, presence: Presence) -> Self {
        self.presence.insert(full_name.to_string(), presence);
        self
    }

    fn with_vcs(mut self, full_name: &str) -> Self {
        self.vcs.insert(full_name.to_string());
        self
    }
}

impl DiskInventory for FakeDisk {
    fn list_instances(&self, addon_type: &AddonType) -> Result<BTreeSet<String>> {
        let prefix = format!("{}_", addon_type.key);
        Ok(self
            .presence
            .iter()
            .filter(|(_, presence)| presence.is_installed())
            .filter_map(|(name, _)| name.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    fn presence(&self, addon_type: &AddonType, name: &str) -> Presence {
        self.presence
            .get(&format!("{}_{name}", addon_type.key))
            .copied()
            .unwrap_or(Presence::Installed)
    }

    fn has_vcs_marker(&self, addon_type: &AddonType, name: &str) -> bool {
        self.vcs.contains(&format!("{}_{name}", addon_type.key))
    }
}

fn installed(addon_type: &str, name: &str, disk_version: Option<u64>) -> AddonDescriptor {
    let addon = AddonDescriptor::new(addon_type, name);
    match disk_version {
        Some(version) => addon.with_version(Source::Disk, version),
        None => addon,
    }
}

fn listed(addon_type: &str, name: &str, version: u64) -> AddonDescriptor {
    AddonDescriptor::new(addon_type, name).with_version(Source::Reference, version)
}

fn inventory(addons: impl IntoIterator<Item = AddonDescriptor>) -> Inventory {
    let mut inventory = Inventory::new();
    for addon in addons {
        inventory.insert(addon);
    }
    inventory
}

fn catalog(addons: impl IntoIterator<Item = AddonDescriptor>) -> Catalog {
    let mut catalog = Catalog::new(27);
    for addon in addons {
        catalog.insert(addon);
    }
    catalog
}

#[test]
fn cyclic_reference_dependencies_terminate_and_count_as_met() {
    let ledger = inventory([installed("block", "a", None), installed("local", "b", None)]);
    let catalog = catalog([
        listed("block", "a", 1).with_dependency(Source::Reference, "local_b", 1),
        listed("local", "b", 1).with_dependency(Source::Reference, "block_a", 1),
    ]);

    let result = Resolver::new(&ledger, &catalog).check("block_a", DependencyView::Reference);

    assert!(result.satisfied);
    assert_eq!(result.warnings.len(), 1);
    assert_eq!(result.warnings[0].kind, WarningKind::DependencyLoop);
    assert!(result.warnings[0].message.contains("local_b"));
}

#[test]
fn self_dependency_is_caught_by_the_path_check() {
    let ledger = inventory([installed("block", "a", None)]);
    let catalog = catalog([listed("block", "a", 1).with_dependency(Source::Reference, "block_a", 1)]);

    let result = Resolver::new(&ledger, &catalog).check("block_a", DependencyView::Reference);

    assert!(result.satisfied);
    assert_eq!(result.warnings.len(), 1);
    assert_eq!(result.warnings[0].kind, WarningKind::DependencyLoop);
}

#[test]
fn uninstalled_dependency_fails_without_descending_into_it() {
    let ledger = inventory([installed("block", "a", Some(3))]);
    // local_b depends on itself: descending into it would record a loop warning.
    let catalog = catalog([
        listed("block", "a", 3).with_dependency(Source::Reference, "local_b", 1),
        listed("local", "b", 1).with_dependency(Source::Reference, "local_b", 1),
    ]);

    let result = Resolver::new(&ledger, &catalog).check("block_a", DependencyView::Reference);

    assert!(!result.satisfied);
    assert!(result.warnings.is_empty());
}

#[test]
fn disk_view_compares_installed_version_with_minimum() {
    let catalog = Catalog::new(27);
    let requirer = installed("block", "a", Some(1)).with_dependency(Source::Disk, "local_b", 5);

    let at_five = inventory([requirer.clone(), installed("local", "b", Some(5))]);
    assert!(
        Resolver::new(&at_five, &catalog)
            .check("block_a", DependencyView::Disk)
            .satisfied
    );

    let at_four = inventory([requirer, installed("local", "b", Some(4))]);
    assert!(
        !Resolver::new(&at_four, &catalog)
            .check("block_a", DependencyView::Disk)
            .satisfied
    );
}

#[test]
fn addon_without_dependencies_is_trivially_satisfiable() {
    let ledger = Inventory::new();
    let catalog = Catalog::new(27);
    let resolver = Resolver::new(&ledger, &catalog);

    assert!(resolver.check("block_unknown", DependencyView::Disk).satisfied);
    assert!(resolver.check("block_unknown", DependencyView::Reference).satisfied);
}

#[test]
fn off_disk_dependency_needs_a_sufficient_catalog_release() {
    let ledger = inventory([installed("block", "a", None), installed("local", "b", None)]);
    let catalog = catalog([
        listed("block", "a", 1).with_dependency(Source::Reference, "local_b", 5),
        listed("local", "b", 3),
    ]);

    assert!(
        !Resolver::new(&ledger, &catalog)
            .check("block_a", DependencyView::Reference)
            .satisfied
    );
}

#[test]
fn sibling_dependencies_do_not_share_a_path() {
    let ledger = inventory([
        installed("block", "a", None),
        installed("local", "b", None),
        installed("local", "c", None),
        installed("local", "d", None),
    ]);
    let catalog = catalog([
        listed("block", "a", 1)
            .with_dependency(Source::Reference, "local_b", 1)
            .with_dependency(Source::Reference, "local_c", 1),
        listed("local", "b", 1).with_dependency(Source::Reference, "local_d", 1),
        listed("local", "c", 1).with_dependency(Source::Reference, "local_d", 1),
        listed("local", "d", 1),
    ]);

    let result = Resolver::new(&ledger, &catalog).check("block_a", DependencyView::Reference);

    assert!(result.satisfied);
    assert!(result.warnings.is_empty());
}

#[test]
fn malformed_dependency_name_fails_with_data_warning() {
    let ledger = inventory([installed("block", "a", Some(1)).with_dependency(Source::Disk, "nounderscore", 1)]);
    let catalog = Catalog::new(27);

    let result = Resolver::new(&ledger, &catalog).check("block_a", DependencyView::Disk);

    assert!(!result.satisfied);
    assert_eq!(result.warnings[0].kind, WarningKind::DataInconsistency);
}

#[test]
fn plan_missing_holds_back_addon_with_unobtainable_dependency() {
    let types = AddonTypeCatalog::builtin();
    let disk = FakeDisk::default().with_presence("block_foo", Presence::Missing);
    let ledger = inventory([installed("block", "foo", Some(2))]);
    let catalog = catalog([listed("block", "foo", 2).with_dependency(Source::Reference, "local_bar", 10)]);

    let planned = Planner::new(&types, &disk, &ledger, &catalog).plan_missing(&ledger);

    assert!(planned.plan.is_empty());
    assert_eq!(planned.held_back, vec!["block_foo"]);
}

#[test]
fn plan_missing_adds_restorable_addons_only() {
    let types = AddonTypeCatalog::builtin();
    let disk = FakeDisk::default()
        .with_presence("block_gone", Presence::Missing)
        .with_presence("block_linked", Presence::Placeholder)
        .with_presence("block_partial", Presence::Incomplete)
        .with_presence("block_uncatalogued", Presence::Missing);
    let ledger = inventory([
        installed("block", "gone", Some(1)),
        installed("block", "linked", Some(1)),
        installed("block", "partial", Some(1)),
        installed("block", "present", Some(1)),
        installed("block", "uncatalogued", Some(1)),
        installed("local", "lib", Some(4)),
    ]);
    let catalog = catalog([
        listed("block", "gone", 2).with_dependency(Source::Reference, "local_lib", 4),
        listed("block", "linked", 2),
        listed("block", "partial", 2),
        listed("block", "present", 2),
        listed("local", "lib", 4),
    ]);

    let planned = Planner::new(&types, &disk, &ledger, &catalog).plan_missing(&ledger);

    assert_eq!(
        planned.plan.group(Action::Add),
        ["block_gone", "block_linked", "block_partial"]
    );
    assert!(planned.held_back.is_empty());
}

#[test]
fn plan_missing_is_single_pass() {
    let types = AddonTypeCatalog::builtin();
    let disk = FakeDisk::default()
        .with_presence("block_child", Presence::Missing)
        .with_presence("local_parent", Presence::Missing);
    // local_parent is restorable in this pass but block_child needs it installed already.
    let ledger = inventory([installed("block", "child", Some(1)), installed("local", "parent", Some(1))]);
    let catalog = catalog([
        listed("block", "child", 1).with_dependency(Source::Reference, "local_parent", 3),
        listed("local", "parent", 3),
    ]);

    let planned = Planner::new(&types, &disk, &ledger, &catalog).plan_missing(&ledger);

    assert_eq!(planned.plan.group(Action::Add), ["local_parent"]);
    assert_eq!(planned.held_back, vec!["block_child"]);
}

#[test]
fn plan_missing_and_plan_removals_never_overlap() {
    let types = AddonTypeCatalog::builtin();
    let disk = FakeDisk::default()
        .with_presence("block_gone", Presence::Missing)
        .with_vcs("block_gone")
        .with_vcs("block_custom")
        .with_vcs("mod_catalogued");
    let ledger = inventory([
        installed("block", "gone", Some(1)),
        installed("block", "custom", Some(1)),
        installed("mod", "catalogued", Some(1)),
        installed("mod", "core", Some(1)),
    ]);
    let catalog = catalog([listed("block", "gone", 1), listed("mod", "catalogued", 1)]);
    let planner = Planner::new(&types, &disk, &ledger, &catalog);

    let mut planned = planner.plan_missing(&ledger);
    planned.absorb(planner.plan_removals(&ledger));

    let adds = planned.plan.group(Action::Add);
    let removes = planned.plan.group(Action::Remove);
    assert_eq!(adds, ["block_gone"]);
    assert_eq!(removes, ["block_custom"]);
    assert!(adds.iter().all(|name| !removes.contains(name)));
    assert!(planned
        .warnings
        .iter()
        .all(|warning| warning.kind != WarningKind::PlanningAmbiguity));
}

#[test]
fn plan_removals_leaves_addons_missing_everywhere_alone() {
    let types = AddonTypeCatalog::builtin();
    let disk = FakeDisk::default()
        .with_presence("local_ghost", Presence::Missing)
        .with_vcs("local_ghost");
    let ledger = inventory([installed("local", "ghost", Some(1))]);
    let catalog = Catalog::new(28);

    let planned = Planner::new(&types, &disk, &ledger, &catalog).plan_removals(&ledger);

    assert!(planned.plan.is_empty());
    assert_eq!(planned.warnings.len(), 1);
    assert_eq!(planned.warnings[0].kind, WarningKind::PlanningAmbiguity);
}

#[test]
fn plan_updates_ignores_dependency_state() {
    let types = AddonTypeCatalog::builtin();
    let disk = FakeDisk::default();
    let ledger = inventory([installed("block", "a", Some(1)), installed("block", "b", Some(1))]);
    let catalog = catalog([listed("block", "a", 2).with_dependency(Source::Reference, "local_missing", 9)]);

    let planned = Planner::new(&types, &disk, &ledger, &catalog).plan_updates(&ledger);

    assert_eq!(planned.plan.group(Action::Update), ["block_a"]);
}

#[test]
fn plan_unsatisfied_removals_prunes_broken_addons() {
    let types = AddonTypeCatalog::builtin();
    let disk = FakeDisk::default();
    let ledger = inventory([
        installed("block", "c", Some(1)).with_dependency(Source::Disk, "local_d", 3),
        installed("local", "d", Some(2)),
        installed("mod", "fine", Some(1)).with_dependency(Source::Disk, "local_d", 2),
    ]);
    let catalog = catalog([listed("block", "c", 1), listed("local", "d", 2), listed("mod", "fine", 1)]);

    let planned =
        Planner::new(&types, &disk, &ledger, &catalog).plan_unsatisfied_removals(&ledger);

    assert_eq!(planned.plan.group(Action::Remove), ["block_c"]);
}

#[test]
fn plan_unsatisfied_removals_leaves_uncatalogued_code_alone() {
    let types = AddonTypeCatalog::builtin();
    let disk = FakeDisk::default();
    let ledger = inventory([
        installed("mod", "core", Some(5)).with_dependency(Source::Disk, "local_gone", 3),
        installed("block", "listed", Some(1)).with_dependency(Source::Disk, "local_gone", 3),
    ]);
    let catalog = catalog([listed("block", "listed", 1)]);

    let planned =
        Planner::new(&types, &disk, &ledger, &catalog).plan_unsatisfied_removals(&ledger);

    assert_eq!(planned.plan.group(Action::Remove), ["block_listed"]);
    assert_eq!(planned.plan.group_of("mod_core"), None);
}

#[test]
fn plan_missing_skips_catalog_only_addon_with_unobtainable_dependency() {
    let types = AddonTypeCatalog::builtin();
    let disk = FakeDisk::default().with_presence("block_foo", Presence::Missing);
    let ledger = Inventory::new();
    let catalog = catalog([listed("block", "foo", 2).with_dependency(Source::Reference, "local_bar", 10)]);
    let resolver = Planner::new(&types, &disk, &ledger, &catalog).resolver();

    assert!(!resolver.check("block_foo", DependencyView::Reference).satisfied);
    let planned = Planner::new(&types, &disk, &ledger, &catalog).plan_missing(&ledger);
    assert!(planned.plan.is_empty());
    assert!(planned.held_back.is_empty());
}

#[test]
fn removal_is_not_requeued_after_inventory_refresh() {
    let types = AddonTypeCatalog::builtin();
    let disk = FakeDisk::default().with_vcs("block_custom");
    let ledger = inventory([installed("block", "custom", Some(1)), installed("mod", "quiz", Some(1))]);
    let catalog = catalog([listed("mod", "quiz", 2)]);

    let first = Planner::new(&types, &disk, &ledger, &catalog).plan_removals(&ledger);
    assert_eq!(first.plan.group(Action::Remove), ["block_custom"]);

    let mut refreshed = ledger.clone();
    refreshed.remove("block", "custom");
    let second = Planner::new(&types, &disk, &refreshed, &catalog).plan_removals(&refreshed);
    assert!(second.plan.is_empty());
}

#[test]
fn plan_required_adds_only_absent_known_addons() {
    let types = AddonTypeCatalog::builtin();
    let disk = FakeDisk::default();
    let ledger = inventory([installed("block", "rlagent", Some(1))]);
    let catalog = Catalog::new(27);
    let required = vec![
        "auth_rladmin".to_string(),
        "block_rlagent".to_string(),
        "widget_unknown".to_string(),
    ];

    let planned = Planner::new(&types, &disk, &ledger, &catalog).plan_required(&required);

    assert_eq!(planned.plan.group(Action::Add), ["auth_rladmin"]);
    assert_eq!(planned.warnings.len(), 1);
    assert_eq!(planned.warnings[0].kind, WarningKind::DataInconsistency);
}

#[test]
fn branch_upgrade_plan_removes_before_updating() {
    let types = AddonTypeCatalog::builtin();
    let disk = FakeDisk::default().with_vcs("block_custom");
    let ledger = inventory([installed("block", "custom", Some(1)), installed("mod", "quiz", Some(1))]);
    let catalog = catalog([listed("mod", "quiz", 2)]);

    let planned = Planner::new(&types, &disk, &ledger, &catalog).plan_branch_upgrade(&ledger);
    let ordered = planned
        .plan
        .ordered()
        .into_iter()
        .map(|request| (request.action, request.full_name))
        .collect::<Vec<_>>();

    assert_eq!(
        ordered,
        vec![
            (Action::Remove, "block_custom".to_string()),
            (Action::Update, "mod_quiz".to_string())
        ]
    );
}

#[test]
fn report_unavailable_lists_uncatalogued_addons() {
    let types = AddonTypeCatalog::builtin();
    let disk = FakeDisk::default();
    let ledger = inventory([installed("block", "custom", Some(1)), installed("mod", "quiz", Some(1))]);
    let catalog = catalog([listed("mod", "quiz", 2)]);

    let unavailable = Planner::new(&types, &disk, &ledger, &catalog).report_unavailable(&ledger);

    assert_eq!(unavailable, vec!["block_custom"]);
}

#[test]
fn unknown_addon_types_are_skipped_with_a_warning() {
    let types = AddonTypeCatalog::builtin();
    let disk = FakeDisk::default();
    let ledger = inventory([installed("widget", "spinner", Some(1))]);
    let catalog = catalog([listed("widget", "spinner", 2)]);

    let planned = Planner::new(&types, &disk, &ledger, &catalog).plan_updates(&ledger);

    assert!(planned.plan.is_empty());
    assert_eq!(planned.warnings[0].kind, WarningKind::DataInconsistency);
}
