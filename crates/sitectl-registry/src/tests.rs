use super::*;
use sitectl_core::{
    AddonTypeCatalog, DiskInventory, InstalledLedger, LevelMask, Presence, ReferenceCatalog,
    Source, WarningKind,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

#[test]
fn site_tree_lists_directories_with_marker_files() {
    let root = test_site_root();
    let types = AddonTypeCatalog::builtin();
    let block = types.get("block").expect("block type");
    write_addon(&root, "blocks/html", "version.php");
    write_addon(&root, "blocks/partial", "README");
    write_addon(&root, "blocks/.hidden", "version.php");
    fs::write(root.join("blocks/loose.php"), "<?php").expect("must write loose file");

    let tree = SiteTree::new(&root);
    let names = tree.list_instances(block).expect("must list blocks");
    assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["html"]);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn site_tree_lists_nothing_for_absent_type_root() {
    let root = test_site_root();
    let types = AddonTypeCatalog::builtin();
    let tree = SiteTree::new(&root);

    let names = tree
        .list_instances(types.get("qtype").expect("qtype type"))
        .expect("absent root is not an error");
    assert!(names.is_empty());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn site_tree_classifies_presence() {
    let root = test_site_root();
    let types = AddonTypeCatalog::builtin();
    let block = types.get("block").expect("block type");
    let theme = types.get("theme").expect("theme type");
    write_addon(&root, "blocks/html", "version.php");
    write_addon(&root, "blocks/partial", "README");
    write_addon(&root, "theme/clean", "config.php");

    let tree = SiteTree::new(&root);
    assert_eq!(tree.presence(block, "html"), Presence::Installed);
    assert_eq!(tree.presence(block, "partial"), Presence::Incomplete);
    assert_eq!(tree.presence(block, "absent"), Presence::Missing);
    assert_eq!(tree.presence(theme, "clean"), Presence::Installed);

    let _ = fs::remove_dir_all(&root);
}

#[cfg(unix)]
#[test]
fn site_tree_reports_symlinks_as_placeholders() {
    let root = test_site_root();
    let types = AddonTypeCatalog::builtin();
    let block = types.get("block").expect("block type");
    write_addon(&root, "shared/html", "version.php");
    fs::create_dir_all(root.join("blocks")).expect("must create blocks dir");
    std::os::unix::fs::symlink(root.join("shared/html"), root.join("blocks/html"))
        .expect("must create symlink");

    let tree = SiteTree::new(&root);
    assert_eq!(tree.presence(block, "html"), Presence::Placeholder);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn site_tree_detects_vcs_marker() {
    let root = test_site_root();
    let types = AddonTypeCatalog::builtin();
    let local = types.get("local").expect("local type");
    write_addon(&root, "local/tracked", "version.php");
    fs::create_dir_all(root.join("local/tracked/.git")).expect("must create git dir");
    write_addon(&root, "local/core", "version.php");

    let tree = SiteTree::new(&root);
    assert!(tree.has_vcs_marker(local, "tracked"));
    assert!(!tree.has_vcs_marker(local, "core"));
    assert!(!tree.has_vcs_marker(local, "absent"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn ledger_parses_versions_visibility_and_dependencies() {
    let types = AddonTypeCatalog::builtin();
    let loaded = parse_ledger(
        "# type\tname\tinstances\tvisible\tdisk\tdb\trelease\tdependencies\n\
         block\tfoo\t3\t1\t2015051100\t2014111000\t2.1\tlocal_bar:10, mod_quiz:2014051200\n\
         \n\
         local\tbar\t0\t0\t12\t12\n",
        &types,
    );

    assert!(loaded.warnings.is_empty(), "{:?}", loaded.warnings);
    let foo = loaded.value.get("block", "foo").expect("block_foo listed");
    assert_eq!(foo.instance_count, 3);
    assert!(foo.visible);
    assert_eq!(foo.version(Source::Disk), Some(2015051100));
    assert_eq!(foo.version(Source::Database), Some(2014111000));
    assert_eq!(
        foo.facts(Source::Disk).and_then(|facts| facts.release.as_deref()),
        Some("2.1")
    );
    assert_eq!(
        foo.dependencies(Source::Disk).collect::<Vec<_>>(),
        vec![("local_bar", 10), ("mod_quiz", 2014051200)]
    );

    let bar = loaded.value.get("local", "bar").expect("local_bar listed");
    assert!(!bar.visible);
    assert_eq!(bar.dependencies(Source::Disk).count(), 0);
}

#[test]
fn ledger_lists_every_known_type() {
    let types = AddonTypeCatalog::builtin();
    let loaded = parse_ledger("", &types);
    assert!(loaded.value.is_empty());
    assert_eq!(loaded.value.types().count(), types.len());
}

#[test]
fn ledger_treats_zero_and_dash_versions_as_absent() {
    let types = AddonTypeCatalog::builtin();
    let loaded = parse_ledger("block\tfoo\t0\t1\t0\t-\n", &types);
    let foo = loaded.value.get("block", "foo").expect("block_foo listed");
    assert_eq!(foo.version(Source::Disk), None);
    assert_eq!(foo.version(Source::Database), None);
}

#[test]
fn ledger_skips_unknown_types_with_a_warning() {
    let types = AddonTypeCatalog::builtin();
    let loaded = parse_ledger("gadget\tthing\t1\nblock\tfoo\n", &types);

    assert!(loaded.value.contains("block", "foo"));
    assert_eq!(loaded.value.len(), 1);
    assert_eq!(loaded.warnings.len(), 1);
    assert_eq!(loaded.warnings[0].kind, WarningKind::DataInconsistency);
    assert!(loaded.warnings[0].message.contains("gadget"));
}

#[test]
fn ledger_drops_malformed_dependency_entries() {
    let types = AddonTypeCatalog::builtin();
    let loaded = parse_ledger(
        "block\tfoo\t1\t1\t5\t5\t\tlocal_bar:ten,local_baz:4,:7\n",
        &types,
    );

    let foo = loaded.value.get("block", "foo").expect("block_foo listed");
    assert_eq!(
        foo.dependencies(Source::Disk).collect::<Vec<_>>(),
        vec![("local_baz", 4)]
    );
    assert_eq!(loaded.warnings.len(), 2);
    assert!(loaded
        .warnings
        .iter()
        .all(|warning| warning.kind == WarningKind::DataInconsistency));
}

#[test]
fn ledger_rejects_rows_without_a_name() {
    let types = AddonTypeCatalog::builtin();
    let loaded = parse_ledger("block\n", &types);
    assert!(loaded.value.is_empty());
    assert!(loaded.warnings[0].message.contains("line 1"));
}

#[test]
fn helper_ledger_parses_callback_output() {
    let types = AddonTypeCatalog::builtin();
    let ledger = HelperLedger::new(|| Ok("mod\tquiz\t12\t1\t2016052300\t2016052300\n".to_string()));

    let loaded = ledger.load(&types).expect("must load ledger");
    assert!(loaded.value.contains("mod", "quiz"));
}

#[test]
fn helper_ledger_reports_callback_failure() {
    let types = AddonTypeCatalog::builtin();
    let ledger = HelperLedger::new(|| Err(anyhow::anyhow!("helper exited with status 255")));

    let err = ledger.load(&types).expect_err("must fail");
    assert!(err.to_string().contains("installed addon ledger"));
    assert!(format!("{err:#}").contains("status 255"));
}

#[test]
fn catalog_response_builds_reference_descriptors() {
    let types = AddonTypeCatalog::builtin();
    let loaded = parse_catalog_response(
        &sample_catalog_body(),
        27,
        LevelMask::ALL,
        &types,
    )
    .expect("must parse catalog");

    assert!(loaded.warnings.is_empty(), "{:?}", loaded.warnings);
    let catalog = loaded.value;
    assert_eq!(catalog.branch, 27);
    assert_eq!(catalog.len(), 2);

    let foo = catalog.get("block_foo").expect("block_foo listed");
    assert_eq!(foo.version(Source::Reference), Some(2015051100));
    assert_eq!(foo.version(Source::Disk), None);
    assert_eq!(
        foo.dependencies(Source::Reference).collect::<Vec<_>>(),
        vec![("local_bar", 10)]
    );
    assert_eq!(foo.metadata.display_name.as_deref(), Some("Foo block"));
    assert_eq!(
        foo.metadata.code_source.as_deref(),
        Some("git@example.test:addons/block_foo.git")
    );
    assert_eq!(foo.path.as_deref(), Some(Path::new("blocks/foo")));
}

#[test]
fn catalog_response_filters_by_level() {
    let types = AddonTypeCatalog::builtin();
    let loaded = parse_catalog_response(&sample_catalog_body(), 27, LevelMask::CORE, &types)
        .expect("must parse catalog");

    assert!(loaded.value.contains("local_bar"));
    assert!(!loaded.value.contains("block_foo"));
}

#[test]
fn catalog_response_errors_fail_the_fetch() {
    let types = AddonTypeCatalog::builtin();
    let err = parse_catalog_response(
        r#"{"items":[{"error":"invalid branch"}]}"#,
        27,
        LevelMask::ALL,
        &types,
    )
    .expect_err("item error must fail");
    assert!(err.to_string().contains("invalid branch"));

    let err = parse_catalog_response(r#"{"error":"denied"}"#, 27, LevelMask::ALL, &types)
        .expect_err("top-level error must fail");
    assert!(err.to_string().contains("denied"));

    let err = parse_catalog_response(r#"{"items":[]}"#, 27, LevelMask::ALL, &types)
        .expect_err("empty listing must fail");
    assert!(err.to_string().contains("no addon listing"));

    assert!(parse_catalog_response("<html>", 27, LevelMask::ALL, &types).is_err());
}

#[test]
fn catalog_response_skips_bad_entries_with_warnings() {
    let types = AddonTypeCatalog::builtin();
    let loaded = parse_catalog_response(
        r#"{"items":[{
            "gadget_x": {"type": "gadget", "name": "x"},
            "block_bad": {"type": "block"},
            "block_ok": {"type": "block", "name": "ok", "version": 3}
        }]}"#,
        27,
        LevelMask::ALL,
        &types,
    )
    .expect("must parse catalog");

    assert_eq!(loaded.value.len(), 1);
    assert!(loaded.value.contains("block_ok"));
    assert_eq!(loaded.warnings.len(), 2);
}

#[test]
fn filesystem_catalog_reads_branch_snapshot() {
    let root = test_site_root();
    fs::create_dir_all(&root).expect("must create catalog root");
    fs::write(root.join("27.json"), sample_catalog_body()).expect("must write snapshot");
    let catalog = FilesystemCatalog::new(&root, AddonTypeCatalog::builtin());

    let loaded = catalog
        .fetch(LevelMask::ALL, 27)
        .expect("must read snapshot");
    assert_eq!(loaded.value.len(), 2);

    let err = catalog
        .fetch(LevelMask::ALL, 28)
        .expect_err("missing snapshot must fail");
    assert!(err.to_string().contains("28.json"));

    let _ = fs::remove_dir_all(&root);
}

fn sample_catalog_body() -> String {
    r#"{
  "items": [
    {
      "block_foo": {
        "type": "block",
        "name": "foo",
        "display_name": "Foo block",
        "source": "git@example.test:addons/block_foo.git",
        "level": "plus",
        "path": "blocks/foo",
        "version": 2015051100,
        "release": "2.7.1",
        "dependencies": {"local_bar": 10}
      },
      "local_bar": {
        "type": "local",
        "name": "bar",
        "level": "core",
        "version": 12
      }
    }
  ]
}"#
    .to_string()
}

fn write_addon(root: &Path, relative: &str, marker: &str) {
    let dir = root.join(relative);
    fs::create_dir_all(&dir).expect("must create addon dir");
    fs::write(dir.join(marker), "<?php").expect("must write marker");
}

static TEST_SITE_ROOT_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_site_root() -> PathBuf {
    let mut path = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let counter = TEST_SITE_ROOT_COUNTER.fetch_add(1, Ordering::SeqCst);
    path.push(format!(
        "sitectl-registry-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        counter
    ));
    path
}
