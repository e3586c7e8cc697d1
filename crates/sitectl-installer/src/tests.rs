use super::*;
use assert_matches::assert_matches;
use sitectl_core::{Action, ActionPlan, ActionRequest, AddonDescriptor, AddonTypeCatalog, Catalog};
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

#[test]
fn layout_places_state_under_dataroot() {
    let layout = SiteLayout::new("/srv/site", "/srv/data");
    assert_eq!(layout.runs_dir(), Path::new("/srv/data/sitectl/runs"));
    assert_eq!(
        layout.run_metadata_path("upgrade-1-2"),
        Path::new("/srv/data/sitectl/runs/upgrade-1-2.json")
    );
    assert_eq!(
        layout.maintenance_path(27),
        Path::new("/srv/data/climaintenance.html")
    );
    assert_eq!(
        layout.maintenance_path(19),
        Path::new("/srv/data/1/maintenance.html")
    );
    assert_eq!(layout.htaccess_path(), Path::new("/srv/site/.htaccess"));
}

#[test]
fn run_journal_claims_and_releases_active_marker() {
    let root = test_root();
    let layout = test_layout(&root);

    let mut first = RunMetadata::new("upgrade", 100);
    first.run_id = "upgrade-100-1".to_string();
    first.from_branch = Some("MOODLE_26_STABLE".to_string());
    let mut journal = RunJournal::begin(&layout, &first).expect("must begin run");
    let holder = active_run(&layout)
        .expect("must read active")
        .expect("marker exists");
    assert_eq!(holder.run_id, "upgrade-100-1");
    assert_eq!(holder.operation, "upgrade");
    assert_eq!(holder.started_at_unix, 100);
    assert_eq!(holder.pid, std::process::id());

    let mut second = RunMetadata::new("update", 101);
    second.run_id = "update-101-1".to_string();
    let err = RunJournal::begin(&layout, &second).expect_err("second run must be refused");
    assert!(err.to_string().contains("upgrade-100-1 (upgrade"));
    assert!(read_run_metadata(&layout, "update-101-1")
        .expect("must read metadata")
        .is_none());

    journal
        .record("blocked", "entered", None)
        .expect("must record");
    journal
        .record("source-sync", "failed", Some("checkout refused"))
        .expect("must record");
    journal.finish("failed").expect("must finish");

    assert_eq!(active_run(&layout).expect("must read active"), None);
    let entries = read_run_journal(&layout, "upgrade-100-1").expect("must read journal");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].seq, 2);
    assert_eq!(entries[1].detail.as_deref(), Some("checkout refused"));

    let metadata = read_run_metadata(&layout, "upgrade-100-1")
        .expect("must read metadata")
        .expect("metadata exists");
    assert_eq!(metadata.status, "failed");
    assert_eq!(metadata.from_branch.as_deref(), Some("MOODLE_26_STABLE"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn list_runs_orders_by_start_time() {
    let root = test_root();
    let layout = test_layout(&root);
    for (run_id, started) in [("b", 20), ("a", 30), ("c", 10)] {
        let mut metadata = RunMetadata::new("update", started);
        metadata.run_id = run_id.to_string();
        write_run_metadata(&layout, &metadata).expect("must write metadata");
    }
    claim_active_run(&layout, &RunMetadata::new("upgrade", 40)).expect("must claim");

    let runs = list_runs(&layout).expect("must list runs");
    assert_eq!(
        runs.iter().map(|run| run.run_id.as_str()).collect::<Vec<_>>(),
        vec!["c", "b", "a"]
    );

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn unreadable_active_marker_still_blocks_new_runs() {
    let root = test_root();
    let layout = test_layout(&root);
    fs::create_dir_all(layout.runs_dir()).expect("must create runs dir");
    fs::write(layout.run_active_path(), "upgrade-1-1\n").expect("must write marker");

    assert!(active_run(&layout).is_err());
    let err = RunJournal::begin(&layout, &RunMetadata::new("update", 5))
        .expect_err("held site must be refused");
    assert!(err.to_string().contains("an unidentified run"));

    fs::write(layout.run_active_path(), "\n").expect("must write marker");
    assert_eq!(active_run(&layout).expect("blank marker"), None);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn action_request_lists_remove_add_update() {
    let mut plan = ActionPlan::new();
    plan.queue(Action::Update, "mod_quiz");
    plan.queue(Action::Add, "block_html");
    plan.queue(Action::Remove, "local_old");

    assert_eq!(
        render_action_request(Path::new("/srv/site"), &plan),
        "site /srv/site\nremove local_old\nadd block_html\nupdate mod_quiz\n"
    );
}

#[test]
fn action_request_is_moved_into_place() {
    let root = test_root();
    let request_dir = root.join("requests");
    let mut plan = ActionPlan::new();
    plan.queue(Action::Add, "block_html");

    let path = write_action_request(&request_dir, Path::new("/srv/site"), &plan)
        .expect("must write request")
        .expect("non-empty plan writes a file");
    assert!(path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with("addon_")));
    assert_eq!(
        fs::read_to_string(&path).expect("must read request"),
        "site /srv/site\nadd block_html\n"
    );
    let leftovers = fs::read_dir(&request_dir)
        .expect("must read dir")
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".part"))
        .count();
    assert_eq!(leftovers, 0);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn empty_plan_writes_no_request() {
    let root = test_root();
    let request_dir = root.join("requests");
    let written = write_action_request(&request_dir, Path::new("/srv/site"), &ActionPlan::new())
        .expect("must not fail");
    assert_eq!(written, None);
    assert!(!request_dir.exists());
}

#[test]
fn executor_places_code_before_install_hook() {
    let types = AddonTypeCatalog::builtin();
    let hooks = FakeHooks::default();
    let store = FakeStore::default();
    let executor = AddonExecutor::new(&types, Path::new("/srv/site"), &hooks, &store);

    let outcome = executor.apply(&request(Action::Add, "block_html"));
    assert_eq!(outcome, ActionOutcome::Success);
    assert_eq!(
        store.calls.borrow().clone(),
        vec!["place /srv/site/blocks/html".to_string()]
    );
    assert_eq!(hooks.calls.borrow().clone(), vec!["install block_html".to_string()]);
}

#[test]
fn executor_keeps_code_when_uninstall_hook_fails() {
    let types = AddonTypeCatalog::builtin();
    let hooks = FakeHooks {
        failing: vec!["uninstall local_old".to_string()],
        ..FakeHooks::default()
    };
    let store = FakeStore::default();
    let executor = AddonExecutor::new(&types, Path::new("/srv/site"), &hooks, &store);

    let outcome = executor.apply(&request(Action::Remove, "local_old"));
    assert_matches!(outcome, ActionOutcome::Failure(reason) if reason.contains("uninstall hook"));
    assert!(store.calls.borrow().is_empty());
}

#[test]
fn executor_batch_continues_after_failure_and_counts() {
    let types = AddonTypeCatalog::builtin();
    let hooks = FakeHooks {
        failing: vec!["install block_broken".to_string()],
        ..FakeHooks::default()
    };
    let store = FakeStore::default();
    let executor = AddonExecutor::new(&types, Path::new("/srv/site"), &hooks, &store);

    let mut plan = ActionPlan::new();
    plan.queue(Action::Update, "mod_quiz");
    plan.queue(Action::Add, "block_broken");
    plan.queue(Action::Add, "block_html");
    plan.queue(Action::Remove, "local_old");

    let mut seen = Vec::new();
    let report = executor.execute_plan_with_progress(&plan, |request, outcome| {
        seen.push((request.full_name.clone(), outcome.is_success()));
    });

    assert_eq!(report.added, 1);
    assert_eq!(report.removed, 1);
    assert_eq!(report.updated, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.total(), 4);
    assert_eq!(report.failures[0].0.full_name, "block_broken");
    assert_eq!(
        seen,
        vec![
            ("local_old".to_string(), true),
            ("block_broken".to_string(), false),
            ("block_html".to_string(), true),
            ("mod_quiz".to_string(), true),
        ]
    );
}

#[test]
fn executor_target_prefers_catalog_path_and_source() {
    let types = AddonTypeCatalog::builtin();
    let hooks = FakeHooks::default();
    let store = FakeStore::default();
    let mut addon = AddonDescriptor::new("local", "bar");
    addon.path = Some(PathBuf::from("local/bar_plugin"));
    addon.metadata.code_source = Some("git@example.test:local_bar.git".to_string());
    let catalog = [addon].into_iter().collect::<Catalog>();

    let executor = AddonExecutor::new(&types, Path::new("/srv/site"), &hooks, &store)
        .with_catalog(&catalog);
    let target = executor.target("local_bar").expect("must resolve target");
    assert_eq!(target.path, Path::new("/srv/site/local/bar_plugin"));
    assert_eq!(
        target.code_source.as_deref(),
        Some("git@example.test:local_bar.git")
    );

    let fallback = executor.target("block_html").expect("must resolve target");
    assert_eq!(fallback.path, Path::new("/srv/site/blocks/html"));
    assert_eq!(fallback.code_source, None);
}

#[test]
fn executor_fails_unknown_types_without_calling_hooks() {
    let types = AddonTypeCatalog::builtin();
    let hooks = FakeHooks::default();
    let store = FakeStore::default();
    let executor = AddonExecutor::new(&types, Path::new("/srv/site"), &hooks, &store);

    let outcome = executor.apply(&request(Action::Update, "gadget_thing"));
    assert_matches!(outcome, ActionOutcome::Failure(reason) if reason.contains("gadget"));
    assert!(hooks.calls.borrow().is_empty());
}

#[test]
fn command_template_fills_known_tokens() {
    let template = CommandTemplate::new(["php", "{dirroot}/admin/cli/install.php", "--plugin={type}_{name}", "{other}"]);
    assert_eq!(
        template.render(&[("dirroot", "/srv/site"), ("type", "block"), ("name", "html")]),
        vec![
            "php",
            "/srv/site/admin/cli/install.php",
            "--plugin=block_html",
            "{other}"
        ]
    );
    assert_eq!(template.program(), Some("php"));
}

#[test]
fn command_hooks_without_templates_succeed() {
    let hooks = CommandHooks::new(
        "/srv/site",
        CommandTemplate::default(),
        CommandTemplate::default(),
        CommandTemplate::default(),
    );
    let output = hooks
        .install(&target("block_html"))
        .expect("empty hook must not fail");
    assert!(output.success);
}

#[cfg(unix)]
#[test]
fn command_hooks_report_exit_status_and_output() {
    let root = test_root();
    fs::create_dir_all(&root).expect("must create root");
    let hooks = CommandHooks::new(
        &root,
        CommandTemplate::default(),
        CommandTemplate::default(),
        CommandTemplate::new(["sh", "-c", "echo upgrading {full_name}; exit 3"]),
    );

    let output = hooks
        .upgrade_hook(&target("block_html"))
        .expect("hook must run");
    assert!(!output.success);
    assert_eq!(output.output, "upgrading block_html");

    let _ = fs::remove_dir_all(&root);
}

#[cfg(unix)]
#[test]
fn run_streaming_hands_over_each_line() {
    let mut lines = Vec::new();
    let output = run_streaming(
        &["sh".to_string(), "-c".to_string(), "printf 'one\\ntwo\\n'; echo oops >&2".to_string()],
        None,
        |line| lines.push(line.to_string()),
    )
    .expect("must run");
    assert!(output.success);
    assert_eq!(lines, vec!["one", "two"]);
    assert_eq!(output.stderr.trim(), "oops");
}

#[test]
fn file_blocker_writes_and_clears_maintenance_page() {
    let root = test_root();
    let layout = test_layout(&root);
    let blocker = FileBlocker::new(layout.clone(), 27).with_maintenance_page("down");

    blocker.block(BlockKind::Maintenance).expect("must block");
    assert_eq!(
        fs::read_to_string(layout.maintenance_path(27)).expect("must read page"),
        "down"
    );

    FileBlocker::new(layout.clone(), 19)
        .block(BlockKind::Maintenance)
        .expect("must block legacy");
    assert!(layout.maintenance_path(19).exists());

    blocker.unblock(BlockKind::Maintenance).expect("must unblock");
    assert!(!layout.maintenance_path(27).exists());
    assert!(!layout.maintenance_path(19).exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn file_blocker_access_rules_preserve_existing_content() {
    let root = test_root();
    let layout = test_layout(&root);
    fs::create_dir_all(layout.dirroot()).expect("must create dirroot");
    fs::write(layout.htaccess_path(), "Options -Indexes\n").expect("must write htaccess");
    let blocker = FileBlocker::new(layout.clone(), 27);

    blocker.block(BlockKind::AccessDenied).expect("must block");
    blocker.block(BlockKind::AccessDenied).expect("second block is a no-op");
    let blocked = fs::read_to_string(layout.htaccess_path()).expect("must read");
    assert_eq!(blocked.matches("Require all denied").count(), 1);

    blocker.unblock(BlockKind::AccessDenied).expect("must unblock");
    assert_eq!(
        fs::read_to_string(layout.htaccess_path()).expect("must read"),
        "Options -Indexes\n"
    );

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn block_kind_parses_legacy_name() {
    assert_eq!(BlockKind::parse("htaccess").expect("parse"), BlockKind::AccessDenied);
    assert_eq!(BlockKind::parse("maintenance").expect("parse"), BlockKind::Maintenance);
    assert!(BlockKind::parse("firewall").is_err());
}

#[test]
fn site_files_refuse_paths_outside_root() {
    let root = test_root();
    let files = LocalSiteFiles::new(&root);
    assert!(files.resolve(Path::new("../elsewhere")).is_err());
    assert!(files.resolve(Path::new("/etc")).is_err());
    assert!(files.resolve(Path::new("")).is_err());
    assert_eq!(
        files.resolve(Path::new("blocks/html")).expect("inside root"),
        root.join("blocks/html")
    );
}

#[test]
fn site_files_delete_relative_directories() {
    let root = test_root();
    fs::create_dir_all(root.join("blocks/html")).expect("must create addon");
    fs::write(root.join("blocks/html/version.php"), "<?php").expect("must write marker");
    let files = LocalSiteFiles::new(&root);

    assert!(files.exists(Path::new("blocks/html")));
    files
        .delete_directories(&[PathBuf::from("blocks/html"), PathBuf::from("blocks/absent")])
        .expect("must delete");
    assert!(!files.exists(Path::new("blocks/html")));
    assert!(root.join("blocks").exists());

    let _ = fs::remove_dir_all(&root);
}

#[derive(Default)]
struct FakeHooks {
    calls: RefCell<Vec<String>>,
    failing: Vec<String>,
}

impl FakeHooks {
    fn call(&self, hook: &str, target: &AddonTarget) -> anyhow::Result<HookOutput> {
        let call = format!("{hook} {}", target.full_name);
        self.calls.borrow_mut().push(call.clone());
        if self.failing.contains(&call) {
            Ok(HookOutput::failed("hook exploded"))
        } else {
            Ok(HookOutput::ok(""))
        }
    }
}

impl AddonHooks for FakeHooks {
    fn install(&self, target: &AddonTarget) -> anyhow::Result<HookOutput> {
        self.call("install", target)
    }

    fn uninstall(&self, target: &AddonTarget) -> anyhow::Result<HookOutput> {
        self.call("uninstall", target)
    }

    fn upgrade_hook(&self, target: &AddonTarget) -> anyhow::Result<HookOutput> {
        self.call("upgrade", target)
    }
}

#[derive(Default)]
struct FakeStore {
    calls: RefCell<Vec<String>>,
}

impl CodeStore for FakeStore {
    fn place(&self, target: &AddonTarget) -> anyhow::Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("place {}", target.path.display()));
        Ok(())
    }

    fn delete(&self, target: &AddonTarget) -> anyhow::Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("delete {}", target.path.display()));
        Ok(())
    }
}

fn request(action: Action, full_name: &str) -> ActionRequest {
    ActionRequest {
        action,
        full_name: full_name.to_string(),
    }
}

fn target(full_name: &str) -> AddonTarget {
    let (addon_type, name) = full_name.split_once('_').expect("full name");
    AddonTarget {
        full_name: full_name.to_string(),
        addon_type: addon_type.to_string(),
        name: name.to_string(),
        path: PathBuf::from("/srv/site/blocks").join(name),
        code_source: None,
    }
}

fn test_layout(root: &Path) -> SiteLayout {
    SiteLayout::new(root.join("site"), root.join("data"))
}

static TEST_ROOT_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_root() -> PathBuf {
    let mut path = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let counter = TEST_ROOT_COUNTER.fetch_add(1, Ordering::SeqCst);
    path.push(format!(
        "sitectl-installer-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        counter
    ));
    path
}
