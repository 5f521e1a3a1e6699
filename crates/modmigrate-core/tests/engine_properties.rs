use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use modmigrate_common::{Error, ModuleId, Result};
use modmigrate_core::{
    Catalog, MigrationUnit, Migrator, NullReporter, Plan, UnitOutcome, UnitRegistry,
    VersionTarget,
};
use modmigrate_db::{HistoryView, LedgerStore, MemoryCache};
use rusqlite::Connection;
use tempfile::TempDir;

/// Records every up/down call into a shared journal.
struct Journaled {
    version: &'static str,
    journal: Arc<Mutex<Vec<String>>>,
    fail_up: bool,
}

impl MigrationUnit for Journaled {
    fn up(&self, _conn: &Connection) -> Result<UnitOutcome> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("up {}", self.version));
        if self.fail_up {
            Ok(UnitOutcome::failed(format!("{} cannot be applied", self.version)))
        } else {
            Ok(UnitOutcome::done())
        }
    }

    fn down(&self, _conn: &Connection) -> Result<UnitOutcome> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("down {}", self.version));
        Ok(UnitOutcome::done())
    }
}

struct Harness {
    root: TempDir,
    migrator: Migrator,
    journal: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    /// Registers `versions` for `blog` and drops a marker file for each.
    fn new(versions: &[&'static str], failing: &[&'static str]) -> Self {
        let root = tempfile::tempdir().unwrap();
        let catalog = Catalog::new(
            root.path().join("core"),
            root.path().join("modules"),
            "install/migrations",
        );
        let journal = Arc::new(Mutex::new(Vec::new()));

        let mut registry = UnitRegistry::new();
        for &version in versions {
            let journal = Arc::clone(&journal);
            let fail_up = failing.contains(&version);
            registry
                .register(blog(), version, move || {
                    Box::new(Journaled {
                        version,
                        journal: Arc::clone(&journal),
                        fail_up,
                    })
                })
                .unwrap();
        }

        let migrator = Migrator::new(
            catalog,
            registry,
            Arc::new(LedgerStore::in_memory("migrations").unwrap()),
            Arc::new(MemoryCache::new()),
            Duration::from_secs(3600),
        );

        let harness = Self {
            root,
            migrator,
            journal,
        };
        for &version in versions {
            harness.add_file(version);
        }
        harness
    }

    fn add_file(&self, version: &str) {
        let dir = self.migrator.catalog().migrations_dir(&blog());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(format!("{version}.rs")), "").unwrap();
    }

    fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    fn root(&self) -> &Path {
        self.root.path()
    }
}

fn blog() -> ModuleId {
    ModuleId::from("blog")
}

#[test]
fn pending_is_catalog_minus_applied_and_drains_to_empty() {
    let h = Harness::new(
        &["m240101_000000_a", "m240102_000000_b", "m240103_000000_c"],
        &[],
    );
    h.migrator.up(&blog(), Some(1), &mut NullReporter).unwrap();
    assert_eq!(
        h.migrator.new_migrations(&blog()).unwrap(),
        vec!["m240102_000000_b", "m240103_000000_c"]
    );

    let pending = h.migrator.new_migrations(&blog()).unwrap();
    h.migrator
        .apply_versions(&blog(), &pending, &mut NullReporter)
        .unwrap();
    assert!(h.migrator.new_migrations(&blog()).unwrap().is_empty());
}

#[test]
fn update_to_latest_is_idempotent() {
    let h = Harness::new(&["m240101_000000_a", "m240102_000000_b"], &[]);
    let first = h.migrator.update_to_latest(&blog(), &mut NullReporter).unwrap();
    assert_eq!(first.len(), 2);

    let second = h.migrator.update_to_latest(&blog(), &mut NullReporter).unwrap();
    assert!(second.is_empty());
    assert_eq!(h.journal().len(), 2);
}

#[test]
fn batch_stops_at_first_failure_and_keeps_earlier_units() {
    let h = Harness::new(
        &["m240101_000000_a", "m240102_000000_b", "m240103_000000_c"],
        &["m240102_000000_b"],
    );
    let err = h
        .migrator
        .update_to_latest(&blog(), &mut NullReporter)
        .unwrap_err();
    match err {
        Error::Execution { version, output, .. } => {
            assert_eq!(version, "m240102_000000_b");
            assert_eq!(output, "m240102_000000_b cannot be applied");
        }
        other => panic!("expected execution failure, got {other}"),
    }

    assert_eq!(h.journal(), vec!["up m240101_000000_a", "up m240102_000000_b"]);
    let ledger = h.migrator.ledger();
    assert!(ledger.get(&blog(), "m240101_000000_a").unwrap().unwrap().is_confirmed());
    assert_eq!(
        ledger.get(&blog(), "m240102_000000_b").unwrap().unwrap().apply_time,
        0
    );
    assert!(ledger.get(&blog(), "m240103_000000_c").unwrap().is_none());
}

#[test]
fn zero_time_row_is_never_treated_as_applied() {
    let h = Harness::new(&["m240101_000000_a"], &["m240101_000000_a"]);
    assert!(h.migrator.update_to_latest(&blog(), &mut NullReporter).is_err());

    // still pending from the catalog's point of view
    assert_eq!(
        h.migrator.new_migrations(&blog()).unwrap(),
        vec!["m240101_000000_a"]
    );

    let report = h
        .migrator
        .check_for_bad_migration(&blog(), None, &mut NullReporter)
        .unwrap();
    assert_eq!(report.reverted, vec!["m240101_000000_a".to_string()]);
    assert!(!report.is_degraded());
    assert!(h.migrator.ledger().pending_entries(&blog()).unwrap().is_empty());
    assert_eq!(
        h.journal(),
        vec!["up m240101_000000_a", "down m240101_000000_a"]
    );
}

#[test]
fn history_reflects_every_mutation_despite_warm_cache() {
    let h = Harness::new(&["m240101_000000_a", "m240102_000000_b"], &[]);
    assert!(h.migrator.migration_history(&blog(), None).unwrap().is_empty());

    h.migrator.up(&blog(), Some(1), &mut NullReporter).unwrap();
    assert_eq!(h.migrator.migration_history(&blog(), None).unwrap().len(), 1);

    h.migrator
        .mark(&blog(), &VersionTarget::parse("240102_000000").unwrap())
        .unwrap();
    assert_eq!(h.migrator.migration_history(&blog(), None).unwrap().len(), 2);

    h.migrator.down(&blog(), 2, &mut NullReporter).unwrap();
    assert!(h.migrator.migration_history(&blog(), None).unwrap().is_empty());
}

#[test]
fn revert_runs_in_reverse_chronological_order() {
    let h = Harness::new(&["m240101_000000_a", "m240102_000000_b"], &[]);
    h.migrator.update_to_latest(&blog(), &mut NullReporter).unwrap();
    h.migrator.down(&blog(), 2, &mut NullReporter).unwrap();

    assert_eq!(
        h.journal(),
        vec![
            "up m240101_000000_a",
            "up m240102_000000_b",
            "down m240102_000000_b",
            "down m240101_000000_a",
        ]
    );
}

#[test]
fn update_blog_records_confirmed_row_in_history() {
    let h = Harness::new(&["m240101_100000_init"], &[]);
    h.migrator.update_to_latest(&blog(), &mut NullReporter).unwrap();

    let history = h.migrator.migration_history(&blog(), None).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].version, "m240101_100000_init");
    assert!(history[0].apply_time > 0);

    match h.migrator.history(Some(&blog()), None, false).unwrap() {
        HistoryView::Module(items) => assert_eq!(items, history),
        other => panic!("expected module view, got {other:?}"),
    }
}

#[test]
fn mark_ahead_inserts_rows_without_running_units() {
    let h = Harness::new(
        &["m240101_000000_a", "m240102_000000_b", "m240103_000000_c"],
        &[],
    );
    let plan = h
        .migrator
        .mark(&blog(), &VersionTarget::parse("m240102_000000_b").unwrap())
        .unwrap();
    assert_eq!(
        plan,
        Plan::Up(vec!["m240101_000000_a".into(), "m240102_000000_b".into()])
    );

    assert!(h.journal().is_empty());
    let entries = h.migrator.ledger().list_all(Some(&blog()), None).unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.is_confirmed()));
    assert_eq!(
        h.migrator.new_migrations(&blog()).unwrap(),
        vec!["m240103_000000_c"]
    );
}

#[test]
fn to_moves_up_and_back_down() {
    let h = Harness::new(
        &["m240101_000000_a", "m240102_000000_b", "m240103_000000_c"],
        &[],
    );
    let target_c = VersionTarget::parse("240103_000000").unwrap();
    let target_a = VersionTarget::parse("240101_000000").unwrap();

    assert_eq!(h.migrator.to(&blog(), &target_c, &mut NullReporter).unwrap().len(), 3);
    assert!(h.migrator.to(&blog(), &target_c, &mut NullReporter).unwrap().is_empty());

    let reverted = h.migrator.to(&blog(), &target_a, &mut NullReporter).unwrap();
    let versions: Vec<_> = reverted.iter().map(|r| r.version.as_str()).collect();
    assert_eq!(versions, vec!["m240103_000000_c", "m240102_000000_b"]);
}

#[test]
fn new_file_after_update_becomes_pending() {
    let h = Harness::new(&["m240101_000000_a"], &[]);
    h.migrator.update_to_latest(&blog(), &mut NullReporter).unwrap();

    let dir = h.root().join("modules/blog/install/migrations");
    std::fs::write(
        dir.join("m240105_000000_more.sql"),
        "-- +up\nCREATE TABLE more (id INTEGER);\n-- +down\nDROP TABLE more;\n",
    )
    .unwrap();

    assert_eq!(
        h.migrator.new_migrations(&blog()).unwrap(),
        vec!["m240105_000000_more"]
    );
    let reports = h.migrator.update_to_latest(&blog(), &mut NullReporter).unwrap();
    assert_eq!(reports.len(), 1);
}

#[test]
fn concurrent_pending_insert_is_rejected() {
    let h = Harness::new(&["m240101_000000_a"], &[]);
    // another process already started this unit
    h.migrator
        .ledger()
        .record_pending(&blog(), "m240101_000000_a")
        .unwrap();

    let err = h
        .migrator
        .update_to_latest(&blog(), &mut NullReporter)
        .unwrap_err();
    assert!(matches!(err, Error::Database(_)));
    assert!(h.journal().is_empty());
}
