use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use modmigrate_common::{Error, ModuleId, Result};
use modmigrate_config::MigratorConfig;
use modmigrate_db::{Cache, HistoryCache, HistoryItem, HistoryView, LedgerStore};
use tracing::info;

use crate::catalog::Catalog;
use crate::executor::{Executor, RecoveryReport, UnitReport, now_unix};
use crate::registry::UnitRegistry;
use crate::reporter::{MigrationEvent, Reporter};
use crate::version::{VersionTarget, timestamp_of};

/// Where a `to`/`mark` target sits relative to the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// Apply these pending versions, oldest first.
    Up(Vec<String>),
    /// Revert these applied versions, newest first.
    Down(Vec<String>),
    /// The target is the most recently applied version.
    AlreadyAt,
}

/// Orchestrates catalog, ledger and executor for one database.
///
/// Shared by the command line and the web admin; they only differ in the
/// [`Reporter`] they pass in.
pub struct Migrator {
    catalog: Arc<Catalog>,
    history: Arc<HistoryCache>,
    executor: Executor,
}

impl Migrator {
    pub fn new(
        catalog: Catalog,
        registry: UnitRegistry,
        ledger: Arc<LedgerStore>,
        cache: Arc<dyn Cache>,
        cache_ttl: Duration,
    ) -> Self {
        let catalog = Arc::new(catalog);
        let history = Arc::new(HistoryCache::new(ledger, cache, cache_ttl));
        let executor = Executor::new(
            Arc::clone(&catalog),
            Arc::new(registry),
            Arc::clone(&history),
        );
        Self {
            catalog,
            history,
            executor,
        }
    }

    pub fn from_config(
        config: &MigratorConfig,
        registry: UnitRegistry,
        ledger: Arc<LedgerStore>,
        cache: Arc<dyn Cache>,
    ) -> Self {
        Self::new(
            Catalog::from_config(&config.paths),
            registry,
            ledger,
            cache,
            Duration::from_secs(config.cache.ttl_secs),
        )
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn ledger(&self) -> &Arc<LedgerStore> {
        self.history.ledger()
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Catalog versions of `module` not yet applied, oldest first.
    ///
    /// Reads the ledger directly rather than through the history cache.
    pub fn new_migrations(&self, module: &ModuleId) -> Result<Vec<String>> {
        let applied: HashSet<String> = self
            .ledger()
            .list_all(Some(module), None)?
            .into_iter()
            .filter(|e| e.is_confirmed())
            .filter_map(|e| timestamp_of(&e.version).map(str::to_string))
            .collect();

        Ok(self
            .catalog
            .new_versions(module, &applied)?
            .into_iter()
            .map(|e| e.version.into_string())
            .collect())
    }

    /// Pending versions for every module in `modules` that has any.
    pub fn diff_pending(&self, modules: &[ModuleId]) -> Result<BTreeMap<ModuleId, Vec<String>>> {
        let mut updates = BTreeMap::new();
        for module in modules {
            let pending = self.new_migrations(module)?;
            if !pending.is_empty() {
                updates.insert(module.clone(), pending);
            }
        }
        Ok(updates)
    }

    /// Apply every pending migration of `module`, stopping at the first
    /// failure. Units applied before the failure stay applied.
    pub fn update_to_latest(
        &self,
        module: &ModuleId,
        reporter: &mut dyn Reporter,
    ) -> Result<Vec<UnitReport>> {
        let pending = self.new_migrations(module)?;
        if pending.is_empty() {
            info!("there are no new migrations for {module}");
            reporter.report(&MigrationEvent::NoNewMigrations { module });
            return Ok(Vec::new());
        }

        info!("updating DB of {module} to latest version");
        reporter.report(&MigrationEvent::UpdatingModule { module });
        self.apply_versions(module, &pending, reporter)
    }

    /// Apply the next `limit` pending migrations (all when `None`).
    pub fn up(
        &self,
        module: &ModuleId,
        limit: Option<usize>,
        reporter: &mut dyn Reporter,
    ) -> Result<Vec<UnitReport>> {
        let mut pending = self.new_migrations(module)?;
        if let Some(limit) = limit.filter(|l| *l > 0) {
            pending.truncate(limit);
        }
        self.apply_versions(module, &pending, reporter)
    }

    /// Apply `versions` in order, fail-fast.
    pub fn apply_versions(
        &self,
        module: &ModuleId,
        versions: &[String],
        reporter: &mut dyn Reporter,
    ) -> Result<Vec<UnitReport>> {
        let mut reports = Vec::with_capacity(versions.len());
        for version in versions {
            reports.push(self.executor.apply_up(module, version, reporter)?);
        }
        Ok(reports)
    }

    /// The `steps` most recently applied versions of `module`, newest first.
    pub fn revert_candidates(&self, module: &ModuleId, steps: usize) -> Result<Vec<String>> {
        if steps < 1 {
            return Err(Error::Usage(
                "the step parameter must be greater than 0".to_string(),
            ));
        }
        Ok(self
            .ledger()
            .list_all(Some(module), Some(steps))?
            .into_iter()
            .map(|e| e.version)
            .collect())
    }

    /// Revert the last `steps` migrations of `module`, newest first.
    pub fn down(
        &self,
        module: &ModuleId,
        steps: usize,
        reporter: &mut dyn Reporter,
    ) -> Result<Vec<UnitReport>> {
        let versions = self.revert_candidates(module, steps)?;
        self.revert_versions(module, &versions, reporter)
    }

    /// Revert `versions` in order, fail-fast.
    pub fn revert_versions(
        &self,
        module: &ModuleId,
        versions: &[String],
        reporter: &mut dyn Reporter,
    ) -> Result<Vec<UnitReport>> {
        let mut reports = Vec::with_capacity(versions.len());
        for version in versions {
            reports.push(self.executor.apply_down(module, version, reporter)?);
        }
        Ok(reports)
    }

    /// Revert the last `steps` migrations, then apply them again.
    pub fn redo(
        &self,
        module: &ModuleId,
        steps: usize,
        reporter: &mut dyn Reporter,
    ) -> Result<Vec<UnitReport>> {
        let versions = self.revert_candidates(module, steps)?;
        self.redo_versions(module, &versions, reporter)
    }

    pub fn redo_versions(
        &self,
        module: &ModuleId,
        versions: &[String],
        reporter: &mut dyn Reporter,
    ) -> Result<Vec<UnitReport>> {
        let mut reports = self.revert_versions(module, versions, reporter)?;
        let reapply: Vec<String> = versions.iter().rev().cloned().collect();
        reports.extend(self.apply_versions(module, &reapply, reporter)?);
        Ok(reports)
    }

    /// Work out what reaching `target` would take.
    ///
    /// Pending migrations are searched first, then the applied history.
    pub fn plan_target(&self, module: &ModuleId, target: &VersionTarget) -> Result<Plan> {
        let pending = self.new_migrations(module)?;
        if let Some(i) = pending.iter().position(|v| target.matches(v)) {
            return Ok(Plan::Up(pending[..=i].to_vec()));
        }

        let applied: Vec<String> = self
            .ledger()
            .list_all(Some(module), None)?
            .into_iter()
            .map(|e| e.version)
            .collect();
        match applied.iter().position(|v| target.matches(v)) {
            Some(0) => Ok(Plan::AlreadyAt),
            Some(i) => Ok(Plan::Down(applied[..i].to_vec())),
            None => Err(Error::NotFound(format!(
                "unable to find the version '{}'",
                target.original()
            ))),
        }
    }

    /// Migrate up or down until `target` is the latest applied version.
    pub fn to(
        &self,
        module: &ModuleId,
        target: &VersionTarget,
        reporter: &mut dyn Reporter,
    ) -> Result<Vec<UnitReport>> {
        match self.plan_target(module, target)? {
            Plan::Up(versions) => self.apply_versions(module, &versions, reporter),
            Plan::Down(versions) => self.revert_versions(module, &versions, reporter),
            Plan::AlreadyAt => Ok(Vec::new()),
        }
    }

    /// Move the ledger to `target` without running any migration code.
    /// Returns the plan that was carried out.
    pub fn mark(&self, module: &ModuleId, target: &VersionTarget) -> Result<Plan> {
        let plan = self.plan_target(module, target)?;
        self.mark_plan(module, &plan)?;
        Ok(plan)
    }

    /// Apply `plan` to the ledger alone, in one transaction. A version left
    /// pending by an interrupted run is stamped as applied.
    pub fn mark_plan(&self, module: &ModuleId, plan: &Plan) -> Result<()> {
        let ledger = self.ledger();
        match plan {
            Plan::Up(versions) => ledger.mark_applied(module, versions, now_unix())?,
            Plan::Down(versions) => {
                ledger.remove_all(module, versions)?;
            }
            Plan::AlreadyAt => return Ok(()),
        }
        self.history.clear()?;
        info!("migration history of {module} set without running migrations");
        Ok(())
    }

    /// Roll back interrupted migrations of `module`.
    pub fn check_for_bad_migration(
        &self,
        module: &ModuleId,
        base_unit: Option<&str>,
        reporter: &mut dyn Reporter,
    ) -> Result<RecoveryReport> {
        self.executor
            .check_and_repair_pending(module, base_unit, reporter)
    }

    /// Cached history query; see [`HistoryCache::get`].
    pub fn history(
        &self,
        module: Option<&ModuleId>,
        limit: Option<usize>,
        all: bool,
    ) -> Result<HistoryView> {
        self.history.get(module, limit, all)
    }

    pub fn migration_history(
        &self,
        module: &ModuleId,
        limit: Option<usize>,
    ) -> Result<Vec<HistoryItem>> {
        self.history.module_history(module, limit)
    }

    /// Modules with at least one ledger row.
    pub fn modules_with_db_installed(&self) -> Result<Vec<ModuleId>> {
        self.ledger().installed_modules()
    }

    /// Call when modules are installed, enabled or disabled.
    pub fn module_state_changed(&self) -> Result<()> {
        self.history.invalidate_module_state()
    }

    /// Write a new migration file for `module`.
    pub fn create(&self, module: &ModuleId, name: &str) -> Result<PathBuf> {
        self.catalog.create_unit(module, name, Utc::now())
    }
}
