use std::sync::Arc;
use std::time::{Duration, Instant};

use modmigrate_common::{Error, ModuleId, Result};
use modmigrate_db::{HistoryCache, LedgerEntry};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::catalog::Catalog;
use crate::registry::UnitRegistry;
use crate::reporter::{MigrationEvent, Reporter};
use crate::unit::{UnitOutcome, UnitStatus};
use crate::version::is_base_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
}

/// What happened when one unit ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReport {
    pub module: ModuleId,
    pub version: String,
    pub direction: Direction,
    pub status: UnitStatus,
    pub elapsed: Duration,
    pub log: String,
}

/// Outcome of a recovery pass over zero-time ledger rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub reverted: Vec<String>,
    pub failed: Vec<RecoveryFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryFailure {
    pub version: String,
    pub error: String,
}

impl RecoveryReport {
    /// Some interrupted migration could not be rolled back and is still
    /// in the ledger.
    pub fn is_degraded(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.reverted.is_empty() && self.failed.is_empty()
    }
}

/// Runs single migration units and keeps the ledger in step with them.
///
/// `up` is two-phase: a row with `apply_time = 0` is inserted before the unit
/// runs and stamped afterwards, so an interrupted run leaves a marker the
/// next [`Executor::check_and_repair_pending`] can find.
pub struct Executor {
    catalog: Arc<Catalog>,
    registry: Arc<UnitRegistry>,
    history: Arc<HistoryCache>,
}

impl Executor {
    pub fn new(
        catalog: Arc<Catalog>,
        registry: Arc<UnitRegistry>,
        history: Arc<HistoryCache>,
    ) -> Self {
        Self {
            catalog,
            registry,
            history,
        }
    }

    pub fn apply_up(
        &self,
        module: &ModuleId,
        version: &str,
        reporter: &mut dyn Reporter,
    ) -> Result<UnitReport> {
        reporter.report(&MigrationEvent::Started {
            module,
            version,
            direction: Direction::Up,
        });

        let start = Instant::now();
        let unit = self.registry.resolve(&self.catalog, module, version)?;
        let ledger = self.history.ledger();

        ledger.record_pending(module, version)?;
        self.history.clear()?;

        let outcome = ledger
            .with_connection(|conn| unit.up(conn))
            .unwrap_or_else(|e| UnitOutcome::failed(e.to_string()));
        log_unit_output(module, version, &outcome);

        if outcome.is_failure() {
            let elapsed = start.elapsed();
            error!(
                "error when running {version} for {module} ({:.3}s)",
                elapsed.as_secs_f64()
            );
            return Err(execution_failure(
                module,
                version,
                Direction::Up,
                elapsed,
                outcome,
                reporter,
            ));
        }

        ledger.confirm_applied(module, version, now_unix())?;
        self.history.clear()?;

        let elapsed = start.elapsed();
        info!(
            "migration {version} for {module} applied in {:.3}s",
            elapsed.as_secs_f64()
        );
        reporter.report(&MigrationEvent::Finished {
            module,
            version,
            direction: Direction::Up,
            elapsed,
        });

        Ok(UnitReport {
            module: module.clone(),
            version: version.to_string(),
            direction: Direction::Up,
            status: outcome.status,
            elapsed,
            log: outcome.log,
        })
    }

    /// Revert one unit. On failure the ledger is left untouched.
    pub fn apply_down(
        &self,
        module: &ModuleId,
        version: &str,
        reporter: &mut dyn Reporter,
    ) -> Result<UnitReport> {
        info!("downgrade migration {version} for {module}");
        reporter.report(&MigrationEvent::Started {
            module,
            version,
            direction: Direction::Down,
        });

        let start = Instant::now();
        let unit = self.registry.resolve(&self.catalog, module, version)?;
        let ledger = self.history.ledger();

        let outcome = ledger
            .with_connection(|conn| unit.down(conn))
            .unwrap_or_else(|e| UnitOutcome::failed(e.to_string()));
        log_unit_output(module, version, &outcome);

        if outcome.is_failure() {
            let elapsed = start.elapsed();
            error!(
                "error when downgrading {version} for {module} ({:.3}s)",
                elapsed.as_secs_f64()
            );
            return Err(execution_failure(
                module,
                version,
                Direction::Down,
                elapsed,
                outcome,
                reporter,
            ));
        }

        ledger.remove(module, version)?;
        self.history.clear()?;

        let elapsed = start.elapsed();
        info!(
            "migration {version} for {module} downgraded in {:.3}s",
            elapsed.as_secs_f64()
        );
        reporter.report(&MigrationEvent::Finished {
            module,
            version,
            direction: Direction::Down,
            elapsed,
        });

        Ok(UnitReport {
            module: module.clone(),
            version: version.to_string(),
            direction: Direction::Down,
            status: outcome.status,
            elapsed,
            log: outcome.log,
        })
    }

    /// Roll back every migration of `module` whose `up` never confirmed.
    ///
    /// Reads the ledger directly. When the module has no rows at all and
    /// `base_unit` names a base migration, that unit is rolled back too, to
    /// undo a base install that died before its ledger row was written.
    /// Individual failures are recorded and the pass moves on.
    pub fn check_and_repair_pending(
        &self,
        module: &ModuleId,
        base_unit: Option<&str>,
        reporter: &mut dyn Reporter,
    ) -> Result<RecoveryReport> {
        reporter.report(&MigrationEvent::CheckingPending { module });

        let ledger = self.history.ledger();
        let rows = ledger.list_all(Some(module), None)?;

        let mut pending: Vec<LedgerEntry> =
            rows.iter().filter(|e| !e.is_confirmed()).cloned().collect();
        if rows.is_empty()
            && let Some(base) = base_unit.filter(|b| is_base_name(b))
        {
            pending.push(LedgerEntry {
                module: module.clone(),
                version: base.to_string(),
                apply_time: 0,
            });
        }

        let mut report = RecoveryReport::default();
        if pending.is_empty() {
            info!("no need to downgrade migrations for {module}");
            reporter.report(&MigrationEvent::NothingToDowngrade { module });
            return Ok(report);
        }

        for entry in pending {
            let version = entry.version.as_str();
            info!("downgrade {version} for {module}");
            reporter.report(&MigrationEvent::Downgrading { module, version });

            match self.apply_down(module, version, reporter) {
                Ok(_) => report.reverted.push(entry.version),
                Err(e) => {
                    let message = e.to_string();
                    warn!("can't downgrade {version} for {module}: {message}");
                    reporter.report(&MigrationEvent::DowngradeFailed {
                        module,
                        version,
                        error: &message,
                    });
                    report.failed.push(RecoveryFailure {
                        version: entry.version,
                        error: message,
                    });
                }
            }
        }

        Ok(report)
    }
}

fn execution_failure(
    module: &ModuleId,
    version: &str,
    direction: Direction,
    elapsed: Duration,
    outcome: UnitOutcome,
    reporter: &mut dyn Reporter,
) -> Error {
    reporter.report(&MigrationEvent::Failed {
        module,
        version,
        direction,
        elapsed,
        output: &outcome.log,
    });
    Error::Execution {
        module: module.to_string(),
        version: version.to_string(),
        output: outcome.log,
        elapsed,
    }
}

fn log_unit_output(module: &ModuleId, version: &str, outcome: &UnitOutcome) {
    if !outcome.log.is_empty() {
        info!(module = %module, version, "{}", outcome.log);
    }
}

pub(crate) fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
