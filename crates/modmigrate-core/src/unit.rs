use std::path::Path;

use modmigrate_common::{Error, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

/// How a unit's `up` or `down` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// Changes were made.
    Done,
    /// Nothing to do; still counts as success.
    Skipped,
    /// The unit refused or could not complete.
    Failed,
}

/// Structured result of running one direction of a migration unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOutcome {
    pub status: UnitStatus,
    /// Diagnostic text produced while running.
    pub log: String,
}

impl UnitOutcome {
    pub fn done() -> Self {
        Self {
            status: UnitStatus::Done,
            log: String::new(),
        }
    }

    pub fn skipped() -> Self {
        Self {
            status: UnitStatus::Skipped,
            log: String::new(),
        }
    }

    pub fn failed(log: impl Into<String>) -> Self {
        Self {
            status: UnitStatus::Failed,
            log: log.into(),
        }
    }

    pub fn with_log(mut self, log: impl Into<String>) -> Self {
        self.log = log.into();
        self
    }

    pub fn is_failure(&self) -> bool {
        self.status == UnitStatus::Failed
    }
}

/// One versioned schema change.
///
/// Returning `Err` is treated the same as [`UnitStatus::Failed`], with the
/// error text as the unit's output.
pub trait MigrationUnit: Send + Sync {
    fn up(&self, conn: &Connection) -> Result<UnitOutcome>;

    fn down(&self, conn: &Connection) -> Result<UnitOutcome>;
}

/// A migration written as a plain SQL file with `-- +up` and `-- +down`
/// sections. Each direction runs in its own transaction.
///
/// A `-- +irreversible` line in the down section makes `down` fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlUnit {
    version: String,
    up_sql: String,
    down: SqlDown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SqlDown {
    Sql(String),
    Irreversible,
}

#[derive(Clone, Copy)]
enum Section {
    Preamble,
    Up,
    Down,
}

impl SqlUnit {
    pub fn from_file(version: &str, path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            Error::Catalog(format!("failed to read migration {}: {e}", path.display()))
        })?;
        Self::parse(version, &source)
    }

    pub fn parse(version: &str, source: &str) -> Result<Self> {
        let mut section = Section::Preamble;
        let mut seen_up = false;
        let mut up_sql = String::new();
        let mut down_sql = String::new();
        let mut irreversible = false;

        for line in source.lines() {
            match line.trim() {
                "-- +up" => {
                    section = Section::Up;
                    seen_up = true;
                    continue;
                }
                "-- +down" => {
                    section = Section::Down;
                    continue;
                }
                "-- +irreversible" if matches!(section, Section::Down) => {
                    irreversible = true;
                    continue;
                }
                _ => {}
            }
            let target = match section {
                Section::Preamble => continue,
                Section::Up => &mut up_sql,
                Section::Down => &mut down_sql,
            };
            target.push_str(line);
            target.push('\n');
        }

        if !seen_up {
            return Err(Error::Catalog(format!(
                "migration {version} has no `-- +up` section"
            )));
        }

        Ok(Self {
            version: version.to_string(),
            up_sql,
            down: if irreversible {
                SqlDown::Irreversible
            } else {
                SqlDown::Sql(down_sql)
            },
        })
    }
}

impl MigrationUnit for SqlUnit {
    fn up(&self, conn: &Connection) -> Result<UnitOutcome> {
        run_sql(conn, &self.up_sql)
    }

    fn down(&self, conn: &Connection) -> Result<UnitOutcome> {
        match &self.down {
            SqlDown::Sql(sql) => run_sql(conn, sql),
            SqlDown::Irreversible => Ok(UnitOutcome::failed(format!(
                "{} does not support migration down.",
                self.version
            ))),
        }
    }
}

fn run_sql(conn: &Connection, sql: &str) -> Result<UnitOutcome> {
    if is_blank_sql(sql) {
        return Ok(UnitOutcome::skipped());
    }
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))?;
    tx.execute_batch(sql)
        .map_err(|e| Error::Database(format!("statement failed: {e}")))?;
    tx.commit()
        .map_err(|e| Error::Database(format!("failed to commit: {e}")))?;
    Ok(UnitOutcome::done())
}

fn is_blank_sql(sql: &str) -> bool {
    sql.lines()
        .map(str::trim)
        .all(|l| l.is_empty() || l.starts_with("--"))
}
