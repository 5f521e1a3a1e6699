use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use modmigrate_common::{Error, ModuleId, Result};
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Durable record of which migrations have been applied to the database.
///
/// One row per `(module, version)`. A row with `apply_time = 0` marks a
/// migration whose `up` was started but never confirmed.
pub struct LedgerStore {
    conn: Mutex<Connection>,
    table: String,
}

/// A persisted ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub module: ModuleId,
    pub version: String,
    pub apply_time: i64,
}

impl LedgerEntry {
    /// Whether the migration's `up` committed.
    pub fn is_confirmed(&self) -> bool {
        self.apply_time > 0
    }
}

impl LedgerStore {
    pub fn open(db_path: &Path, table: &str) -> Result<Self> {
        info!("opening migration ledger at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        Self::with_table(conn, table)
    }

    pub fn in_memory(table: &str) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        Self::with_table(conn, table)
    }

    fn with_table(conn: Connection, table: &str) -> Result<Self> {
        validate_table_name(table)?;
        let store = Self {
            conn: Mutex::new(conn),
            table: table.to_string(),
        };
        store.ensure_table_exists()?;
        Ok(store)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("ledger lock poisoned".into()))
    }

    /// Run `f` against the underlying connection. Migration units execute
    /// through this so they share the ledger's database.
    pub fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.connection()?;
        f(&conn)
    }

    /// Create the ledger table and its indexes if they are missing.
    pub fn ensure_table_exists(&self) -> Result<()> {
        let conn = self.connection()?;
        let exists: bool = conn
            .query_row(
                "SELECT count(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![self.table],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(format!("failed to check ledger table: {e}")))?;

        if exists {
            return Ok(());
        }

        info!("creating table for migration versions {}", self.table);
        let table = &self.table;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS [{table}] (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                module TEXT NOT NULL,
                version TEXT NOT NULL,
                apply_time INTEGER
            );

            CREATE INDEX IF NOT EXISTS [idx_{table}_module] ON [{table}](module);

            CREATE UNIQUE INDEX IF NOT EXISTS [ux_{table}_module_version]
                ON [{table}](module, version);"
        ))
        .map_err(|e| Error::Database(format!("failed to create ledger table: {e}")))?;

        Ok(())
    }

    /// Insert a row with `apply_time = 0` before a migration's `up` runs.
    pub fn record_pending(&self, module: &ModuleId, version: &str) -> Result<()> {
        self.insert(module, version, 0)
    }

    /// Insert a confirmed row without running anything.
    pub fn record_applied(&self, module: &ModuleId, version: &str, time: i64) -> Result<()> {
        self.insert(module, version, time)
    }

    fn insert(&self, module: &ModuleId, version: &str, time: i64) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            &format!(
                "INSERT INTO [{}] (module, version, apply_time) VALUES (?1, ?2, ?3)",
                self.table
            ),
            params![module.as_str(), version, time],
        )
        .map_err(|e| match e.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => Error::Database(format!(
                "ledger already has a row for {version} in module {module}"
            )),
            _ => Error::Database(format!("failed to record {version}: {e}")),
        })?;
        debug!(module = %module, version, time, "ledger row inserted");
        Ok(())
    }

    /// Stamp a pending row as applied.
    pub fn confirm_applied(&self, module: &ModuleId, version: &str, time: i64) -> Result<()> {
        let conn = self.connection()?;
        let updated = conn
            .execute(
                &format!(
                    "UPDATE [{}] SET apply_time = ?1 WHERE module = ?2 AND version = ?3",
                    self.table
                ),
                params![time, module.as_str(), version],
            )
            .map_err(|e| Error::Database(format!("failed to confirm {version}: {e}")))?;

        if updated == 0 {
            return Err(Error::NotFound(format!(
                "no ledger row for {version} in module {module}"
            )));
        }
        Ok(())
    }

    /// Delete a row. Returns whether a row existed.
    pub fn remove(&self, module: &ModuleId, version: &str) -> Result<bool> {
        let conn = self.connection()?;
        let deleted = conn
            .execute(
                &format!(
                    "DELETE FROM [{}] WHERE module = ?1 AND version = ?2",
                    self.table
                ),
                params![module.as_str(), version],
            )
            .map_err(|e| Error::Database(format!("failed to remove {version}: {e}")))?;
        Ok(deleted > 0)
    }

    /// Mark `versions` applied at `time` in one transaction. Pending rows are
    /// stamped, missing rows inserted, confirmed rows left as they are.
    pub fn mark_applied(&self, module: &ModuleId, versions: &[String], time: i64) -> Result<()> {
        let mut conn = self.connection()?;
        let tx = conn
            .transaction()
            .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))?;
        {
            let mut stmt = tx
                .prepare(&format!(
                    "INSERT INTO [{}] (module, version, apply_time) VALUES (?1, ?2, ?3)
                     ON CONFLICT(module, version) DO UPDATE SET apply_time = excluded.apply_time
                     WHERE apply_time IS NULL OR apply_time <= 0",
                    self.table
                ))
                .map_err(|e| Error::Database(format!("failed to prepare mark: {e}")))?;
            for version in versions {
                stmt.execute(params![module.as_str(), version, time])
                    .map_err(|e| Error::Database(format!("failed to mark {version}: {e}")))?;
            }
        }
        tx.commit()
            .map_err(|e| Error::Database(format!("failed to commit mark: {e}")))?;
        debug!(module = %module, count = versions.len(), "ledger rows marked applied");
        Ok(())
    }

    /// Delete the rows for `versions` in one transaction. Returns how many
    /// existed.
    pub fn remove_all(&self, module: &ModuleId, versions: &[String]) -> Result<usize> {
        let mut conn = self.connection()?;
        let tx = conn
            .transaction()
            .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))?;
        let mut deleted = 0;
        {
            let mut stmt = tx
                .prepare(&format!(
                    "DELETE FROM [{}] WHERE module = ?1 AND version = ?2",
                    self.table
                ))
                .map_err(|e| Error::Database(format!("failed to prepare removal: {e}")))?;
            for version in versions {
                deleted += stmt
                    .execute(params![module.as_str(), version])
                    .map_err(|e| Error::Database(format!("failed to remove {version}: {e}")))?;
            }
        }
        tx.commit()
            .map_err(|e| Error::Database(format!("failed to commit removal: {e}")))?;
        Ok(deleted)
    }

    pub fn get(&self, module: &ModuleId, version: &str) -> Result<Option<LedgerEntry>> {
        let conn = self.connection()?;
        conn.query_row(
            &format!(
                "SELECT module, version, apply_time FROM [{}] WHERE module = ?1 AND version = ?2",
                self.table
            ),
            params![module.as_str(), version],
            row_to_entry,
        )
        .optional()
        .map_err(|e| Error::Database(format!("failed to read ledger row: {e}")))
    }

    /// Entries ordered by version descending, optionally for one module.
    /// `limit = None` returns everything.
    pub fn list_all(
        &self,
        module: Option<&ModuleId>,
        limit: Option<usize>,
    ) -> Result<Vec<LedgerEntry>> {
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let sql = match module {
            Some(_) => format!(
                "SELECT module, version, apply_time FROM [{}]
                 WHERE module = ?1
                 ORDER BY version DESC, id DESC
                 LIMIT ?2",
                self.table
            ),
            None => format!(
                "SELECT module, version, apply_time FROM [{}]
                 ORDER BY version DESC, id DESC
                 LIMIT ?1",
                self.table
            ),
        };

        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

        let rows = match module {
            Some(m) => stmt.query_map(params![m.as_str(), limit], row_to_entry),
            None => stmt.query_map(params![limit], row_to_entry),
        }
        .map_err(|e| Error::Database(format!("failed to query ledger: {e}")))?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(
                row.map_err(|e| Error::Database(format!("failed to read ledger row: {e}")))?,
            );
        }
        Ok(entries)
    }

    /// Rows for `module` whose `up` never confirmed, newest first.
    pub fn pending_entries(&self, module: &ModuleId) -> Result<Vec<LedgerEntry>> {
        Ok(self
            .list_all(Some(module), None)?
            .into_iter()
            .filter(|e| !e.is_confirmed())
            .collect())
    }

    /// Distinct modules that have at least one ledger row, in descending order.
    pub fn installed_modules(&self) -> Result<Vec<ModuleId>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT module FROM [{}] GROUP BY module ORDER BY module DESC",
                self.table
            ))
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| Error::Database(format!("failed to query modules: {e}")))?;

        let mut modules = Vec::new();
        for row in rows {
            let name =
                row.map_err(|e| Error::Database(format!("failed to read module row: {e}")))?;
            modules.push(ModuleId::from_string(name));
        }
        Ok(modules)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.connection()?;
        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM [{}]", self.table), [], |row| {
                row.get(0)
            })
            .map_err(|e| Error::Database(format!("failed to count ledger rows: {e}")))?;
        Ok(count as usize)
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerEntry> {
    Ok(LedgerEntry {
        module: ModuleId::from_string(row.get::<_, String>(0)?),
        version: row.get(1)?,
        apply_time: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
    })
}

fn validate_table_name(table: &str) -> Result<()> {
    if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::Config(format!(
            "invalid ledger table name: {table:?}"
        )));
    }
    Ok(())
}
