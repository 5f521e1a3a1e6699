use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use modmigrate_common::{ModuleId, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::Cache;
use crate::ledger::{LedgerEntry, LedgerStore};

pub const HISTORY_KEY: &str = "migration_history";

pub const TAG_HISTORY: &str = "migration_history";
pub const TAG_INSTALLED_MODULES: &str = "installed_modules";
pub const TAG_MODULES_DISABLED: &str = "modules_disabled";

/// One applied (or pending) version as shown in history listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub version: String,
    pub apply_time: i64,
}

/// Ledger rows grouped by module, each list newest first.
///
/// The cached snapshot is keyed by the raw module name (empty for core);
/// [`HistoryCache::grouped_history`] re-keys it by display label.
pub type GroupedHistory = BTreeMap<String, Vec<HistoryItem>>;

/// Result of [`HistoryCache::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryView {
    /// History of the requested module.
    Module(Vec<HistoryItem>),
    /// Every module's entries in one list, newest first.
    Flat(Vec<LedgerEntry>),
    /// Every module's entries, grouped.
    Grouped(GroupedHistory),
}

/// Read-through cache of the migration ledger.
///
/// Only one shape is cached: the whole ledger grouped by module. Limits and
/// module filters are applied in memory after retrieval. The cache is not
/// write-through; whoever mutates the ledger must call [`HistoryCache::clear`].
pub struct HistoryCache {
    ledger: Arc<LedgerStore>,
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl HistoryCache {
    pub fn new(ledger: Arc<LedgerStore>, cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self { ledger, cache, ttl }
    }

    pub fn ledger(&self) -> &Arc<LedgerStore> {
        &self.ledger
    }

    /// The grouped ledger keyed by raw module name, from cache when possible.
    pub fn snapshot(&self) -> Result<GroupedHistory> {
        if let Some(value) = self.cache.get(HISTORY_KEY)? {
            match serde_json::from_value::<GroupedHistory>(value) {
                Ok(grouped) => return Ok(grouped),
                Err(e) => warn!("discarding unreadable cached history: {e}"),
            }
        }

        debug!("history cache miss, reading ledger");
        let grouped = group_by(self.ledger.list_all(None, None)?, |m| m.as_str());
        self.cache.set(
            HISTORY_KEY,
            serde_json::to_value(&grouped)?,
            self.ttl,
            &[TAG_HISTORY, TAG_INSTALLED_MODULES, TAG_MODULES_DISABLED],
        )?;
        Ok(grouped)
    }

    /// Query the history.
    ///
    /// With a module, that module's list (empty when it has no rows).
    /// Without one, either the grouped mapping (`all = true`) or a single
    /// list with the module injected into each entry.
    pub fn get(
        &self,
        module: Option<&ModuleId>,
        limit: Option<usize>,
        all: bool,
    ) -> Result<HistoryView> {
        match module {
            Some(m) => Ok(HistoryView::Module(self.module_history(m, limit)?)),
            None if all => Ok(HistoryView::Grouped(self.grouped_history(limit)?)),
            None => Ok(HistoryView::Flat(self.flat_history(limit)?)),
        }
    }

    pub fn module_history(
        &self,
        module: &ModuleId,
        limit: Option<usize>,
    ) -> Result<Vec<HistoryItem>> {
        let mut grouped = self.snapshot()?;
        let mut items = grouped.remove(module.as_str()).unwrap_or_default();
        if let Some(limit) = limit {
            items.truncate(limit);
        }
        Ok(items)
    }

    pub fn flat_history(&self, limit: Option<usize>) -> Result<Vec<LedgerEntry>> {
        let grouped = self.snapshot()?;
        let mut entries: Vec<LedgerEntry> = grouped
            .into_iter()
            .flat_map(|(name, items)| {
                let module = ModuleId::from_string(name);
                items.into_iter().map(move |item| LedgerEntry {
                    module: module.clone(),
                    version: item.version,
                    apply_time: item.apply_time,
                })
            })
            .collect();
        entries.sort_by(|a, b| b.version.cmp(&a.version));
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    /// Grouped history. `limit` caps the total number of entries, taking
    /// the newest versions across every module before grouping.
    pub fn grouped_history(&self, limit: Option<usize>) -> Result<GroupedHistory> {
        let Some(limit) = limit else {
            return Ok(relabel(self.snapshot()?));
        };
        Ok(group_by(self.flat_history(Some(limit))?, |m| m.label()))
    }

    /// Drop the cached history after a ledger mutation.
    pub fn clear(&self) -> Result<()> {
        self.cache.invalidate_tag(TAG_HISTORY)?;
        Ok(())
    }

    /// Drop cached data that depends on module install or enable state.
    pub fn invalidate_module_state(&self) -> Result<()> {
        self.cache.invalidate_tag(TAG_INSTALLED_MODULES)?;
        self.cache.invalidate_tag(TAG_MODULES_DISABLED)?;
        Ok(())
    }
}

fn group_by(entries: Vec<LedgerEntry>, key: impl Fn(&ModuleId) -> &str) -> GroupedHistory {
    let mut grouped = GroupedHistory::new();
    for entry in entries {
        grouped
            .entry(key(&entry.module).to_string())
            .or_default()
            .push(HistoryItem {
                version: entry.version,
                apply_time: entry.apply_time,
            });
    }
    grouped
}

fn relabel(grouped: GroupedHistory) -> GroupedHistory {
    grouped
        .into_iter()
        .map(|(name, items)| (ModuleId::from_string(name).label().to_string(), items))
        .collect()
}
