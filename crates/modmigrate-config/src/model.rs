use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level migrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigratorConfig {
    pub database: DatabaseConfig,
    pub paths: PathsConfig,
    pub cache: CacheConfig,
    pub history: HistoryConfig,
    /// Installed modules and whether each is enabled.
    pub modules: BTreeMap<String, ModuleConfig>,
    /// Ask for confirmation before mutating commands.
    pub interactive: bool,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            paths: PathsConfig::default(),
            cache: CacheConfig::default(),
            history: HistoryConfig::default(),
            modules: BTreeMap::new(),
            interactive: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
    pub table_prefix: String,
    pub table: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            table_prefix: String::new(),
            table: "migrations".to_string(),
        }
    }
}

impl DatabaseConfig {
    /// Ledger table name with the prefix applied.
    pub fn ledger_table(&self) -> String {
        format!("{}{}", self.table_prefix, self.table)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Migrations directory of the core (unnamed) module.
    pub core: PathBuf,
    /// Root directory holding one directory per module.
    pub modules: PathBuf,
    /// Migrations directory inside each module directory.
    pub subdir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            core: PathBuf::from("migrations"),
            modules: PathBuf::from("modules"),
            subdir: PathBuf::from("install/migrations"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 3600 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Number of entries shown by the admin overview.
    pub default_limit: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { default_limit: 20 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl MigratorConfig {
    /// Names of the modules marked enabled, in name order.
    pub fn enabled_modules(&self) -> Vec<String> {
        self.modules
            .iter()
            .filter(|(_, m)| m.enabled)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

fn default_true() -> bool {
    true
}
