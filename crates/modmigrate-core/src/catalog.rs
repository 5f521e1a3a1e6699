use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use modmigrate_common::{Error, ModuleId, Result};
use modmigrate_config::PathsConfig;
use regex::Regex;
use tracing::{debug, info};

use crate::version::Version;

/// File extensions that can hold a migration unit.
pub const UNIT_EXTENSIONS: &[&str] = &["sql", "rs"];

static FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(m\d{6}_\d{6}_.*?)\.([A-Za-z0-9]+)$").expect("catalog file regex")
});

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\w+$").expect("migration name regex"));

/// A migration unit file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub version: Version,
    pub path: PathBuf,
}

impl CatalogEntry {
    pub fn extension(&self) -> &str {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
    }
}

/// Finds migration unit files in per-module directories.
#[derive(Debug, Clone)]
pub struct Catalog {
    core_dir: PathBuf,
    modules_dir: PathBuf,
    subdir: PathBuf,
}

impl Catalog {
    pub fn new(
        core_dir: impl Into<PathBuf>,
        modules_dir: impl Into<PathBuf>,
        subdir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            core_dir: core_dir.into(),
            modules_dir: modules_dir.into(),
            subdir: subdir.into(),
        }
    }

    pub fn from_config(paths: &PathsConfig) -> Self {
        Self::new(&paths.core, &paths.modules, &paths.subdir)
    }

    /// Directory holding the migration files of `module`.
    pub fn migrations_dir(&self, module: &ModuleId) -> PathBuf {
        if module.is_core() {
            self.core_dir.clone()
        } else {
            self.modules_dir.join(module.as_str()).join(&self.subdir)
        }
    }

    /// Whether a directory exists for `module`. The core module always exists;
    /// a directory named after the core label never counts.
    pub fn module_exists(&self, module: &ModuleId) -> bool {
        module.is_core()
            || (!module.is_reserved() && self.modules_dir.join(module.as_str()).is_dir())
    }

    /// All unit files of `module`, sorted by version.
    ///
    /// An unreadable or missing directory means the module has no migrations.
    /// Two files sharing a timestamp are a catalog error.
    pub fn scan(&self, module: &ModuleId) -> Result<Vec<CatalogEntry>> {
        let dir = self.migrations_dir(module);
        let read_dir = match std::fs::read_dir(&dir) {
            Ok(rd) => rd,
            Err(e) => {
                debug!("no migrations for {module} at {}: {e}", dir.display());
                return Ok(Vec::new());
            }
        };

        let mut entries = Vec::new();
        for dir_entry in read_dir {
            let dir_entry = dir_entry?;
            let path = dir_entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|f| f.to_str()) else {
                continue;
            };
            if let Some(entry) = parse_file_name(file_name, &path) {
                entries.push(entry);
            }
        }
        entries.sort_by(|a, b| a.version.cmp(&b.version));
        if let Some(pair) = entries
            .windows(2)
            .find(|w| w[0].version.timestamp() == w[1].version.timestamp())
        {
            return Err(Error::Catalog(format!(
                "duplicate migration {} in {module}: {} and {}",
                pair[0].version.timestamp(),
                pair[0].path.display(),
                pair[1].path.display()
            )));
        }
        Ok(entries)
    }

    /// Units of `module` whose timestamp is not in `applied`, sorted.
    pub fn new_versions(
        &self,
        module: &ModuleId,
        applied: &HashSet<String>,
    ) -> Result<Vec<CatalogEntry>> {
        Ok(self
            .scan(module)?
            .into_iter()
            .filter(|e| !applied.contains(e.version.timestamp()))
            .collect())
    }

    pub fn find(&self, module: &ModuleId, version: &str) -> Result<Option<CatalogEntry>> {
        Ok(self
            .scan(module)?
            .into_iter()
            .find(|e| e.version.as_str() == version))
    }

    /// Write a new SQL migration named `m<now>_<name>.sql` for `module`.
    pub fn create_unit(
        &self,
        module: &ModuleId,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<PathBuf> {
        if !NAME_RE.is_match(name) {
            return Err(Error::Usage(
                "the name of the migration must contain letters, digits and/or underscore characters only"
                    .to_string(),
            ));
        }

        let version = format!("m{}_{name}", now.format("%y%m%d_%H%M%S"));
        let dir = self.migrations_dir(module);
        std::fs::create_dir_all(&dir)?;

        let path = dir.join(format!("{version}.sql"));
        if path.exists() {
            return Err(Error::Catalog(format!(
                "migration file already exists: {}",
                path.display()
            )));
        }

        std::fs::write(&path, unit_template(&version))?;
        info!("created migration {}", path.display());
        Ok(path)
    }
}

fn parse_file_name(file_name: &str, path: &Path) -> Option<CatalogEntry> {
    let caps = FILE_RE.captures(file_name)?;
    if !UNIT_EXTENSIONS.contains(&&caps[2]) {
        return None;
    }
    let version = Version::parse(&caps[1])?;
    Some(CatalogEntry {
        version,
        path: path.to_path_buf(),
    })
}

fn unit_template(version: &str) -> String {
    format!(
        "-- {version}\n\
         -- +up\n\
         \n\
         -- +down\n\
         -- +irreversible\n"
    )
}
