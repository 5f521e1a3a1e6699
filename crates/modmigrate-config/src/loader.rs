use std::path::{Path, PathBuf};

use modmigrate_common::{Error, Result};
use tracing::{debug, info};

use crate::model::MigratorConfig;

pub const CONFIG_ENV: &str = "MODMIGRATE_CONFIG";
pub const DB_ENV: &str = "MODMIGRATE_DB";
pub const MODULES_DIR_ENV: &str = "MODMIGRATE_MODULES_DIR";
pub const CORE_DIR_ENV: &str = "MODMIGRATE_CORE_DIR";

/// Resolves and parses the migrator configuration file.
pub struct ConfigLoader {
    explicit_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new(explicit_path: Option<PathBuf>) -> Self {
        Self { explicit_path }
    }

    /// Default config directory: `~/.modmigrate`.
    pub fn default_config_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".modmigrate")
    }

    /// Load the configuration and apply environment overrides.
    ///
    /// An explicitly requested file (flag or `MODMIGRATE_CONFIG`) must exist.
    /// A missing default file yields the built-in defaults.
    pub fn load(&self) -> Result<MigratorConfig> {
        let requested = self
            .explicit_path
            .clone()
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from));

        let mut config = match requested {
            Some(path) => {
                if !path.is_file() {
                    return Err(Error::Config(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                load_file(&path)?
            }
            None => {
                let path = Self::default_config_dir().join("config.yml");
                if path.is_file() {
                    load_file(&path)?
                } else {
                    debug!("no config at {}, using defaults", path.display());
                    MigratorConfig::default()
                }
            }
        };

        apply_env_overrides(&mut config, |key| std::env::var(key).ok());
        Ok(config)
    }
}

/// Parse a config file, choosing the format from its extension.
pub fn load_file(path: &Path) -> Result<MigratorConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let config = match ext {
        "yml" | "yaml" => serde_yaml::from_str(&contents)
            .map_err(|e| Error::Config(format!("YAML parse error: {e}")))?,
        "toml" => toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("TOML parse error: {e}")))?,
        other => {
            return Err(Error::Config(format!(
                "unsupported config extension: {other}"
            )));
        }
    };

    info!("config loaded from {}", path.display());
    Ok(config)
}

/// Overlay environment variables onto a loaded config.
pub fn apply_env_overrides<F>(config: &mut MigratorConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(db) = lookup(DB_ENV).filter(|v| !v.is_empty()) {
        config.database.path = Some(PathBuf::from(db));
    }
    if let Some(dir) = lookup(MODULES_DIR_ENV).filter(|v| !v.is_empty()) {
        config.paths.modules = PathBuf::from(dir);
    }
    if let Some(dir) = lookup(CORE_DIR_ENV).filter(|v| !v.is_empty()) {
        config.paths.core = PathBuf::from(dir);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn loads_yaml_and_toml_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let yaml = dir.path().join("config.yml");
        std::fs::write(&yaml, "cache:\n  ttl_secs: 60\n").unwrap();
        assert_eq!(load_file(&yaml).unwrap().cache.ttl_secs, 60);

        let toml_path = dir.path().join("config.toml");
        std::fs::write(&toml_path, "[database]\ntable = \"tbl_migration\"\n").unwrap();
        assert_eq!(
            load_file(&toml_path).unwrap().database.table,
            "tbl_migration"
        );
    }

    #[test]
    fn rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ini");
        std::fs::write(&path, "x=1").unwrap();
        let err = load_file(&path).unwrap_err();
        assert!(err.to_string().contains("unsupported config extension"));
    }

    #[test]
    fn explicit_missing_file_is_config_error() {
        let loader = ConfigLoader::new(Some(PathBuf::from("/definitely/not/here.yml")));
        let err = loader.load().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn env_overrides_replace_paths() {
        let vars: HashMap<&str, &str> = [
            (DB_ENV, "/tmp/ledger.db"),
            (MODULES_DIR_ENV, "/srv/app/modules"),
            (CORE_DIR_ENV, ""),
        ]
        .into_iter()
        .collect();

        let mut config = MigratorConfig::default();
        apply_env_overrides(&mut config, |k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.database.path, Some(PathBuf::from("/tmp/ledger.db")));
        assert_eq!(config.paths.modules, PathBuf::from("/srv/app/modules"));
        // empty values are ignored
        assert_eq!(config.paths.core, PathBuf::from("migrations"));
    }
}
