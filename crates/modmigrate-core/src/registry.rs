use std::collections::HashMap;

use modmigrate_common::{Error, ModuleId, Result};
use tracing::debug;

use crate::catalog::Catalog;
use crate::unit::{MigrationUnit, SqlUnit};
use crate::version::Version;

pub type UnitFactory = Box<dyn Fn() -> Box<dyn MigrationUnit> + Send + Sync>;

/// Maps `(module, version)` to the code implementing that migration.
///
/// Units compiled into the host program are registered here. Catalog files
/// without a registration fall back to [`SqlUnit`] when they are `.sql`.
#[derive(Default)]
pub struct UnitRegistry {
    factories: HashMap<(ModuleId, String), UnitFactory>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, module: ModuleId, version: &str, factory: F) -> Result<&mut Self>
    where
        F: Fn() -> Box<dyn MigrationUnit> + Send + Sync + 'static,
    {
        if Version::parse(version).is_none() {
            return Err(Error::Config(format!(
                "invalid migration version name: {version}"
            )));
        }
        self.factories
            .insert((module, version.to_string()), Box::new(factory));
        Ok(self)
    }

    pub fn contains(&self, module: &ModuleId, version: &str) -> bool {
        self.factories
            .contains_key(&(module.clone(), version.to_string()))
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Instantiate the unit for `version` of `module`.
    pub fn resolve(
        &self,
        catalog: &Catalog,
        module: &ModuleId,
        version: &str,
    ) -> Result<Box<dyn MigrationUnit>> {
        if let Some(factory) = self.factories.get(&(module.clone(), version.to_string())) {
            debug!(module = %module, version, "resolved registered unit");
            return Ok(factory());
        }

        let entry = catalog.find(module, version)?.ok_or_else(|| {
            Error::NotFound(format!(
                "migration {version} not found for module {module} in {}",
                catalog.migrations_dir(module).display()
            ))
        })?;

        match entry.extension() {
            "sql" => {
                debug!(module = %module, version, "resolved sql unit");
                Ok(Box::new(SqlUnit::from_file(version, &entry.path)?))
            }
            other => Err(Error::Config(format!(
                "no unit registered for {version} of module {module} (.{other} file)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use super::*;
    use crate::unit::{UnitOutcome, UnitStatus};

    struct Noop;

    impl MigrationUnit for Noop {
        fn up(&self, _conn: &Connection) -> Result<UnitOutcome> {
            Ok(UnitOutcome::skipped())
        }

        fn down(&self, _conn: &Connection) -> Result<UnitOutcome> {
            Ok(UnitOutcome::skipped())
        }
    }

    fn catalog(root: &std::path::Path) -> Catalog {
        Catalog::new(root.join("core"), root.join("modules"), "install/migrations")
    }

    #[test]
    fn registered_units_take_precedence() {
        let root = tempfile::tempdir().unwrap();
        let mut registry = UnitRegistry::new();
        registry
            .register(ModuleId::from("blog"), "m240101_100000_init", || Box::new(Noop))
            .unwrap();
        assert!(registry.contains(&ModuleId::from("blog"), "m240101_100000_init"));

        let conn = Connection::open_in_memory().unwrap();
        let unit = registry
            .resolve(&catalog(root.path()), &ModuleId::from("blog"), "m240101_100000_init")
            .unwrap();
        assert_eq!(unit.up(&conn).unwrap().status, UnitStatus::Skipped);
    }

    #[test]
    fn sql_files_resolve_without_registration() {
        let root = tempfile::tempdir().unwrap();
        let cat = catalog(root.path());
        let dir = cat.migrations_dir(&ModuleId::core());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("m240101_100000_t.sql"),
            "-- +up\nCREATE TABLE t (id INTEGER);\n-- +down\nDROP TABLE t;\n",
        )
        .unwrap();

        let registry = UnitRegistry::new();
        let unit = registry
            .resolve(&cat, &ModuleId::core(), "m240101_100000_t")
            .unwrap();
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(unit.up(&conn).unwrap().status, UnitStatus::Done);
    }

    #[test]
    fn unregistered_rust_unit_is_config_error() {
        let root = tempfile::tempdir().unwrap();
        let cat = catalog(root.path());
        let dir = cat.migrations_dir(&ModuleId::from("blog"));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("m240101_100000_init.rs"), "").unwrap();

        let err = UnitRegistry::new()
            .resolve(&cat, &ModuleId::from("blog"), "m240101_100000_init")
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn unknown_version_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let err = UnitRegistry::new()
            .resolve(&catalog(root.path()), &ModuleId::from("blog"), "m240101_100000_x")
            .err()
            .unwrap();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn register_rejects_malformed_versions() {
        let mut registry = UnitRegistry::new();
        assert!(registry.register(ModuleId::core(), "init", || Box::new(Noop)).is_err());
        assert!(registry.is_empty());
    }
}
