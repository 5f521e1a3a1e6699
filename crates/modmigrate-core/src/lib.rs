//! Per-module schema migrations over an append-only ledger.
//!
//! The [`Catalog`] finds migration files on disk, the ledger in
//! `modmigrate-db` records what has been applied, the [`Executor`] runs
//! single units, and the [`Migrator`] composes them into the operations the
//! command line and the web admin expose.

pub mod catalog;
pub mod executor;
pub mod migrator;
pub mod registry;
pub mod reporter;
pub mod unit;
pub mod version;
pub mod web;

pub use catalog::{Catalog, CatalogEntry};
pub use executor::{Direction, Executor, RecoveryFailure, RecoveryReport, UnitReport};
pub use migrator::{Migrator, Plan};
pub use registry::{UnitFactory, UnitRegistry};
pub use reporter::{BufferReporter, MigrationEvent, NullReporter, Reporter};
pub use unit::{MigrationUnit, SqlUnit, UnitOutcome, UnitStatus};
pub use version::{Version, VersionTarget};
pub use web::{AdminOverview, WebReporter};
