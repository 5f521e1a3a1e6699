use std::time::Duration;

use modmigrate_common::ModuleId;

use crate::executor::Direction;

/// Progress notifications emitted while migrating.
#[derive(Debug, Clone, Copy)]
pub enum MigrationEvent<'a> {
    UpdatingModule {
        module: &'a ModuleId,
    },
    NoNewMigrations {
        module: &'a ModuleId,
    },
    Started {
        module: &'a ModuleId,
        version: &'a str,
        direction: Direction,
    },
    Finished {
        module: &'a ModuleId,
        version: &'a str,
        direction: Direction,
        elapsed: Duration,
    },
    Failed {
        module: &'a ModuleId,
        version: &'a str,
        direction: Direction,
        elapsed: Duration,
        output: &'a str,
    },
    CheckingPending {
        module: &'a ModuleId,
    },
    Downgrading {
        module: &'a ModuleId,
        version: &'a str,
    },
    DowngradeFailed {
        module: &'a ModuleId,
        version: &'a str,
        error: &'a str,
    },
    NothingToDowngrade {
        module: &'a ModuleId,
    },
}

impl MigrationEvent<'_> {
    /// Whether the event concerns a single unit's execution.
    pub fn is_unit_event(&self) -> bool {
        matches!(
            self,
            Self::Started { .. } | Self::Finished { .. } | Self::Failed { .. }
        )
    }

    /// Plain-text message, without line endings or decoration.
    pub fn describe(&self) -> String {
        match self {
            Self::UpdatingModule { module } => {
                format!("Updating DB of {module} to latest version")
            }
            Self::NoNewMigrations { module } => {
                format!("There are no new migrations for {module}")
            }
            Self::Started {
                version, direction, ..
            } => match direction {
                Direction::Up => format!("applying {version}"),
                Direction::Down => format!("reverting {version}"),
            },
            Self::Finished {
                version,
                direction,
                elapsed,
                ..
            } => match direction {
                Direction::Up => format!("applied {version} (time: {:.3}s)", elapsed.as_secs_f64()),
                Direction::Down => {
                    format!("reverted {version} (time: {:.3}s)", elapsed.as_secs_f64())
                }
            },
            Self::Failed {
                version,
                direction,
                elapsed,
                ..
            } => match direction {
                Direction::Up => format!(
                    "failed to apply {version} (time: {:.3}s)",
                    elapsed.as_secs_f64()
                ),
                Direction::Down => format!(
                    "failed to revert {version} (time: {:.3}s)",
                    elapsed.as_secs_f64()
                ),
            },
            Self::CheckingPending { .. } => "Checking for pending migrations".to_string(),
            Self::Downgrading { module, version } => {
                format!("Downgrade {version} for {module}.")
            }
            Self::DowngradeFailed {
                module,
                version,
                error,
            } => format!("Can't downgrade migration {version} for {module}: {error}"),
            Self::NothingToDowngrade { module } => {
                format!("No need to downgrade migrations for {module}")
            }
        }
    }
}

/// Receives [`MigrationEvent`]s. Presentation (line endings, prefixes,
/// escaping) is up to the implementor.
pub trait Reporter {
    fn report(&mut self, event: &MigrationEvent<'_>);
}

/// Discards every event.
pub struct NullReporter;

impl Reporter for NullReporter {
    fn report(&mut self, _event: &MigrationEvent<'_>) {}
}

/// Keeps event descriptions in memory.
#[derive(Debug, Default)]
pub struct BufferReporter {
    pub lines: Vec<String>,
}

impl Reporter for BufferReporter {
    fn report(&mut self, event: &MigrationEvent<'_>) {
        self.lines.push(event.describe());
    }
}
