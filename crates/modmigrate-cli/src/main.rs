mod banner;
mod commands;
mod console;
mod prompt;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use modmigrate_common::{Error, ModuleId};
use modmigrate_config::{ConfigLoader, MigratorConfig};
use modmigrate_core::{Migrator, UnitRegistry};
use modmigrate_db::{LedgerStore, MemoryCache};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::commands::{Limit, Session};

#[derive(Parser, Debug)]
#[command(
    name = "modmigrate",
    version,
    about = "Apply, revert and inspect per-module schema migrations"
)]
struct Cli {
    /// Config file (YAML or TOML). Defaults to ~/.modmigrate/config.yml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Module to operate on. Omit for the core migrations
    #[arg(short, long, global = true)]
    module: Option<String>,

    /// Answer yes to every confirmation
    #[arg(short, long, global = true)]
    yes: bool,

    /// Ask before changing anything (overrides the config file)
    #[arg(long, global = true, action = clap::ArgAction::Set)]
    interactive: Option<bool>,

    /// Log at info level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply new migrations (all by default)
    Up { limit: Option<Limit> },
    /// Revert the most recent migrations (one by default)
    Down { limit: Option<Limit> },
    /// Revert and re-apply the most recent migrations (one by default)
    Redo { limit: Option<Limit> },
    /// Migrate up or down to the given version
    To { version: String },
    /// Set the migration history to the given version without running code
    Mark { version: String },
    /// Show applied migrations: `history [module] [N|all]`
    History { args: Vec<String> },
    /// List migrations not applied yet
    New { limit: Option<Limit> },
    /// Write a new SQL migration file
    Create { name: String },
    /// Roll back migrations left half-applied by an interrupted run
    Check {
        /// Base migration to roll back when the module has no ledger rows
        #[arg(long)]
        base: Option<String>,
    },
    /// Show pending migrations for the core and every enabled module
    Updates,
    /// List modules with applied migrations
    Modules,
}

impl Command {
    /// Commands that change the database get the header.
    fn is_mutating(&self) -> bool {
        matches!(
            self,
            Self::Up { .. }
                | Self::Down { .. }
                | Self::Redo { .. }
                | Self::To { .. }
                | Self::Mark { .. }
        )
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    let _ = dotenvy::dotenv();
    init_tracing(cli.verbose, cli.log_json);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = exit_code(&e);
            debug!("command failed: {e:?}");
            eprintln!("Error: {e:#}");
            ExitCode::from(code)
        }
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

/// 2 for migration code that failed, 1 for everything else.
fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<Error>() {
        Some(e) if e.is_execution_failure() => 2,
        _ => 1,
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = ConfigLoader::new(cli.config.clone())
        .load()
        .context("failed to load configuration")?;

    let db_path = database_path(&config);
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let table = config.database.ledger_table();
    debug!("opening ledger {} in {}", table, db_path.display());
    let ledger = LedgerStore::open(&db_path, &table)?;

    let migrator = Migrator::from_config(
        &config,
        UnitRegistry::new(),
        Arc::new(ledger),
        Arc::new(MemoryCache::new()),
    );

    let module = cli
        .module
        .as_deref()
        .map(ModuleId::from)
        .unwrap_or_else(ModuleId::core);
    check_module_name(&module)?;
    if !module.is_core() && !migrator.catalog().module_exists(&module) {
        return Err(Error::Usage(format!("module '{module}' does not exist")).into());
    }

    let interactive = !cli.yes && cli.interactive.unwrap_or(config.interactive);
    if cli.command.is_mutating() && interactive {
        banner::print_header(&db_path, &table, &module);
    }

    let session = Session {
        migrator: &migrator,
        config: &config,
        module,
        interactive,
    };

    match cli.command {
        Command::Up { limit } => session.up(limit),
        Command::Down { limit } => session.down(limit),
        Command::Redo { limit } => session.redo(limit),
        Command::To { version } => session.to(&version),
        Command::Mark { version } => session.mark(&version),
        Command::History { args } => session.history(&args),
        Command::New { limit } => session.new_list(limit),
        Command::Create { name } => session.create(&name),
        Command::Check { base } => session.check(base.as_deref()),
        Command::Updates => session.updates(),
        Command::Modules => session.modules(),
    }
}

/// `all` labels the core module in history output, so no module may use it.
fn check_module_name(module: &ModuleId) -> Result<(), Error> {
    if module.is_reserved() {
        return Err(Error::Usage(format!(
            "'{}' is reserved for the core migrations; omit --module instead",
            module.as_str()
        )));
    }
    Ok(())
}

fn database_path(config: &MigratorConfig) -> PathBuf {
    config
        .database
        .path
        .clone()
        .unwrap_or_else(|| default_database_path(&ConfigLoader::default_config_dir()))
}

fn default_database_path(config_dir: &Path) -> PathBuf {
    config_dir.join("modmigrate.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subcommands_with_global_flags() {
        let cli = Cli::try_parse_from(["modmigrate", "up", "3", "-m", "blog", "--yes"]).unwrap();
        assert_eq!(cli.module.as_deref(), Some("blog"));
        assert!(cli.yes);
        assert!(matches!(cli.command, Command::Up { limit: Some(Limit::Count(3)) }));
        assert!(cli.command.is_mutating());

        let cli = Cli::try_parse_from(["modmigrate", "history", "blog", "all"]).unwrap();
        match cli.command {
            Command::History { args } => assert_eq!(args, vec!["blog", "all"]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_limit() {
        assert!(Cli::try_parse_from(["modmigrate", "down", "lots"]).is_err());
    }

    #[test]
    fn execution_failures_exit_with_two() {
        let err: anyhow::Error = Error::Execution {
            module: "blog".into(),
            version: "m240101_100000_init".into(),
            output: String::new(),
            elapsed: std::time::Duration::ZERO,
        }
        .into();
        assert_eq!(exit_code(&err), 2);

        let err: anyhow::Error = Error::Usage("bad".into()).into();
        assert_eq!(exit_code(&err), 1);

        let err = anyhow::Error::from(Error::NotFound("x".into())).context("while planning");
        assert_eq!(exit_code(&err), 1);
    }

    #[test]
    fn core_label_is_not_a_module_name() {
        let err = check_module_name(&ModuleId::from("all")).unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
        assert!(check_module_name(&ModuleId::from("blog")).is_ok());
        assert!(check_module_name(&ModuleId::core()).is_ok());
    }

    #[test]
    fn database_defaults_into_config_dir() {
        let config = MigratorConfig::default();
        assert!(config.database.path.is_none());
        assert_eq!(
            default_database_path(Path::new("/home/u/.modmigrate")),
            PathBuf::from("/home/u/.modmigrate/modmigrate.db")
        );
    }
}
