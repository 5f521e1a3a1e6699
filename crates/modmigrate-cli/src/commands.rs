use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, Local};
use modmigrate_common::{Error, ModuleId};
use modmigrate_config::MigratorConfig;
use modmigrate_core::{Migrator, Plan, Reporter, VersionTarget};
use modmigrate_db::HistoryView;

use crate::console::ConsoleReporter;
use crate::prompt::confirm;

/// How many migrations a command should touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    All,
    Count(usize),
}

impl Limit {
    pub fn count(self) -> Option<usize> {
        match self {
            Self::All => None,
            Self::Count(n) => Some(n),
        }
    }
}

impl FromStr for Limit {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        s.parse::<usize>()
            .map(Self::Count)
            .map_err(|_| format!("'{s}' is neither a number nor 'all'"))
    }
}

/// Everything a command needs.
pub struct Session<'a> {
    pub migrator: &'a Migrator,
    pub config: &'a MigratorConfig,
    pub module: ModuleId,
    pub interactive: bool,
}

impl Session<'_> {
    fn reporter(&self) -> ConsoleReporter<std::io::Stdout> {
        ConsoleReporter::stdout()
    }

    /// Roll back interrupted runs before doing anything new.
    fn recover(&self, reporter: &mut dyn Reporter) -> Result<()> {
        let report = self
            .migrator
            .check_for_bad_migration(&self.module, None, reporter)?;
        if report.is_degraded() {
            println!(
                "Warning: {} interrupted migration(s) could not be rolled back.\n",
                report.failed.len()
            );
        }
        Ok(())
    }

    pub fn up(&self, limit: Option<Limit>) -> Result<()> {
        let mut reporter = self.reporter();
        self.recover(&mut reporter)?;

        let mut pending = self.migrator.new_migrations(&self.module)?;
        if pending.is_empty() {
            println!("No new migrations found. Your system is up-to-date.");
            return Ok(());
        }

        let total = pending.len();
        if let Some(n) = limit.and_then(Limit::count).filter(|n| *n > 0) {
            pending.truncate(n);
        }

        if pending.len() == total {
            println!("Total {total} new {} to be applied:", plural(total));
        } else {
            println!(
                "Total {} out of {total} new {} to be applied:",
                pending.len(),
                plural(total)
            );
        }
        print_list(&pending);

        if !confirm(&format!("Apply the above {}?", plural(pending.len())), self.interactive)? {
            return Ok(());
        }
        self.apply(&pending, &mut reporter)
    }

    fn apply(&self, versions: &[String], reporter: &mut dyn Reporter) -> Result<()> {
        let mut applied = 0;
        for version in versions {
            if let Err(e) = self
                .migrator
                .apply_versions(&self.module, std::slice::from_ref(version), reporter)
            {
                println!(
                    "\n{applied} from {} {} applied.",
                    versions.len(),
                    if applied == 1 { "was" } else { "were" }
                );
                println!("Migration failed. The rest of the migrations are canceled.");
                return Err(e.into());
            }
            applied += 1;
        }

        println!(
            "\n{applied} {} {} applied.",
            plural(applied),
            if applied == 1 { "was" } else { "were" }
        );
        println!("Migrated up successfully.");
        Ok(())
    }

    pub fn down(&self, limit: Option<Limit>) -> Result<()> {
        let steps = self.steps(limit.unwrap_or(Limit::Count(1)))?;
        let versions = self.migrator.revert_candidates(&self.module, steps)?;
        if versions.is_empty() {
            println!("No migration has been done before.");
            return Ok(());
        }

        println!(
            "Total {} {} to be reverted:",
            versions.len(),
            plural(versions.len())
        );
        print_list(&versions);

        if !confirm(&format!("Revert the above {}?", plural(versions.len())), self.interactive)? {
            return Ok(());
        }
        self.revert(&versions, &mut self.reporter())
    }

    fn revert(&self, versions: &[String], reporter: &mut dyn Reporter) -> Result<()> {
        let mut reverted = 0;
        for version in versions {
            if let Err(e) = self
                .migrator
                .revert_versions(&self.module, std::slice::from_ref(version), reporter)
            {
                println!(
                    "\n{reverted} from {} {} reverted.",
                    versions.len(),
                    if reverted == 1 { "was" } else { "were" }
                );
                println!("Migration failed. The rest of the migrations are canceled.");
                return Err(e.into());
            }
            reverted += 1;
        }

        println!(
            "\n{reverted} {} {} reverted.",
            plural(reverted),
            if reverted == 1 { "was" } else { "were" }
        );
        println!("Migrated down successfully.");
        Ok(())
    }

    pub fn redo(&self, limit: Option<Limit>) -> Result<()> {
        let mut reporter = self.reporter();
        self.recover(&mut reporter)?;

        let steps = self.steps(limit.unwrap_or(Limit::Count(1)))?;
        let versions = self.migrator.revert_candidates(&self.module, steps)?;
        if versions.is_empty() {
            println!("No migration has been done before.");
            return Ok(());
        }

        println!(
            "Total {} {} to be redone:",
            versions.len(),
            plural(versions.len())
        );
        print_list(&versions);

        if !confirm(&format!("Redo the above {}?", plural(versions.len())), self.interactive)? {
            return Ok(());
        }

        if let Err(e) = self
            .migrator
            .redo_versions(&self.module, &versions, &mut reporter)
        {
            println!("\nMigration failed. The rest of the migrations are canceled.");
            return Err(e.into());
        }
        println!(
            "\n{} {} redone.",
            versions.len(),
            if versions.len() == 1 { "migration was" } else { "migrations were" }
        );
        println!("Migration redone successfully.");
        Ok(())
    }

    pub fn to(&self, version: &str) -> Result<()> {
        let target = VersionTarget::parse(version)?;
        let mut reporter = self.reporter();
        self.recover(&mut reporter)?;

        match self.migrator.plan_target(&self.module, &target)? {
            Plan::AlreadyAt => {
                println!("Already at '{}'. Nothing needs to be done.", target.original());
                Ok(())
            }
            Plan::Up(versions) => {
                println!(
                    "Total {} new {} to be applied:",
                    versions.len(),
                    plural(versions.len())
                );
                print_list(&versions);
                if !confirm(&format!("Apply the above {}?", plural(versions.len())), self.interactive)? {
                    return Ok(());
                }
                self.apply(&versions, &mut reporter)
            }
            Plan::Down(versions) => {
                println!(
                    "Total {} {} to be reverted:",
                    versions.len(),
                    plural(versions.len())
                );
                print_list(&versions);
                if !confirm(&format!("Revert the above {}?", plural(versions.len())), self.interactive)? {
                    return Ok(());
                }
                self.revert(&versions, &mut reporter)
            }
        }
    }

    pub fn mark(&self, version: &str) -> Result<()> {
        let target = VersionTarget::parse(version)?;
        let plan = self.migrator.plan_target(&self.module, &target)?;
        let question = match &plan {
            Plan::AlreadyAt => {
                println!("Already at '{}'. Nothing needs to be done.", target.original());
                return Ok(());
            }
            Plan::Up(versions) | Plan::Down(versions) => format!(
                "Set migration history at {}? ({} {} affected)",
                target.original(),
                versions.len(),
                plural(versions.len())
            ),
        };

        if !confirm(&question, self.interactive)? {
            return Ok(());
        }
        self.migrator.mark_plan(&self.module, &plan)?;
        println!(
            "The migration history is set at {}.\nNo actual migration was performed.",
            target.original()
        );
        Ok(())
    }

    /// `history [module] [N|all]`, in either order.
    pub fn history(&self, args: &[String]) -> Result<()> {
        let (module, limit) = self.history_args(args)?;
        let limit = limit.unwrap_or(Limit::Count(10)).count().filter(|n| *n > 0);

        let entries: Vec<(Option<ModuleId>, String, i64)> =
            match self.migrator.history(module.as_ref(), limit, false)? {
                HistoryView::Module(items) => items
                    .into_iter()
                    .map(|i| (None, i.version, i.apply_time))
                    .collect(),
                HistoryView::Flat(rows) => rows
                    .into_iter()
                    .map(|e| (Some(e.module), e.version, e.apply_time))
                    .collect(),
                HistoryView::Grouped(_) => Vec::new(),
            };

        if entries.is_empty() {
            println!("No migration has been done before.");
            return Ok(());
        }

        let n = entries.len();
        match limit {
            Some(_) => println!("Showing the last {n} applied {}:", plural(n)),
            None => println!("Total {n} {} been applied before:", if n == 1 { "migration has" } else { "migrations have" }),
        }
        for (module, version, apply_time) in entries {
            let line = format!("    ({}) {version}", format_time(apply_time));
            match module {
                Some(m) => println!("{line} [{m}]"),
                None => println!("{line}"),
            }
        }
        Ok(())
    }

    fn history_args(&self, args: &[String]) -> Result<(Option<ModuleId>, Option<Limit>)> {
        let mut module = None;
        let mut limit = None;
        for arg in args {
            if let Ok(parsed) = arg.parse::<Limit>() {
                limit = Some(parsed);
                continue;
            }
            let candidate = ModuleId::from(arg.as_str());
            if !self.migrator.catalog().module_exists(&candidate) {
                return Err(Error::Usage(format!("unknown module or limit: {arg}")).into());
            }
            module = Some(candidate);
        }
        // an explicit --module applies when no positional module is given
        if module.is_none() && !self.module.is_core() {
            module = Some(self.module.clone());
        }
        Ok((module, limit))
    }

    pub fn new_list(&self, limit: Option<Limit>) -> Result<()> {
        let pending = self.migrator.new_migrations(&self.module)?;
        if pending.is_empty() {
            println!("No new migrations found. Your system is up-to-date.");
            return Ok(());
        }

        let total = pending.len();
        let shown = match limit.unwrap_or(Limit::Count(10)).count().filter(|n| *n > 0) {
            Some(n) if n < total => {
                println!("Showing {n} out of {total} new {}:", plural(total));
                &pending[..n]
            }
            _ => {
                println!("Found {total} new {}:", plural(total));
                &pending[..]
            }
        };
        print_list(shown);
        Ok(())
    }

    pub fn create(&self, name: &str) -> Result<()> {
        let question = format!(
            "Create new migration '{name}' in {}?",
            self.migrator.catalog().migrations_dir(&self.module).display()
        );
        if !confirm(&question, self.interactive)? {
            return Ok(());
        }
        let path = self.migrator.create(&self.module, name)?;
        println!("New migration created successfully: {}", path.display());
        Ok(())
    }

    /// Run the recovery pass alone. Fails when a rollback failed.
    pub fn check(&self, base: Option<&str>) -> Result<()> {
        let report = self.migrator.check_for_bad_migration(
            &self.module,
            base,
            &mut self.reporter(),
        )?;

        for version in &report.reverted {
            println!("Rolled back interrupted migration {version}.");
        }
        if let Some(failure) = report.failed.first() {
            for f in &report.failed {
                println!("Could not roll back {}: {}", f.version, f.error);
            }
            return Err(Error::Execution {
                module: self.module.label().to_string(),
                version: failure.version.clone(),
                output: failure.error.clone(),
                elapsed: std::time::Duration::ZERO,
            }
            .into());
        }
        if report.is_clean() {
            println!("No interrupted migrations found.");
        }
        Ok(())
    }

    /// Pending migrations across the core and every enabled module.
    pub fn updates(&self) -> Result<()> {
        let modules: Vec<ModuleId> = std::iter::once(ModuleId::core())
            .chain(
                self.config
                    .enabled_modules()
                    .into_iter()
                    .map(ModuleId::from_string),
            )
            .collect();

        let updates = self.migrator.diff_pending(&modules)?;
        if updates.is_empty() {
            println!("All modules are up-to-date.");
            return Ok(());
        }
        for (module, versions) in &updates {
            println!("{module}: {} new {}", versions.len(), plural(versions.len()));
            print_list(versions);
        }
        Ok(())
    }

    pub fn modules(&self) -> Result<()> {
        let installed = self.migrator.modules_with_db_installed()?;
        if installed.is_empty() {
            println!("No module has applied migrations yet.");
        } else {
            println!("Modules with applied migrations:");
            for module in &installed {
                println!("    {module}");
            }
        }

        if !self.config.modules.is_empty() {
            println!("\nConfigured modules:");
            for (name, module) in &self.config.modules {
                let state = if module.enabled { "enabled" } else { "disabled" };
                println!("    {name} ({state})");
            }
        }
        Ok(())
    }

    fn steps(&self, limit: Limit) -> Result<usize> {
        Ok(match limit {
            Limit::Count(n) => n,
            Limit::All => self
                .migrator
                .ledger()
                .list_all(Some(&self.module), None)?
                .len()
                .max(1),
        })
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "migration" } else { "migrations" }
}

fn print_list(versions: &[String]) {
    for version in versions {
        println!("    {version}");
    }
    println!();
}

fn format_time(apply_time: i64) -> String {
    if apply_time <= 0 {
        return "pending".to_string();
    }
    DateTime::from_timestamp(apply_time, 0)
        .map(|t| {
            t.with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|| "pending".to_string())
}
