use std::collections::BTreeMap;

use modmigrate_common::{ModuleId, Result};
use modmigrate_config::MigratorConfig;
use modmigrate_db::{GroupedHistory, HistoryView};
use serde::Serialize;

use crate::migrator::Migrator;
use crate::reporter::{MigrationEvent, Reporter};

/// Collects progress as HTML lines for an admin page.
#[derive(Debug, Default)]
pub struct WebReporter {
    lines: Vec<String>,
}

impl WebReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// All lines, each terminated by `<br />`.
    pub fn render(&self) -> String {
        self.lines
            .iter()
            .map(|line| format!("{line}<br />"))
            .collect()
    }
}

impl Reporter for WebReporter {
    fn report(&mut self, event: &MigrationEvent<'_>) {
        self.lines.push(escape_html(&event.describe()));
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// What the admin dashboard shows about migrations.
#[derive(Debug, Clone, Serialize)]
pub struct AdminOverview {
    /// Pending versions per enabled module that has any.
    pub updates: BTreeMap<String, Vec<String>>,
    /// Recent history grouped by module.
    pub history: GroupedHistory,
    /// Modules that have ledger rows.
    pub installed: Vec<String>,
}

impl AdminOverview {
    pub fn build(migrator: &Migrator, config: &MigratorConfig) -> Result<Self> {
        let modules: Vec<ModuleId> = config
            .enabled_modules()
            .into_iter()
            .map(ModuleId::from_string)
            .collect();

        let updates = migrator
            .diff_pending(&modules)?
            .into_iter()
            .map(|(module, versions)| (module.label().to_string(), versions))
            .collect();

        let history = match migrator.history(None, Some(config.history.default_limit), true)? {
            HistoryView::Grouped(grouped) => grouped,
            _ => GroupedHistory::new(),
        };

        let installed = migrator
            .modules_with_db_installed()?
            .iter()
            .map(|m| m.label().to_string())
            .collect();

        Ok(Self {
            updates,
            history,
            installed,
        })
    }

    pub fn has_updates(&self) -> bool {
        !self.updates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use modmigrate_config::ModuleConfig;
    use modmigrate_db::{LedgerStore, MemoryCache};

    use super::*;
    use crate::catalog::Catalog;
    use crate::registry::UnitRegistry;

    #[test]
    fn web_reporter_escapes_and_terminates_lines() {
        let blog = ModuleId::from("<blog>");
        let mut reporter = WebReporter::new();
        reporter.report(&MigrationEvent::CheckingPending { module: &blog });
        reporter.report(&MigrationEvent::NothingToDowngrade { module: &blog });

        assert_eq!(reporter.lines().len(), 2);
        assert_eq!(
            reporter.render(),
            "Checking for pending migrations<br />\
             No need to downgrade migrations for &lt;blog&gt;<br />"
        );
    }

    #[test]
    fn overview_lists_updates_and_history() {
        let root = tempfile::tempdir().unwrap();
        let mut config = MigratorConfig::default();
        config.paths.core = root.path().join("core");
        config.paths.modules = root.path().join("modules");
        config
            .modules
            .insert("blog".to_string(), ModuleConfig { enabled: true });
        config
            .modules
            .insert("news".to_string(), ModuleConfig { enabled: false });

        let migrator = Migrator::new(
            Catalog::from_config(&config.paths),
            UnitRegistry::new(),
            Arc::new(LedgerStore::in_memory("migrations").unwrap()),
            Arc::new(MemoryCache::new()),
            Duration::from_secs(60),
        );
        for module in ["blog", "news"] {
            let dir = migrator
                .catalog()
                .migrations_dir(&ModuleId::from(module));
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("m240101_000000_init.sql"), "-- +up\n-- +down\n").unwrap();
        }

        let overview = AdminOverview::build(&migrator, &config).unwrap();
        assert!(overview.has_updates());
        assert_eq!(overview.updates.len(), 1);
        assert_eq!(overview.updates["blog"], vec!["m240101_000000_init".to_string()]);
        assert!(overview.history.is_empty());

        migrator
            .update_to_latest(&ModuleId::from("blog"), &mut WebReporter::new())
            .unwrap();
        let overview = AdminOverview::build(&migrator, &config).unwrap();
        assert!(!overview.has_updates());
        assert_eq!(overview.history["blog"].len(), 1);
        assert_eq!(overview.installed, vec!["blog".to_string()]);

        let json = serde_json::to_value(&overview).unwrap();
        assert_eq!(json["history"]["blog"][0]["version"], "m240101_000000_init");
    }
}
