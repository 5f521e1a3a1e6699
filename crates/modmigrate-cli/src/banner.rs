use std::path::Path;

use modmigrate_common::ModuleId;

/// Header shown before commands that touch the database.
pub fn render_header(db_path: &Path, table: &str, module: &ModuleId) -> String {
    let version = env!("CARGO_PKG_VERSION");

    let db_display = match std::env::var("HOME") {
        Ok(home) if !home.is_empty() => db_path.to_string_lossy().replace(&home, "~"),
        _ => db_path.to_string_lossy().to_string(),
    };

    let rows = [
        ("Database", db_display),
        ("Table", table.to_string()),
        ("Module", module.label().to_string()),
    ];

    let title = format!("modmigrate Migration Tool v{version}");
    let inner = rows
        .iter()
        .map(|(k, v)| k.len().max(10) + v.chars().count())
        .chain(std::iter::once(title.chars().count() + 4))
        .max()
        .unwrap_or(0)
        + 2;

    // 5 for "─── " and the trailing space
    let title_dashes = inner.saturating_sub(title.chars().count() + 5);
    let mut out = format!("╭─── {title} {}╮\n", "─".repeat(title_dashes));
    for (key, value) in &rows {
        let cell = format!("{key:<10}{value}");
        out.push_str(&format!("│ {cell:<w$}│\n", w = inner - 1));
    }
    out.push_str(&format!("╰{}╯", "─".repeat(inner)));
    out
}

pub fn print_header(db_path: &Path, table: &str, module: &ModuleId) {
    println!("{}", render_header(db_path, table, module));
    println!();
}
