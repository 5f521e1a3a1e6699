use std::io::IsTerminal;

use anyhow::{Context, Result};
use dialoguer::Confirm;

/// Ask a yes/no question.
///
/// Non-interactive runs, and runs without a terminal on stdin, take the
/// answer as yes.
pub fn confirm(prompt: &str, interactive: bool) -> Result<bool> {
    if !interactive || !std::io::stdin().is_terminal() {
        return Ok(true);
    }

    Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .context("confirmation cancelled")
}
