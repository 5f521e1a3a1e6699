use std::io::Write;

use modmigrate_core::{MigrationEvent, Reporter};

/// Writes migration progress to a terminal.
///
/// Unit events are prefixed with `*** `; a finished or failed unit is
/// followed by a blank line.
pub struct ConsoleReporter<W: Write> {
    out: W,
}

impl ConsoleReporter<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Reporter for ConsoleReporter<W> {
    fn report(&mut self, event: &MigrationEvent<'_>) {
        let line = event.describe();
        // a closed stdout is not worth aborting a migration over
        let _ = match event {
            MigrationEvent::Finished { .. } => writeln!(self.out, "*** {line}\n"),
            MigrationEvent::Failed { output, .. } if !output.is_empty() => {
                writeln!(self.out, "{output}\n*** {line}\n")
            }
            MigrationEvent::Failed { .. } => writeln!(self.out, "*** {line}\n"),
            _ if event.is_unit_event() => writeln!(self.out, "*** {line}"),
            _ => writeln!(self.out, "{line}"),
        };
        let _ = self.out.flush();
    }
}
