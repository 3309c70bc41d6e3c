//! `billsync reset` command implementation

use super::ledger_path;
use crate::ledger::{JsonLedger, Ledger};
use colored::Colorize;
use std::path::PathBuf;
use tracing::info;

/// Drop one collection's cursor; its next sync runs fresh
pub fn run(target: &str, ledger: Option<PathBuf>) -> anyhow::Result<()> {
    let path = ledger_path(ledger);
    let ledger = JsonLedger::open(&path)?;

    if ledger.reset(target)? {
        info!(collection = target, "Cursor reset");
        println!("{} cursor for '{}'", "Reset".green(), target);
    } else {
        println!("No cursor recorded for '{}'", target);
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use billsync_common::types::SyncCursor;
    use tempfile::TempDir;

    #[test]
    fn test_reset_removes_cursor() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        JsonLedger::open(&path)
            .unwrap()
            .commit("khushab-bills", SyncCursor::new(90, 12))
            .unwrap();

        run("khushab-bills", Some(path.clone())).unwrap();
        run("missing", Some(path.clone())).unwrap();

        let reopened = JsonLedger::open(&path).unwrap();
        assert!(reopened.cursor("khushab-bills").unwrap().is_fresh());
    }
}
