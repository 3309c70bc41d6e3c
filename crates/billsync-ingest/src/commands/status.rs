//! `billsync status` command implementation

use super::ledger_path;
use crate::ledger::{JsonLedger, Ledger};
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Table};
use std::path::PathBuf;

/// Print the cursor table of the ledger
pub fn run(ledger: Option<PathBuf>) -> anyhow::Result<()> {
    let path = ledger_path(ledger);
    let ledger = JsonLedger::open(&path)?;
    let entries = ledger.entries()?;

    if entries.is_empty() {
        println!("No collections synced yet ({}).", path.display());
        println!("Run 'billsync sync' to start.");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Collection", "Latest known id", "Local records", "Updated"]);
    for (name, entry) in &entries {
        table.add_row(vec![
            name.clone(),
            entry.cursor.latest_known_id.to_string(),
            entry.cursor.local_record_count.to_string(),
            entry.updated_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        ]);
    }

    println!("{}", "Ledger:".cyan().bold());
    println!("{table}");
    println!("  File: {}", path.display());
    Ok(())
}
