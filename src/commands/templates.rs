use anyhow::{Context, Result};

use crate::config::SyncConfig;

/// Connect and print the four generated statements of every configured table.
pub fn templates(config: &SyncConfig) -> Result<()> {
    let mut opened = Vec::with_capacity(config.tables.len());
    for table in &config.tables {
        let sync = config
            .open(table)
            .with_context(|| format!("Failed to initialize table '{}'", table.name))?;

        println!("{}", sync.schema().table());
        for template in sync.templates() {
            println!("  {}", template);
        }
        opened.push(sync);
    }

    if !super::close_all(opened) {
        anyhow::bail!("failed to release one or more connections");
    }
    Ok(())
}
