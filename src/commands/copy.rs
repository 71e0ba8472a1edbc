// ABOUTME: Copy command - replays every row of a source SQLite table into the target
// ABOUTME: Each source row is handed to the table's TableSync as a source record

use std::path::Path;

use anyhow::{bail, Context, Result};
use rusqlite::{Connection, OpenFlags};

use super::Summary;
use crate::change::ChangeOperation;
use crate::config::{SyncConfig, TableConfig};
use crate::schema::validate_table_name;
use crate::sync::TableSync;

/// Replicate rows from `source` into the target for the selected tables.
///
/// With `table` unset every configured table is copied. Per-row execution
/// failures are logged and counted; the command fails after the run if any
/// row failed. Connection and schema failures abort immediately.
pub fn copy(
    config: &SyncConfig,
    source: &Path,
    table: Option<&str>,
    mode: ChangeOperation,
) -> Result<Summary> {
    let selected: Vec<&TableConfig> = match table {
        Some(name) => vec![config
            .table(name)
            .with_context(|| format!("Table '{}' is not in the config", name))?],
        None => config.tables.iter().collect(),
    };

    let source_conn = Connection::open_with_flags(
        source,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
    )
    .with_context(|| format!("Failed to open source database {}", source.display()))?;

    let mut summary = Summary::default();
    for table in selected {
        let sync = config
            .open(table)
            .with_context(|| format!("Failed to initialize table '{}'", table.name))?;
        let result = copy_table(&source_conn, &sync, mode, &mut summary);
        let closed = super::close_all([sync]);
        result?;
        if !closed {
            bail!("failed to release connection for table '{}'", table.name);
        }
    }

    tracing::info!("Copy finished: {}", summary);
    if summary.failed > 0 {
        bail!("{} row(s) failed to replicate", summary.failed);
    }
    Ok(summary)
}

fn copy_table(
    source: &Connection,
    sync: &TableSync,
    mode: ChangeOperation,
    summary: &mut Summary,
) -> Result<()> {
    let table = sync.schema().table();
    validate_table_name(table).map_err(anyhow::Error::msg)?;

    tracing::info!("Copying table '{}' ({} mode)", table, mode);
    let mut stmt = source
        .prepare(&format!("SELECT * FROM {}", table))
        .with_context(|| format!("Failed to read source table '{}'", table))?;
    let mut rows = stmt
        .query([])
        .with_context(|| format!("Failed to query source table '{}'", table))?;

    let mut seen = 0usize;
    while let Some(row) = rows
        .next()
        .with_context(|| format!("Failed to read row from source table '{}'", table))?
    {
        seen += 1;
        match sync.apply(mode, row) {
            Ok(applied) => summary.record(applied),
            Err(e) if !e.is_fatal() => {
                tracing::warn!("Row {} of '{}': {}", seen, table, e);
                summary.failed += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    tracing::info!("Processed {} row(s) from '{}'", seen, table);
    Ok(())
}
