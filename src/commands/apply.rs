// ABOUTME: Apply command - replays JSON change messages against the target
// ABOUTME: One message per line: {"table": ..., "op": ..., "record": {...}}

use std::collections::HashMap;
use std::io::BufRead;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use super::Summary;
use crate::change::ChangeOperation;
use crate::config::SyncConfig;
use crate::record::JsonRecord;
use crate::sync::TableSync;

/// A decoded change message.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeMessage {
    pub table: String,
    pub op: ChangeOperation,
    pub record: serde_json::Value,
}

/// Apply every message read from `input`.
///
/// Tables are initialized on first use. Malformed lines and failed calls
/// are logged and counted; the command fails after the run if any line
/// failed.
pub fn apply(config: &SyncConfig, input: impl BufRead) -> Result<Summary> {
    let mut syncs: HashMap<String, TableSync> = HashMap::new();
    let mut summary = Summary::default();

    let result = apply_lines(config, input, &mut syncs, &mut summary);
    let closed = super::close_all(syncs.into_values());
    result?;

    tracing::info!("Apply finished: {}", summary);
    if summary.failed > 0 {
        bail!("{} message(s) failed to apply", summary.failed);
    }
    if !closed {
        bail!("failed to release one or more connections");
    }
    Ok(summary)
}

fn apply_lines(
    config: &SyncConfig,
    input: impl BufRead,
    syncs: &mut HashMap<String, TableSync>,
    summary: &mut Summary,
) -> Result<()> {
    for (idx, line) in input.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.with_context(|| format!("Failed to read input line {}", line_no))?;
        if line.trim().is_empty() {
            continue;
        }

        let message: ChangeMessage = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Line {}: malformed message: {}", line_no, e);
                summary.failed += 1;
                continue;
            }
        };
        let record = match JsonRecord::try_from(message.record) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("Line {}: {}", line_no, e);
                summary.failed += 1;
                continue;
            }
        };

        let key = message.table.to_ascii_lowercase();
        if !syncs.contains_key(&key) {
            let Some(table) = config.table(&message.table) else {
                tracing::warn!("Line {}: table '{}' is not configured", line_no, message.table);
                summary.failed += 1;
                continue;
            };
            let sync = config
                .open(table)
                .with_context(|| format!("Failed to initialize table '{}'", table.name))?;
            syncs.insert(key.clone(), sync);
        }
        let sync = &syncs[&key];

        match sync.apply(message.op, &record) {
            Ok(applied) => summary.record(applied),
            Err(e) if !e.is_fatal() => {
                tracing::warn!("Line {}: {}", line_no, e);
                summary.failed += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
