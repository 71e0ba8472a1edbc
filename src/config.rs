// ABOUTME: TOML configuration for the table-sync binary
// ABOUTME: Describes the target connection and the tables to keep in sync

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::connection::ConnectionInfo;
use crate::schema::TableSchema;
use crate::sync::{SyncOptions, TableSync};

/// Parsed configuration file.
///
/// ```toml
/// debug_sql = false
///
/// [target]
/// url = "sqlite://target.db"
///
/// [[tables]]
/// name = "users"
/// columns = ["id", "name", "email"]
/// keys = ["id"]
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    #[serde(default)]
    pub debug_sql: bool,
    pub target: ConnectionInfo,
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

/// One synchronized table. Columns and keys are read from the target
/// when omitted.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableConfig {
    pub name: String,
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    #[serde(default)]
    pub keys: Option<Vec<String>>,
}

impl SyncConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_toml(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        tracing::debug!(
            "Loaded config {} with {} table(s)",
            path.display(),
            config.tables.len()
        );
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: SyncConfig = toml::from_str(raw).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.tables.is_empty() {
            bail!("config must list at least one [[tables]] entry");
        }
        let mut seen = HashSet::new();
        for table in &self.tables {
            if !seen.insert(table.name.to_ascii_lowercase()) {
                bail!("table '{}' is configured more than once", table.name);
            }
            if table.columns.is_some() != table.keys.is_some() {
                bail!(
                    "table '{}' must set both columns and keys, or neither",
                    table.name
                );
            }
        }
        Ok(())
    }

    pub fn options(&self) -> SyncOptions {
        let defaults = SyncOptions::default();
        SyncOptions {
            debug_sql: self.debug_sql || defaults.debug_sql,
        }
    }

    pub fn table(&self, name: &str) -> Option<&TableConfig> {
        self.tables
            .iter()
            .find(|table| table.name.eq_ignore_ascii_case(name))
    }

    /// Initialize a [`TableSync`] for `table`, each with its own connection.
    pub fn open(&self, table: &TableConfig) -> Result<TableSync> {
        let sync = match (&table.columns, &table.keys) {
            (Some(columns), Some(keys)) => {
                let schema = TableSchema::new(&table.name, columns, keys)?;
                TableSync::init_with(&self.target, schema, self.options())?
            }
            _ => TableSync::init_introspected(&self.target, &table.name, self.options())?,
        };
        Ok(sync)
    }
}
