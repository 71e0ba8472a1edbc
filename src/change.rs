use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Replication action applied to one source record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    Insert,
    Update,
    /// Update, falling back to insert when no row matched.
    Upsert,
    Delete,
}

impl ChangeOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOperation::Insert => "insert",
            ChangeOperation::Update => "update",
            ChangeOperation::Upsert => "upsert",
            ChangeOperation::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeOperation {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "insert" => Ok(ChangeOperation::Insert),
            "update" => Ok(ChangeOperation::Update),
            "upsert" => Ok(ChangeOperation::Upsert),
            "delete" => Ok(ChangeOperation::Delete),
            other => Err(format!("unknown change op: {other}")),
        }
    }
}

/// Outcome of applying a change: the statement that ran last and the rows it touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    pub operation: ChangeOperation,
    pub affected: usize,
}
