// ABOUTME: Error taxonomy for table synchronization
// ABOUTME: Connection, schema, execution and release failures surfaced to the caller

use crate::template::StatementKind;

/// Result alias used throughout the library.
pub type Result<T, E = SyncError> = std::result::Result<T, E>;

/// Failures raised by a [`TableSync`](crate::TableSync) instance.
///
/// Nothing is retried internally. Every error surfaces from the call that
/// triggered it.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The target could not be opened, or the connection is no longer usable.
    /// The instance must be re-initialized.
    #[error("failed to connect to target '{target}': {source}")]
    Connection {
        target: String,
        #[source]
        source: ConnectFailure,
    },

    /// The table description is inconsistent or would produce degenerate SQL.
    #[error("invalid schema for table '{table}': {reason}")]
    Schema { table: String, reason: String },

    /// A single statement execution failed. Other templates are unaffected.
    #[error("{kind} on table '{table}' failed: {source}")]
    Exec {
        table: String,
        kind: StatementKind,
        #[source]
        source: ExecFailure,
    },

    /// One or more handles could not be released during close.
    #[error(
        "failed to release {} resource(s) for table '{table}': {}",
        .failures.len(),
        .failures.join("; ")
    )]
    Close {
        table: String,
        failures: Vec<String>,
    },
}

impl SyncError {
    pub(crate) fn schema(table: &str, reason: impl Into<String>) -> Self {
        SyncError::Schema {
            table: table.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the failure leaves the instance unusable.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SyncError::Exec { .. })
    }
}

/// Cause of a [`SyncError::Connection`].
#[derive(Debug, thiserror::Error)]
pub enum ConnectFailure {
    #[error("{0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Driver(#[from] rusqlite::Error),
}

/// Cause of a [`SyncError::Exec`].
#[derive(Debug, thiserror::Error)]
pub enum ExecFailure {
    #[error(transparent)]
    Driver(#[from] rusqlite::Error),

    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Failure reading a value out of a source record.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("source record has no column '{0}'")]
    MissingColumn(String),

    #[error("column '{column}' holds an unsupported value: {reason}")]
    Unsupported { column: String, reason: String },

    #[error("failed to read column '{column}': {source}")]
    Read {
        column: String,
        #[source]
        source: rusqlite::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_errors_are_not_fatal() {
        let err = SyncError::Exec {
            table: "users".into(),
            kind: StatementKind::Insert,
            source: RecordError::MissingColumn("email".into()).into(),
        };
        assert!(!err.is_fatal());
        assert_eq!(
            err.to_string(),
            "insert on table 'users' failed: source record has no column 'email'"
        );
    }

    #[test]
    fn close_error_lists_every_failure() {
        let err = SyncError::Close {
            table: "users".into(),
            failures: vec!["statement cache".into(), "connection".into()],
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("2 resource(s)"));
        assert!(err.to_string().contains("statement cache; connection"));
    }
}
