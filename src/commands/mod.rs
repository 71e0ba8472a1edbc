// ABOUTME: Command implementations for the table-sync binary
// ABOUTME: Exports templates, copy and apply commands plus the shared run summary

pub mod apply;
pub mod copy;
pub mod templates;

pub use apply::apply;
pub use copy::copy;
pub use templates::templates;

use std::fmt;

use crate::change::{Applied, ChangeOperation};
use crate::sync::TableSync;

/// Per-run tally of applied changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Calls that matched no row.
    pub unmatched: usize,
    pub failed: usize,
}

impl Summary {
    pub fn record(&mut self, applied: Applied) {
        if applied.affected == 0 {
            self.unmatched += 1;
            return;
        }
        match applied.operation {
            ChangeOperation::Insert => self.inserted += applied.affected,
            ChangeOperation::Update | ChangeOperation::Upsert => self.updated += applied.affected,
            ChangeOperation::Delete => self.deleted += applied.affected,
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} inserted, {} updated, {} deleted, {} unmatched, {} failed",
            self.inserted, self.updated, self.deleted, self.unmatched, self.failed
        )
    }
}

/// Close every instance, logging each release failure. Returns whether all closed cleanly.
pub(crate) fn close_all(syncs: impl IntoIterator<Item = TableSync>) -> bool {
    let mut clean = true;
    for sync in syncs {
        if let Err(e) = sync.close() {
            tracing::error!("{}", e);
            clean = false;
        }
    }
    clean
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts_by_operation() {
        let mut summary = Summary::default();
        summary.record(Applied {
            operation: ChangeOperation::Insert,
            affected: 1,
        });
        summary.record(Applied {
            operation: ChangeOperation::Update,
            affected: 0,
        });
        summary.record(Applied {
            operation: ChangeOperation::Delete,
            affected: 1,
        });
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.unmatched, 1);
        assert_eq!(summary.deleted, 1);
        assert_eq!(
            summary.to_string(),
            "1 inserted, 0 updated, 1 deleted, 1 unmatched, 0 failed"
        );
    }
}
