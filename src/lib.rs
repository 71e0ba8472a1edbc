// ABOUTME: Library root for table-sync
// ABOUTME: Schema-driven replication of source records into a target relational table

pub mod change;
pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod record;
pub mod schema;
pub mod sync;
pub mod template;

pub use change::{Applied, ChangeOperation};
pub use connection::ConnectionInfo;
pub use error::{ConnectFailure, ExecFailure, RecordError, Result, SyncError};
pub use record::{FetchedRow, JsonRecord, RowSet, SourceRecord};
pub use schema::TableSchema;
pub use sync::{SyncOptions, TableSync};
pub use template::{StatementKind, StatementTemplate, TemplateSet};
