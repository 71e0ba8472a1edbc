// ABOUTME: TableSync - replicates source records into one target table
// ABOUTME: Compiles CRUD templates once at init, binds record values per call

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};

use crate::change::{Applied, ChangeOperation};
use crate::connection::ConnectionInfo;
use crate::error::{ConnectFailure, ExecFailure, Result, SyncError};
use crate::record::{RowSet, SourceRecord};
use crate::schema::TableSchema;
use crate::template::{StatementKind, StatementTemplate, TemplateSet};

/// Environment variable that turns on SQL template tracing.
pub const DEBUG_ENV: &str = "TABLE_SYNC_DEBUG";

/// Compiled handles live in the connection's LRU statement cache. Statements
/// the caller caches through [`TableSync::connection`] share it; past this
/// many entries the templates are evicted and recompiled on their next use.
const STATEMENT_CACHE_CAPACITY: usize = 32;

/// Behaviour switches for [`TableSync::init_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Log the generated templates at `info` instead of `debug`.
    pub debug_sql: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            debug_sql: std::env::var_os(DEBUG_ENV).is_some(),
        }
    }
}

/// Replicates the state of source records into one target table.
///
/// Holds one connection and the four compiled statements for its table.
/// Calls are blocking. `TableSync` is `Send` but not `Sync`: move it to the
/// worker that uses it, wrap it in a `Mutex`, or give each worker its own
/// instance.
pub struct TableSync {
    conn: Connection,
    schema: TableSchema,
    templates: TemplateSet,
    target: String,
}

impl TableSync {
    /// Connect and compile the templates for `schema` with default options.
    pub fn init(info: &ConnectionInfo, schema: TableSchema) -> Result<Self> {
        Self::init_with(info, schema, SyncOptions::default())
    }

    pub fn init_with(info: &ConnectionInfo, schema: TableSchema, options: SyncOptions) -> Result<Self> {
        schema.validate()?;
        let conn = connect_target(info)?;
        Self::from_connection(conn, &info.url, schema, options)
    }

    /// Build on an already open connection. `target` only labels log lines.
    pub fn from_connection(
        conn: Connection,
        target: &str,
        schema: TableSchema,
        options: SyncOptions,
    ) -> Result<Self> {
        schema.validate()?;
        conn.set_prepared_statement_cache_capacity(STATEMENT_CACHE_CAPACITY);

        let templates = TemplateSet::build(&schema);
        for template in templates.iter() {
            if options.debug_sql {
                tracing::info!("{}", template);
            } else {
                tracing::debug!("{}", template);
            }

            let stmt = conn.prepare_cached(template.sql()).map_err(|e| {
                SyncError::schema(
                    schema.table(),
                    format!("target rejected {} statement: {}", template.kind(), e),
                )
            })?;
            if stmt.parameter_count() != template.parameter_count() {
                return Err(SyncError::schema(
                    schema.table(),
                    format!(
                        "{} statement expects {} parameters, template binds {}",
                        template.kind(),
                        stmt.parameter_count(),
                        template.parameter_count()
                    ),
                ));
            }
        }

        tracing::info!(
            "Initialized sync for table '{}' on '{}' ({} columns, {} key columns)",
            schema.table(),
            target,
            schema.columns().len(),
            schema.keys().len()
        );

        Ok(Self {
            conn,
            schema,
            templates,
            target: target.to_string(),
        })
    }

    /// Introspect the table's schema from the target, then initialize.
    pub fn init_introspected(info: &ConnectionInfo, table: &str, options: SyncOptions) -> Result<Self> {
        let conn = connect_target(info)?;
        let schema = TableSchema::introspect(&conn, table)?;
        Self::from_connection(conn, &info.url, schema, options)
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn template(&self, kind: StatementKind) -> &StatementTemplate {
        self.templates.get(kind)
    }

    pub fn templates(&self) -> impl Iterator<Item = &StatementTemplate> {
        self.templates.iter()
    }

    /// The live connection, for work the caller manages itself
    /// (transactions, ad hoc queries). Prefer `prepare` over
    /// `prepare_cached` here so the templates keep their cache slots.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Fetch the target rows whose keys match the record's key values.
    pub fn query<R: SourceRecord + ?Sized>(&self, record: &R) -> Result<RowSet> {
        let template = self.templates.get(StatementKind::Query);
        let params = self.bind(template, record)?;
        let exec = |e: rusqlite::Error| self.exec_error(StatementKind::Query, e);

        let mut stmt = self.conn.prepare_cached(template.sql()).map_err(exec)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();

        let mut rows = stmt.query(params_from_iter(params.iter())).map_err(exec)?;
        let mut fetched = Vec::new();
        while let Some(row) = rows.next().map_err(exec)? {
            let values = (0..width)
                .map(|idx| row.get::<_, Value>(idx))
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(exec)?;
            fetched.push(values);
        }

        tracing::debug!(
            "query on '{}' matched {} row(s)",
            self.schema.table(),
            fetched.len()
        );
        Ok(RowSet::new(columns, fetched))
    }

    /// Insert every column of the record. Returns rows affected.
    pub fn insert<R: SourceRecord + ?Sized>(&self, record: &R) -> Result<usize> {
        let affected = self.execute(StatementKind::Insert, record)?;
        if affected == 0 {
            tracing::warn!("insert into '{}' affected no rows", self.schema.table());
        }
        Ok(affected)
    }

    /// Overwrite the non-key columns of the row matching the record's keys.
    ///
    /// Zero means no row matched; the caller decides whether that is
    /// divergence.
    pub fn update<R: SourceRecord + ?Sized>(&self, record: &R) -> Result<usize> {
        self.execute(StatementKind::Update, record)
    }

    /// Delete the row matching the record's keys. Deleting a missing key
    /// returns zero.
    pub fn delete<R: SourceRecord + ?Sized>(&self, record: &R) -> Result<usize> {
        self.execute(StatementKind::Delete, record)
    }

    /// Whether a row with the record's key values exists.
    pub fn exists<R: SourceRecord + ?Sized>(&self, record: &R) -> Result<bool> {
        Ok(!self.query(record)?.is_empty())
    }

    /// Update the matching row, inserting the record when none matched.
    ///
    /// Runs two statements without a transaction; wrap the call in one when
    /// another writer may insert the same key concurrently.
    pub fn upsert<R: SourceRecord + ?Sized>(&self, record: &R) -> Result<Applied> {
        let updated = self.update(record)?;
        if updated > 0 {
            return Ok(Applied {
                operation: ChangeOperation::Update,
                affected: updated,
            });
        }
        Ok(Applied {
            operation: ChangeOperation::Insert,
            affected: self.insert(record)?,
        })
    }

    /// Apply `operation` to the record.
    pub fn apply<R: SourceRecord + ?Sized>(&self, operation: ChangeOperation, record: &R) -> Result<Applied> {
        let affected = match operation {
            ChangeOperation::Insert => self.insert(record)?,
            ChangeOperation::Update => self.update(record)?,
            ChangeOperation::Delete => self.delete(record)?,
            ChangeOperation::Upsert => return self.upsert(record),
        };
        Ok(Applied {
            operation,
            affected,
        })
    }

    /// Release the compiled statements, then the connection.
    ///
    /// The statements are finalized together by flushing the statement
    /// cache. rusqlite discards finalize errors there, so the reported
    /// failures are a statement still executing and the connection close.
    /// The connection close runs even when the first check fails.
    pub fn close(self) -> Result<()> {
        let table = self.schema.table().to_string();
        let mut failures = Vec::new();

        if self.conn.is_busy() {
            failures.push("a statement was still executing at close".to_string());
        }
        self.conn.flush_prepared_statement_cache();
        tracing::debug!("Flushed statement cache for '{}'", table);

        if let Err((conn, e)) = self.conn.close() {
            failures.push(format!("connection: {}", e));
            // Dropping forces the close and discards the error.
            drop(conn);
        }

        if failures.is_empty() {
            tracing::info!("Closed sync for table '{}' on '{}'", table, self.target);
            Ok(())
        } else {
            Err(SyncError::Close { table, failures })
        }
    }

    fn execute<R: SourceRecord + ?Sized>(&self, kind: StatementKind, record: &R) -> Result<usize> {
        let template = self.templates.get(kind);
        let params = self.bind(template, record)?;

        let mut stmt = self
            .conn
            .prepare_cached(template.sql())
            .map_err(|e| self.exec_error(kind, e))?;
        let affected = stmt
            .execute(params_from_iter(params.iter()))
            .map_err(|e| self.exec_error(kind, e))?;

        tracing::debug!(
            "{} on '{}' affected {} row(s)",
            kind,
            self.schema.table(),
            affected
        );
        Ok(affected)
    }

    /// Read the template's bound columns out of the record, in placeholder order.
    fn bind<R: SourceRecord + ?Sized>(&self, template: &StatementTemplate, record: &R) -> Result<Vec<Value>> {
        template
            .bindings()
            .iter()
            .map(|column| {
                record.value_of(column).map_err(|e| SyncError::Exec {
                    table: self.schema.table().to_string(),
                    kind: template.kind(),
                    source: e.into(),
                })
            })
            .collect()
    }

    fn exec_error(&self, kind: StatementKind, source: rusqlite::Error) -> SyncError {
        SyncError::Exec {
            table: self.schema.table().to_string(),
            kind,
            source: ExecFailure::Driver(source),
        }
    }
}

/// Open the target for a new instance. An in-memory target would start
/// empty and be private to this connection, so it can never hold the table.
fn connect_target(info: &ConnectionInfo) -> Result<Connection> {
    if info.is_memory() {
        return Err(SyncError::Connection {
            target: info.url.clone(),
            source: ConnectFailure::InvalidUrl(
                "an in-memory database starts empty; open it yourself and use TableSync::from_connection"
                    .to_string(),
            ),
        });
    }
    info.connect()
}

impl std::fmt::Debug for TableSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableSync")
            .field("target", &self.target)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}
