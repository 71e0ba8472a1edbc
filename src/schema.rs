// ABOUTME: Table description driving statement generation
// ABOUTME: Validates identifiers and the key/column partition, introspects SQLite tables

use rusqlite::Connection;

use crate::error::{Result, SyncError};

const MAX_IDENTIFIER_LEN: usize = 63;

/// Name, ordered columns and ordered key columns of a target table.
///
/// Column order fixes parameter positions in every generated statement. Key
/// order fixes the order of the `WHERE` predicates. Key membership is tested
/// case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    table: String,
    columns: Vec<String>,
    keys: Vec<String>,
}

impl TableSchema {
    /// Build and validate a schema.
    ///
    /// Fails with [`SyncError::Schema`] when an identifier is invalid, a
    /// column repeats, a key is not among the columns, or the column set
    /// would generate degenerate SQL (no columns, no keys, or no non-key
    /// column for the update template).
    pub fn new<T, C, K>(table: T, columns: C, keys: K) -> Result<Self>
    where
        T: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
        K: IntoIterator,
        K::Item: Into<String>,
    {
        let schema = Self {
            table: table.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            keys: keys.into_iter().map(Into::into).collect(),
        };
        schema.validate()?;
        Ok(schema)
    }

    /// Read the schema of `table` from a SQLite connection.
    ///
    /// Columns come back in declaration order and keys in primary-key order.
    pub fn introspect(conn: &Connection, table: &str) -> Result<Self> {
        validate_table_name(table).map_err(|reason| SyncError::schema(table, reason))?;

        let (schema_name, table_name) = match table.split_once('.') {
            Some((schema, name)) => (schema, name),
            None => ("main", table),
        };
        let pragma = format!("PRAGMA {}.table_info({})", schema_name, table_name);

        let read = || -> rusqlite::Result<Vec<(String, i64)>> {
            let mut stmt = conn.prepare(&pragma)?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>("name")?, row.get("pk")?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        };
        let info = read().map_err(|e| {
            SyncError::schema(table, format!("failed to read table info: {}", e))
        })?;

        if info.is_empty() {
            return Err(SyncError::schema(table, "table does not exist in target"));
        }

        let mut keyed: Vec<(i64, String)> = info
            .iter()
            .filter(|(_, pk)| *pk > 0)
            .map(|(name, pk)| (*pk, name.clone()))
            .collect();
        if keyed.is_empty() {
            return Err(SyncError::schema(table, "table has no primary key"));
        }
        keyed.sort_by_key(|(position, _)| *position);

        tracing::debug!(
            "Introspected table '{}': {} columns, {} key columns",
            table,
            info.len(),
            keyed.len()
        );

        Self::new(
            table,
            info.into_iter().map(|(name, _)| name),
            keyed.into_iter().map(|(_, name)| name),
        )
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Whether `column` is a key column. Comparison ignores case.
    pub fn is_key(&self, column: &str) -> bool {
        self.keys.iter().any(|key| key.eq_ignore_ascii_case(column))
    }

    /// Columns that are not keys, in column order.
    pub fn non_key_columns(&self) -> impl Iterator<Item = &String> {
        self.columns.iter().filter(|column| !self.is_key(column))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let fail = |reason: String| Err(SyncError::schema(&self.table, reason));

        if let Err(reason) = validate_table_name(&self.table) {
            return fail(reason);
        }
        if self.columns.is_empty() {
            return fail("column list is empty".to_string());
        }
        if self.keys.is_empty() {
            return fail("key column list is empty".to_string());
        }

        for (idx, column) in self.columns.iter().enumerate() {
            if let Err(reason) = validate_identifier(column) {
                return fail(reason);
            }
            if self.columns[..idx]
                .iter()
                .any(|earlier| earlier.eq_ignore_ascii_case(column))
            {
                return fail(format!("column '{}' is listed more than once", column));
            }
        }

        for (idx, key) in self.keys.iter().enumerate() {
            if !self.columns.iter().any(|c| c.eq_ignore_ascii_case(key)) {
                return fail(format!("key column '{}' is not among the columns", key));
            }
            if self.keys[..idx].iter().any(|k| k.eq_ignore_ascii_case(key)) {
                return fail(format!("key column '{}' is listed more than once", key));
            }
        }

        if self.non_key_columns().next().is_none() {
            return fail("every column is a key column, update would have nothing to set".to_string());
        }

        Ok(())
    }
}

/// Validate a column identifier.
///
/// Identifiers are interpolated into statement text, so only plain SQL
/// identifiers are accepted: a letter or underscore followed by letters,
/// digits or underscores.
pub fn validate_identifier(name: &str) -> std::result::Result<(), String> {
    if name.is_empty() {
        return Err("identifier cannot be empty".to_string());
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(format!(
            "identifier '{}' exceeds {} characters",
            name, MAX_IDENTIFIER_LEN
        ));
    }

    let mut chars = name.chars();
    let first_ok = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if !first_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!(
            "identifier '{}' must match [A-Za-z_][A-Za-z0-9_]*",
            name
        ));
    }

    Ok(())
}

/// Validate a table name, allowing one `schema.` qualifier.
pub fn validate_table_name(name: &str) -> std::result::Result<(), String> {
    match name.split_once('.') {
        Some((schema, table)) => {
            validate_identifier(schema)?;
            validate_identifier(table)
        }
        None => validate_identifier(name),
    }
}
