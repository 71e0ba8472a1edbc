// ABOUTME: Parameterized CRUD statement templates built from a TableSchema
// ABOUTME: Each template pairs SQL text with the column bound at each placeholder

use std::fmt;
use std::str::FromStr;

use crate::schema::TableSchema;

/// Kind of statement a template executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Query,
    Insert,
    Update,
    Delete,
}

impl StatementKind {
    /// All kinds, in the order templates are built and released.
    pub const ALL: [StatementKind; 4] = [
        StatementKind::Query,
        StatementKind::Insert,
        StatementKind::Update,
        StatementKind::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::Query => "query",
            StatementKind::Insert => "insert",
            StatementKind::Update => "update",
            StatementKind::Delete => "delete",
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatementKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "query" => Ok(StatementKind::Query),
            "insert" => Ok(StatementKind::Insert),
            "update" => Ok(StatementKind::Update),
            "delete" => Ok(StatementKind::Delete),
            other => Err(format!("unknown statement kind: {other}")),
        }
    }
}

/// Immutable statement descriptor: SQL text plus the columns whose values
/// fill its placeholders, in placeholder order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementTemplate {
    kind: StatementKind,
    sql: String,
    bindings: Vec<String>,
}

impl StatementTemplate {
    /// Build the template of `kind` for `schema`.
    ///
    /// Generates:
    /// ```sql
    /// SELECT * FROM users WHERE id=?
    /// INSERT INTO users (id,name,email) VALUES (?,?,?)
    /// UPDATE users SET name=?,email=? WHERE id=?
    /// DELETE FROM users WHERE id=?
    /// ```
    pub fn build(kind: StatementKind, schema: &TableSchema) -> Self {
        let table = schema.table();
        let keys = schema.keys();

        let (sql, bindings) = match kind {
            StatementKind::Query => (
                format!("SELECT * FROM {} WHERE {}", table, key_predicate(keys)),
                keys.to_vec(),
            ),
            StatementKind::Insert => {
                let columns = schema.columns();
                (
                    format!(
                        "INSERT INTO {} ({}) VALUES ({})",
                        table,
                        join(columns, ",", |c| c.to_string()),
                        join(columns, ",", |_| "?".to_string()),
                    ),
                    columns.to_vec(),
                )
            }
            StatementKind::Update => {
                let set: Vec<String> = schema.non_key_columns().cloned().collect();
                let sql = format!(
                    "UPDATE {} SET {} WHERE {}",
                    table,
                    join(&set, ",", |c| format!("{}=?", c)),
                    key_predicate(keys),
                );
                let mut bindings = set;
                bindings.extend(keys.iter().cloned());
                (sql, bindings)
            }
            StatementKind::Delete => (
                format!("DELETE FROM {} WHERE {}", table, key_predicate(keys)),
                keys.to_vec(),
            ),
        };

        Self {
            kind,
            sql,
            bindings,
        }
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Column bound at each placeholder, first placeholder first.
    pub fn bindings(&self) -> &[String] {
        &self.bindings
    }

    pub fn parameter_count(&self) -> usize {
        self.bindings.len()
    }
}

impl fmt::Display for StatementTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} st: {}", self.kind, self.sql)
    }
}

/// The four templates of one table, built together.
#[derive(Debug, Clone)]
pub struct TemplateSet {
    templates: [StatementTemplate; 4],
}

impl TemplateSet {
    pub fn build(schema: &TableSchema) -> Self {
        Self {
            templates: StatementKind::ALL.map(|kind| StatementTemplate::build(kind, schema)),
        }
    }

    pub fn get(&self, kind: StatementKind) -> &StatementTemplate {
        // ALL and the array share one order
        &self.templates[kind as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &StatementTemplate> {
        self.templates.iter()
    }
}

/// `k1=? AND k2=? ...`
fn key_predicate(keys: &[String]) -> String {
    join(keys, " AND ", |k| format!("{}=?", k))
}

fn join(items: &[String], separator: &str, render: impl Fn(&str) -> String) -> String {
    items
        .iter()
        .map(|item| render(item))
        .collect::<Vec<_>>()
        .join(separator)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> TableSchema {
        TableSchema::new("users", ["id", "name", "email"], ["id"]).unwrap()
    }

    fn order_items() -> TableSchema {
        TableSchema::new(
            "order_items",
            ["order_id", "qty", "item_id", "price"],
            ["order_id", "item_id"],
        )
        .unwrap()
    }

    #[test]
    fn users_templates() {
        let set = TemplateSet::build(&users());
        assert_eq!(
            set.get(StatementKind::Query).sql(),
            "SELECT * FROM users WHERE id=?"
        );
        assert_eq!(
            set.get(StatementKind::Insert).sql(),
            "INSERT INTO users (id,name,email) VALUES (?,?,?)"
        );
        assert_eq!(
            set.get(StatementKind::Update).sql(),
            "UPDATE users SET name=?,email=? WHERE id=?"
        );
        assert_eq!(
            set.get(StatementKind::Delete).sql(),
            "DELETE FROM users WHERE id=?"
        );
    }

    #[test]
    fn composite_key_templates() {
        let set = TemplateSet::build(&order_items());

        let query = set.get(StatementKind::Query);
        assert_eq!(
            query.sql(),
            "SELECT * FROM order_items WHERE order_id=? AND item_id=?"
        );
        assert_eq!(query.bindings(), ["order_id", "item_id"]);

        let update = set.get(StatementKind::Update);
        assert_eq!(
            update.sql(),
            "UPDATE order_items SET qty=?,price=? WHERE order_id=? AND item_id=?"
        );
        assert_eq!(update.bindings(), ["qty", "price", "order_id", "item_id"]);

        let delete = set.get(StatementKind::Delete);
        assert_eq!(delete.bindings(), ["order_id", "item_id"]);
    }

    #[test]
    fn binding_counts_follow_schema_shape() {
        let schema = order_items();
        let n = schema.columns().len();
        let k = schema.keys().len();
        let set = TemplateSet::build(&schema);

        assert_eq!(set.get(StatementKind::Insert).parameter_count(), n);
        assert_eq!(set.get(StatementKind::Insert).bindings(), schema.columns());
        assert_eq!(set.get(StatementKind::Update).parameter_count(), (n - k) + k);
        assert_eq!(set.get(StatementKind::Query).parameter_count(), k);
        assert_eq!(set.get(StatementKind::Delete).parameter_count(), k);

        for template in set.iter() {
            assert_eq!(
                template.sql().matches('?').count(),
                template.parameter_count(),
                "{}",
                template
            );
        }
    }

    #[test]
    fn update_excludes_keys_case_insensitively() {
        let schema = TableSchema::new("users", ["ID", "name"], ["id"]).unwrap();
        let update = StatementTemplate::build(StatementKind::Update, &schema);
        assert_eq!(update.sql(), "UPDATE users SET name=? WHERE id=?");
        assert_eq!(update.bindings(), ["name", "id"]);
    }

    #[test]
    fn set_is_indexed_by_kind() {
        let set = TemplateSet::build(&users());
        for kind in StatementKind::ALL {
            assert_eq!(set.get(kind).kind(), kind);
        }
    }

    #[test]
    fn kind_parses_case_insensitively() {
        assert_eq!("UPDATE".parse::<StatementKind>(), Ok(StatementKind::Update));
        assert!("merge".parse::<StatementKind>().is_err());
    }

    #[test]
    fn display_matches_debug_trace() {
        let template = StatementTemplate::build(StatementKind::Delete, &users());
        assert_eq!(template.to_string(), "delete st: DELETE FROM users WHERE id=?");
    }
}
