// ABOUTME: Connection parameters for the target database
// ABOUTME: Parses sqlite URLs and opens a verified rusqlite connection

use std::fmt;
use std::path::PathBuf;

use rusqlite::{Connection, OpenFlags};
use serde::Deserialize;

use crate::error::{ConnectFailure, Result, SyncError};

/// Where and how to connect to the target database.
///
/// Accepted URL forms: `sqlite::memory:`, `sqlite://<path>`, `sqlite:<path>`,
/// `file:<path>[?params]` and a bare path. An in-memory database is private
/// to the connection that opens it, so `TableSync::init` refuses it.
#[derive(Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionInfo {
    pub url: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Create the database file when it does not exist.
    #[serde(default)]
    pub create_if_missing: bool,
}

impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("create_if_missing", &self.create_if_missing)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Memory,
    Path(PathBuf),
    Uri(String),
}

impl ConnectionInfo {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    /// Whether the URL names a private in-memory database.
    pub fn is_memory(&self) -> bool {
        matches!(self.target(), Ok(Target::Memory))
    }

    fn target(&self) -> std::result::Result<Target, String> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err("connection url cannot be empty".to_string());
        }
        if url == "sqlite::memory:" || url == ":memory:" {
            return Ok(Target::Memory);
        }
        if url.starts_with("file:") {
            return Ok(Target::Uri(url.to_string()));
        }
        let path = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url);
        if path.is_empty() {
            return Err(format!("connection url '{}' has no database path", url));
        }
        if path.contains("://") {
            return Err(format!("unsupported connection scheme in '{}'", url));
        }
        Ok(Target::Path(PathBuf::from(path)))
    }

    /// Open the connection and make sure the database is readable.
    pub fn connect(&self) -> Result<Connection> {
        let connection_error = |source: ConnectFailure| SyncError::Connection {
            target: self.url.clone(),
            source,
        };

        let target = self
            .target()
            .map_err(|reason| connection_error(ConnectFailure::InvalidUrl(reason)))?;

        if self.user.is_some() || self.password.is_some() {
            tracing::warn!(
                "SQLite has no authentication; credentials for '{}' are ignored",
                self.url
            );
        }

        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }

        let conn = match &target {
            Target::Memory => Connection::open_in_memory(),
            Target::Path(path) => Connection::open_with_flags(path, flags),
            Target::Uri(uri) => Connection::open_with_flags(uri, flags),
        }
        .map_err(|e| connection_error(e.into()))?;

        // Opening is lazy about the file header; force a read so a
        // non-database file fails here rather than on the first statement.
        conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
            row.get::<_, i64>(0)
        })
        .map_err(|e| connection_error(e.into()))?;

        tracing::info!("Connected to target database '{}'", self.url);
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_url_forms() {
        assert_eq!(ConnectionInfo::new("sqlite::memory:").target(), Ok(Target::Memory));
        assert_eq!(
            ConnectionInfo::new("sqlite:///tmp/a.db").target(),
            Ok(Target::Path(PathBuf::from("/tmp/a.db")))
        );
        assert_eq!(
            ConnectionInfo::new("sqlite:data/a.db").target(),
            Ok(Target::Path(PathBuf::from("data/a.db")))
        );
        assert_eq!(
            ConnectionInfo::new("a.db").target(),
            Ok(Target::Path(PathBuf::from("a.db")))
        );
        assert_eq!(
            ConnectionInfo::new("file:a.db?mode=ro").target(),
            Ok(Target::Uri("file:a.db?mode=ro".to_string()))
        );
    }

    #[test]
    fn detects_memory_targets() {
        assert!(ConnectionInfo::new("sqlite::memory:").is_memory());
        assert!(ConnectionInfo::new(":memory:").is_memory());
        assert!(!ConnectionInfo::new("sqlite://a.db").is_memory());
    }

    #[test]
    fn rejects_bad_urls() {
        assert!(ConnectionInfo::new("").target().is_err());
        assert!(ConnectionInfo::new("sqlite://").target().is_err());
        assert!(ConnectionInfo::new("postgres://host/db").target().is_err());
    }

    #[test]
    fn missing_database_is_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.db");
        let err = ConnectionInfo::new(path.to_string_lossy())
            .connect()
            .unwrap_err();
        assert!(matches!(err, SyncError::Connection { .. }));
    }

    #[test]
    fn non_database_file_is_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "this is definitely not a sqlite database file\n".repeat(64)).unwrap();
        let err = ConnectionInfo::new(path.to_string_lossy())
            .connect()
            .unwrap_err();
        assert!(matches!(err, SyncError::Connection { .. }));
    }

    #[test]
    fn creates_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new.db");
        ConnectionInfo::new(format!("sqlite://{}", path.display()))
            .create_if_missing(true)
            .connect()
            .unwrap();
        assert!(path.exists());
    }

    #[test]
    fn debug_redacts_password() {
        let info = ConnectionInfo::new("a.db").with_credentials("sync", "hunter2");
        let rendered = format!("{:?}", info);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("***"));
    }
}
