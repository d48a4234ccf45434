use std::time::Duration;

use rusqlite::OpenFlags;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::error::{Result, SqliteError};
use crate::types::{column_names, Params, Row};

/// Rows buffered between the connection thread and an `each` callback
const EACH_BUFFER: usize = 64;

/// How the database file is opened
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenMode {
    /// Read-only
    Read,
    /// Read-write; the file must already exist
    #[default]
    Write,
    /// Read-write, creating the file when missing
    Create,
}

impl OpenMode {
    pub fn flags(self) -> OpenFlags {
        let access = match self {
            OpenMode::Read => OpenFlags::SQLITE_OPEN_READ_ONLY,
            OpenMode::Write => OpenFlags::SQLITE_OPEN_READ_WRITE,
            OpenMode::Create => OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        };
        access | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX
    }
}

/// SQLite adapter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Path to the SQLite database file, or `:memory:`
    pub db_path: String,
    #[serde(default)]
    pub mode: OpenMode,
    /// Value written to `PRAGMA foreign_keys` right after opening
    #[serde(default)]
    pub foreign_keys: bool,
    #[serde(default)]
    pub busy_timeout_ms: Option<u64>,
}

impl SqliteConfig {
    /// Create a new SQLite config with path and mode
    pub fn new(db_path: impl Into<String>, mode: OpenMode) -> Self {
        Self {
            db_path: db_path.into(),
            mode,
            foreign_keys: false,
            busy_timeout_ms: None,
        }
    }

    pub fn with_foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }
}

/// Outcome of [`AsyncSqlite::run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunResult {
    /// Last inserted rowid on this connection (0 until a rowid table is written)
    pub last_id: i64,
    /// Rows changed by the most recent INSERT, UPDATE or DELETE
    pub changes: u64,
}

/// Future-returning wrapper around one SQLite connection.
///
/// The handle lives on a dedicated thread (`tokio-rusqlite`), so every call
/// is executed in the order it was submitted. Calls made before [`open`] or
/// after [`close`] fail with [`SqliteError::NotOpened`].
///
/// [`open`]: AsyncSqlite::open
/// [`close`]: AsyncSqlite::close
pub struct AsyncSqlite {
    config: SqliteConfig,
    conn: Option<tokio_rusqlite::Connection>,
}

impl AsyncSqlite {
    pub fn new(db_path: impl Into<String>, mode: OpenMode) -> Self {
        Self::with_config(SqliteConfig::new(db_path, mode))
    }

    /// Create a new adapter with the given config; nothing is opened yet
    pub fn with_config(config: SqliteConfig) -> Self {
        Self { config, conn: None }
    }

    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    pub fn path(&self) -> &str {
        &self.config.db_path
    }

    pub fn mode(&self) -> OpenMode {
        self.config.mode
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// Open the database. Resolves to `"<path> opened"`.
    pub async fn open(&mut self) -> Result<String> {
        if self.conn.is_some() {
            return Err(SqliteError::AlreadyOpened(self.config.db_path.clone()));
        }

        let conn =
            tokio_rusqlite::Connection::open_with_flags(&self.config.db_path, self.config.mode.flags())
                .await?;

        let foreign_keys = self.config.foreign_keys;
        let busy_timeout = self.config.busy_timeout_ms.map(Duration::from_millis);
        conn.call(move |conn| -> rusqlite::Result<()> {
            if let Some(timeout) = busy_timeout {
                conn.busy_timeout(timeout)?;
            }
            // written either way: bundled SQLite defaults it on
            conn.pragma_update(None, "foreign_keys", foreign_keys)?;
            Ok(())
        })
        .await?;

        self.conn = Some(conn);
        debug!(path = %self.config.db_path, mode = ?self.config.mode, "database opened");
        Ok(format!("{} opened", self.config.db_path))
    }

    /// Execute one statement, ignoring any rows it yields.
    pub async fn run(&self, sql: &str, params: impl Into<Params>) -> Result<RunResult> {
        let conn = self.connection()?;
        trace!(sql, "run");
        let sql = sql.to_string();
        let params = params.into();

        conn.call(move |conn| -> rusqlite::Result<RunResult> {
            let mut stmt = conn.prepare(&sql)?;
            params.bind(&mut stmt)?;
            stmt.raw_query().next()?;
            Ok(RunResult {
                last_id: conn.last_insert_rowid(),
                changes: conn.changes() as u64,
            })
        })
        .await
        .map_err(|err| {
            let err = SqliteError::from(err);
            warn!(error = %err, "statement failed");
            err
        })
    }

    /// First row as `T`, or `None` when the query yields nothing.
    pub async fn get<T>(&self, sql: &str, params: impl Into<Params>) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        match self.get_row(sql, params).await? {
            Some(row) => Ok(Some(row.deserialize()?)),
            None => Ok(None),
        }
    }

    pub async fn get_row(&self, sql: &str, params: impl Into<Params>) -> Result<Option<Row>> {
        let rows = self.query(sql, params.into(), Some(1)).await?;
        Ok(rows.into_iter().next())
    }

    /// Every row as `T`; empty when the query yields nothing.
    pub async fn all<T>(&self, sql: &str, params: impl Into<Params>) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        self.all_rows(sql, params)
            .await?
            .iter()
            .map(|row| row.deserialize().map_err(SqliteError::from))
            .collect()
    }

    pub async fn all_rows(&self, sql: &str, params: impl Into<Params>) -> Result<Vec<Row>> {
        self.query(sql, params.into(), None).await
    }

    /// Call `action` for every row, in order, and resolve to the number of
    /// rows retrieved.
    ///
    /// Rows are streamed from the connection thread and `action` runs on the
    /// caller's task. A row that fails to decode stops the iteration.
    pub async fn each<T, F>(&self, sql: &str, params: impl Into<Params>, mut action: F) -> Result<usize>
    where
        T: DeserializeOwned,
        F: FnMut(T),
    {
        let conn = self.connection()?;
        trace!(sql, "each");
        let sql = sql.to_string();
        let params = params.into();
        let (tx, mut rx) = mpsc::channel::<Row>(EACH_BUFFER);

        let producer = conn.call(move |conn| -> rusqlite::Result<usize> {
            let mut stmt = conn.prepare(&sql)?;
            params.bind(&mut stmt)?;
            let columns = column_names(&stmt);
            let mut rows = stmt.raw_query();
            let mut count = 0;
            while let Some(row) = rows.next()? {
                let row = Row::from_sqlite(&columns, row)?;
                if tx.blocking_send(row).is_err() {
                    // receiver gone
                    break;
                }
                count += 1;
            }
            Ok(count)
        });

        let consumer = async move {
            while let Some(row) = rx.recv().await {
                action(row.deserialize()?);
            }
            Ok::<(), SqliteError>(())
        };

        let (retrieved, consumed) = futures::future::join(producer, consumer).await;
        consumed?;
        Ok(retrieved?)
    }

    /// Run a script of `;`-separated statements without parameters.
    pub async fn exec(&self, sql: &str) -> Result<()> {
        let conn = self.connection()?;
        trace!(sql, "exec");
        let sql = sql.to_string();
        conn.call(move |conn| conn.execute_batch(&sql))
            .await
            .map_err(SqliteError::from)
    }

    /// Close the database. Resolves to `"<path> closed"`.
    ///
    /// If SQLite refuses to close, the handle is kept and the error returned.
    pub async fn close(&mut self) -> Result<String> {
        let conn = self.conn.take().ok_or(SqliteError::NotOpened)?;
        match conn.close().await {
            Ok(()) => {
                debug!(path = %self.config.db_path, "database closed");
                Ok(format!("{} closed", self.config.db_path))
            }
            Err(tokio_rusqlite::Error::Close((conn, err))) => {
                self.conn = Some(conn);
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn connection(&self) -> Result<&tokio_rusqlite::Connection> {
        self.conn.as_ref().ok_or(SqliteError::NotOpened)
    }

    async fn query(&self, sql: &str, params: Params, limit: Option<usize>) -> Result<Vec<Row>> {
        let conn = self.connection()?;
        trace!(sql, "query");
        let sql = sql.to_string();

        conn.call(move |conn| -> rusqlite::Result<Vec<Row>> {
            let mut stmt = conn.prepare(&sql)?;
            params.bind(&mut stmt)?;
            let columns = column_names(&stmt);
            let mut rows = stmt.raw_query();
            let mut result = Vec::new();
            while let Some(row) = rows.next()? {
                result.push(Row::from_sqlite(&columns, row)?);
                if limit.is_some_and(|limit| result.len() >= limit) {
                    break;
                }
            }
            Ok(result)
        })
        .await
        .map_err(SqliteError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;
    use tempfile::tempdir;

    #[test]
    fn test_open_mode_flags() {
        assert!(OpenMode::Read.flags().contains(OpenFlags::SQLITE_OPEN_READ_ONLY));
        assert!(!OpenMode::Write.flags().contains(OpenFlags::SQLITE_OPEN_CREATE));
        assert!(OpenMode::Create
            .flags()
            .contains(OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE));
    }

    #[test]
    fn test_config_from_json() {
        let config: SqliteConfig =
            serde_json::from_str(r#"{"db_path": "data.db", "mode": "read"}"#).unwrap();
        assert_eq!(config.db_path, "data.db");
        assert_eq!(config.mode, OpenMode::Read);
        assert!(!config.foreign_keys);
        assert_eq!(config.busy_timeout_ms, None);

        let config: SqliteConfig = serde_json::from_str(r#"{"db_path": ":memory:"}"#).unwrap();
        assert_eq!(config.mode, OpenMode::Write);
    }

    #[test]
    fn test_config_builders() {
        let config = SqliteConfig::new(":memory:", OpenMode::Create)
            .with_foreign_keys(true)
            .with_busy_timeout(Duration::from_secs(2));
        assert!(config.foreign_keys);
        assert_eq!(config.busy_timeout_ms, Some(2000));
    }

    #[tokio::test]
    async fn open_and_close_report_path() {
        let mut db = AsyncSqlite::new(":memory:", OpenMode::Write);
        assert!(!db.is_open());
        assert_eq!(db.open().await.unwrap(), ":memory: opened");
        assert!(db.is_open());
        assert_eq!(db.close().await.unwrap(), ":memory: closed");
        assert!(!db.is_open());
    }

    #[tokio::test]
    async fn open_twice_returns_error() {
        let mut db = AsyncSqlite::new(":memory:", OpenMode::Write);
        db.open().await.unwrap();
        let err = db.open().await.unwrap_err();
        assert!(matches!(err, SqliteError::AlreadyOpened(_)));
        assert!(db.is_open());
    }

    #[tokio::test]
    async fn reopen_after_close_starts_fresh_memory_db() {
        let mut db = AsyncSqlite::new(":memory:", OpenMode::Write);
        db.open().await.unwrap();
        db.run("CREATE TABLE t (x INTEGER)", ()).await.unwrap();
        db.close().await.unwrap();

        db.open().await.unwrap();
        let tables: Vec<Value> = db
            .all_rows("SELECT name FROM sqlite_master WHERE type = 'table'", ())
            .await
            .unwrap()
            .into_iter()
            .filter_map(|row| row.get("name").cloned())
            .collect();
        assert!(tables.is_empty());
    }

    #[tokio::test]
    async fn write_mode_requires_existing_file() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("missing.db");
        let mut db = AsyncSqlite::new(db_path.to_str().unwrap(), OpenMode::Write);

        let err = db.open().await.unwrap_err();
        assert_eq!(err.sqlite_error_code(), Some(rusqlite::ErrorCode::CannotOpen));
        assert!(!db.is_open());
        assert!(!db_path.exists());
    }

    #[tokio::test]
    async fn create_mode_creates_file_then_read_mode_rejects_writes() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("people.db");
        let path = db_path.to_str().unwrap();

        let mut writer = AsyncSqlite::new(path, OpenMode::Create);
        writer.open().await.unwrap();
        writer.run("CREATE TABLE t (x INTEGER)", ()).await.unwrap();
        writer.run("INSERT INTO t VALUES (?)", [5]).await.unwrap();
        writer.close().await.unwrap();
        assert!(db_path.exists());

        let mut reader = AsyncSqlite::new(path, OpenMode::Read);
        reader.open().await.unwrap();
        let row = reader.get_row("SELECT x FROM t", ()).await.unwrap().unwrap();
        assert_eq!(row.get("x"), Some(&Value::Integer(5)));

        let err = reader.run("INSERT INTO t VALUES (6)", ()).await.unwrap_err();
        assert_eq!(err.sqlite_error_code(), Some(rusqlite::ErrorCode::ReadOnly));
        reader.close().await.unwrap();
    }

    #[tokio::test]
    async fn foreign_keys_and_busy_timeout_are_applied() {
        let config = SqliteConfig::new(":memory:", OpenMode::Write)
            .with_foreign_keys(true)
            .with_busy_timeout(Duration::from_millis(250));
        let mut db = AsyncSqlite::with_config(config);
        db.open().await.unwrap();

        let fk: Option<i64> = db
            .get_row("PRAGMA foreign_keys", ())
            .await
            .unwrap()
            .and_then(|row| row.get_index(0).and_then(Value::as_i64));
        assert_eq!(fk, Some(1));

        let timeout: Option<i64> = db
            .get_row("PRAGMA busy_timeout", ())
            .await
            .unwrap()
            .and_then(|row| row.get_index(0).and_then(Value::as_i64));
        assert_eq!(timeout, Some(250));
    }

    async fn foreign_keys_pragma(config: SqliteConfig) -> Option<i64> {
        let mut db = AsyncSqlite::with_config(config);
        db.open().await.unwrap();
        db.get_row("PRAGMA foreign_keys", ())
            .await
            .unwrap()
            .and_then(|row| row.get_index(0).and_then(Value::as_i64))
    }

    #[tokio::test]
    async fn foreign_keys_follow_config() {
        let default = SqliteConfig::new(":memory:", OpenMode::Write);
        assert_eq!(foreign_keys_pragma(default.clone()).await, Some(0));
        assert_eq!(foreign_keys_pragma(default.with_foreign_keys(true)).await, Some(1));

        let config: SqliteConfig =
            serde_json::from_str(r#"{"db_path": ":memory:", "foreign_keys": false}"#).unwrap();
        assert_eq!(foreign_keys_pragma(config).await, Some(0));
    }

    #[test]
    fn test_busy_timeout_saturates() {
        let config = SqliteConfig::new(":memory:", OpenMode::Write).with_busy_timeout(Duration::MAX);
        assert_eq!(config.busy_timeout_ms, Some(u64::MAX));
    }

    #[tokio::test]
    async fn exec_runs_multiple_statements() {
        let mut db = AsyncSqlite::new(":memory:", OpenMode::Write);
        db.open().await.unwrap();
        db.exec("CREATE TABLE a (x); CREATE TABLE b (y); INSERT INTO a VALUES (1);")
            .await
            .unwrap();
        let rows = db.all_rows("SELECT x FROM a", ()).await.unwrap();
        assert_eq!(rows.len(), 1);
    }
}
