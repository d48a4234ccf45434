//! Future-returning SQLite adapter.
//!
//! # Intention
//!
//! - Wrap one embedded SQLite connection so that `open`, `run`, `get`, `all`,
//!   `each` and `close` can be awaited.
//! - Forward SQL and parameters unchanged and surface the engine's own
//!   results and errors.
//!
//! # Architectural Boundaries
//!
//! - Storage, SQL parsing, transactions and constraints belong to SQLite.
//! - No pooling, migrations, query building or ORM mapping.
//!
//! ```no_run
//! use async_sqlite::{AsyncSqlite, OpenMode, Params};
//!
//! # async fn demo() -> async_sqlite::Result<()> {
//! let mut db = AsyncSqlite::new(":memory:", OpenMode::Write);
//! db.open().await?;
//! db.run("CREATE TABLE t (x INTEGER)", ()).await?;
//! let result = db.run("INSERT INTO t VALUES (?)", Params::new().with(1)).await?;
//! assert_eq!(result.changes, 1);
//! db.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod exemplar;
pub mod sqlite;
pub mod types;

pub use error::{Result, SqliteError};
pub use sqlite::{AsyncSqlite, OpenMode, RunResult, SqliteConfig};
pub use types::{Params, Row, Value};
