/// Database Module
///
/// ## Architecture
///
/// Leaves first:
/// - **Values** (`field.rs`, `record.rs`, `recordset.rs`): typed cells, rows
///   with change tracking, and the row collections queries return
/// - **Driver seam** (`driver.rs`, `sqlite.rs`): the narrow interface to the
///   database client and its rusqlite implementation
/// - **Execution** (`pool.rs`, `scheduler.rs`): pooled connections and the
///   per-key serialized async queue
/// - **Facade** (`database.rs`): init/destroy/flush and the query forms
///
/// ## Error Handling
///
/// All operations use `DbError`. Connectivity and SQL failures are
/// recoverable; type, name and index errors are contract violations.
pub mod database;
pub mod driver;
pub mod field;
pub mod pool;
pub mod record;
pub mod recordset;
pub mod scheduler;
pub mod sqlite;

pub use database::Database;
pub use driver::{ConnectParams, Connection, Driver, StatementType};
pub use field::{Field, FieldType, FieldValue};
pub use pool::{ConnectionPool, PooledConnection};
pub use record::{FieldIndex, Mode, Record};
pub use recordset::Recordset;
pub use scheduler::{AsyncScheduler, BoolCallback, QueryKind, RecordsetCallback};
pub use sqlite::{SqliteDriver, SqliteOptions};
