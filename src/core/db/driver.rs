/// Driver Module
///
/// The narrow interface to the underlying database client. The rest of the
/// crate only ever talks to a database through these two traits: open a
/// connection, run SQL that returns rows, run SQL that returns success, and
/// disconnect.
use crate::core::db::record::Mode;
use crate::core::db::recordset::Recordset;
use crate::core::Result;
use std::fmt;
use std::sync::Arc;

/// Connection parameters handed to a driver.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub db_name: String,
}

impl fmt::Debug for ConnectParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("db_name", &self.db_name)
            .finish()
    }
}

/// Opens connections to a database.
pub trait Driver: Send + Sync + 'static {
    /// Establishes a new connection.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` when the database cannot be reached.
    fn connect(&self, params: &ConnectParams) -> Result<Box<dyn Connection>>;
}

impl<D: Driver + ?Sized> Driver for Arc<D> {
    fn connect(&self, params: &ConnectParams) -> Result<Box<dyn Connection>> {
        (**self).connect(params)
    }
}

/// One live connection. Executes a single statement at a time.
pub trait Connection: Send {
    /// Runs a row-returning statement and decodes every row.
    ///
    /// # Errors
    ///
    /// `DbError::Query` when the SQL is rejected, `DbError::Connection` when
    /// the connection itself failed.
    fn query(&mut self, sql: &str, mode: Mode) -> Result<Recordset>;

    /// Runs a statement for its effect and returns the affected row count.
    fn execute(&mut self, sql: &str) -> Result<u64>;

    /// Disconnects cleanly.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Represents different SQL statement types for introspection
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatementType {
    /// SELECT statement
    Select,
    /// INSERT statement
    Insert,
    /// UPDATE statement
    Update,
    /// DELETE statement
    Delete,
    /// CREATE statement
    Create,
    /// DROP statement
    Drop,
    /// ALTER statement
    Alter,
    /// BEGIN/COMMIT/ROLLBACK transaction commands
    Transaction,
    /// Other statement types
    Other,
}

impl StatementType {
    /// Determines the statement type from the leading keyword of a SQL string
    pub fn from_sql(sql: &str) -> Self {
        let keyword = sql
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .trim_end_matches(';')
            .to_uppercase();

        match keyword.as_str() {
            "SELECT" | "WITH" => StatementType::Select,
            "INSERT" | "REPLACE" => StatementType::Insert,
            "UPDATE" => StatementType::Update,
            "DELETE" => StatementType::Delete,
            "CREATE" => StatementType::Create,
            "DROP" => StatementType::Drop,
            "ALTER" => StatementType::Alter,
            "BEGIN" | "COMMIT" | "ROLLBACK" | "END" => StatementType::Transaction,
            _ => StatementType::Other,
        }
    }
}

/// Returns the table a simple single-table `SELECT` reads from.
///
/// Joins, comma-separated sources and subqueries yield `None`.
pub fn source_table(sql: &str) -> Option<String> {
    if StatementType::from_sql(sql) != StatementType::Select {
        return None;
    }
    let tokens: Vec<&str> = sql.split_whitespace().collect();
    let from = tokens.iter().position(|t| t.eq_ignore_ascii_case("FROM"))?;
    let table = tokens.get(from + 1)?.trim_end_matches(';');
    if table.is_empty() || table.starts_with('(') || table.contains(',') {
        return None;
    }
    let is_join = tokens[from + 1..]
        .iter()
        .any(|t| t.eq_ignore_ascii_case("JOIN") || t.starts_with(','));
    if is_join {
        return None;
    }
    let table = table.trim_matches(|c| c == '"' || c == '`' || c == '[' || c == ']');
    Some(table.to_string())
}
