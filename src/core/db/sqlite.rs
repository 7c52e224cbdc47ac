/// SQLite Driver Module
///
/// Implements the driver interface on top of rusqlite. The database name is
/// the path of the database file; host, port and credentials have no meaning
/// for SQLite and are ignored.
use crate::core::db::driver::{source_table, ConnectParams, Connection, Driver};
use crate::core::db::field::{Field, FieldType, FieldValue};
use crate::core::db::record::{Mode, Record};
use crate::core::db::recordset::Recordset;
use crate::core::{DbError, Result};
use rusqlite::types::{Value, ValueRef};
use rusqlite::ErrorCode;
use serde::Deserialize;
use std::borrow::Cow;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Pragmas applied to every connection when it is opened.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SqliteOptions {
    pub foreign_keys: bool,
    pub journal_mode: Option<String>,
    pub busy_timeout_ms: u64,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        SqliteOptions {
            foreign_keys: true,
            journal_mode: Some("WAL".to_string()),
            busy_timeout_ms: 5000,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if matches!(
                    e.code,
                    ErrorCode::CannotOpen
                        | ErrorCode::NotADatabase
                        | ErrorCode::DatabaseCorrupt
                        | ErrorCode::SystemIoFailure
                        | ErrorCode::PermissionDenied
                ) =>
            {
                DbError::Connection(err.to_string())
            }
            _ => DbError::Query(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SqliteDriver {
    options: SqliteOptions,
}

impl SqliteDriver {
    pub fn new(options: SqliteOptions) -> Self {
        SqliteDriver { options }
    }
}

impl Driver for SqliteDriver {
    fn connect(&self, params: &ConnectParams) -> Result<Box<dyn Connection>> {
        if params.db_name.is_empty() {
            return Err(DbError::Config("database name must not be empty".to_string()));
        }
        debug!(
            "Opening sqlite database {} (host {}:{} ignored)",
            params.db_name, params.host, params.port
        );
        let conn = rusqlite::Connection::open(&params.db_name)?;

        conn.busy_timeout(Duration::from_millis(self.options.busy_timeout_ms))?;
        conn.pragma_update(None, "foreign_keys", &self.options.foreign_keys)?;
        if let Some(mode) = &self.options.journal_mode {
            let applied: String =
                conn.pragma_update_and_check(None, "journal_mode", mode, |row| row.get(0))?;
            if !applied.eq_ignore_ascii_case(mode) {
                warn!("Requested journal_mode {} but sqlite kept {}", mode, applied);
            }
        }

        Ok(Box::new(SqliteConnection {
            conn,
            meta_cache: HashMap::new(),
            schema_version: -1,
        }))
    }
}

/// Primary-key layout of a table, by column name.
#[derive(Debug, Clone, Default)]
struct TableMeta {
    key_column: Option<String>,
    auto_inc_column: Option<String>,
}

pub struct SqliteConnection {
    conn: rusqlite::Connection,
    meta_cache: HashMap<String, TableMeta>,
    schema_version: i64,
}

impl SqliteConnection {
    /// Key layout of `table`, cached until the schema changes on any
    /// connection.
    fn table_meta(&mut self, table: &str) -> Result<TableMeta> {
        let version: i64 = self
            .conn
            .query_row("PRAGMA schema_version", [], |row| row.get(0))?;
        if version != self.schema_version {
            if !self.meta_cache.is_empty() {
                debug!("Schema changed, dropping cached table metadata");
            }
            self.meta_cache.clear();
            self.schema_version = version;
        }
        if let Some(meta) = self.meta_cache.get(table) {
            return Ok(meta.clone());
        }

        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info(\"{}\")", table.replace('"', "\"\"")))?;
        let pk_columns = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?, row.get::<_, i64>(5)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|(_, _, pk)| *pk > 0)
            .collect::<Vec<_>>();

        let mut meta = TableMeta::default();
        if let [(name, type_name, _)] = pk_columns.as_slice() {
            meta.key_column = Some(name.clone());
            // An INTEGER PRIMARY KEY aliases the rowid and is assigned on insert.
            if type_name.eq_ignore_ascii_case("INTEGER") {
                meta.auto_inc_column = Some(name.clone());
            }
        }
        drop(stmt);

        self.meta_cache.insert(table.to_string(), meta.clone());
        Ok(meta)
    }

    fn total_changes(&self) -> Result<u64> {
        let total: i64 = self
            .conn
            .query_row("SELECT total_changes()", [], |row| row.get(0))?;
        Ok(total as u64)
    }
}

impl Connection for SqliteConnection {
    fn query(&mut self, sql: &str, mode: Mode) -> Result<Recordset> {
        let table = source_table(sql);
        let meta = match &table {
            Some(name) => self.table_meta(name)?,
            None => TableMeta::default(),
        };
        let table = table.unwrap_or_default();

        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<(String, Option<FieldType>)> = stmt
            .columns()
            .iter()
            .map(|c| {
                (
                    c.name().to_string(),
                    c.decl_type().and_then(FieldType::from_decl_type),
                )
            })
            .collect();
        let position = |name: &Option<String>| {
            name.as_ref()
                .and_then(|n| columns.iter().position(|(c, _)| c.eq_ignore_ascii_case(n)))
        };
        let key_idx = position(&meta.key_column);
        let auto_inc_idx = position(&meta.auto_inc_column);

        let mut cells: Vec<Vec<Value>> = Vec::new();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let values = (0..columns.len())
                .map(|i| row.get_ref(i).map(Value::from))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            cells.push(values);
        }

        // One type per column for the whole result set.
        let types: Vec<FieldType> = columns
            .iter()
            .enumerate()
            .map(|(i, (_, declared))| {
                declared.unwrap_or_else(|| infer_column_type(cells.iter().map(|row| &row[i])))
            })
            .collect();

        let mut recordset = Recordset::new();
        for row in &cells {
            let mut record = Record::new(columns.len(), table.as_str(), mode);
            for (i, ((name, _), cell)) in columns.iter().zip(row).enumerate() {
                let value = decode_cell(ValueRef::from(cell), types[i], name);
                record.write_field(i, Field::new(name.as_str(), value))?;
            }
            record.set_key_idx(key_idx)?;
            record.set_auto_inc_idx(auto_inc_idx)?;
            recordset.push(record);
        }
        Ok(recordset)
    }

    /// Runs every statement in `sql`, stopping at the first failure, and
    /// returns the rows changed across all of them.
    fn execute(&mut self, sql: &str) -> Result<u64> {
        let before = self.total_changes()?;
        self.conn.execute_batch(sql)?;
        Ok(self.total_changes()?.saturating_sub(before))
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.conn.close().map_err(|(_, e)| DbError::from(e))
    }
}

/// Field type of a column with no usable declared type.
///
/// The first non-NULL cell decides, widened from int to double if any later
/// cell is REAL. An all-NULL column (an aggregate over no rows, say) is int.
fn infer_column_type<'a>(cells: impl Iterator<Item = &'a Value>) -> FieldType {
    let mut resolved = None;
    for cell in cells {
        let cell_type = match cell {
            Value::Null => continue,
            Value::Integer(_) => FieldType::Int,
            Value::Real(_) => FieldType::Double,
            Value::Text(_) => FieldType::Str,
            Value::Blob(_) => FieldType::Blob,
        };
        resolved = match (resolved, cell_type) {
            (None, t) | (Some(FieldType::Int), t @ FieldType::Double) => Some(t),
            (kept, _) => kept,
        };
    }
    resolved.unwrap_or(FieldType::Int)
}

/// Decodes one cell into its column's field type. NULL becomes the zero
/// value; lossy conversions are logged.
fn decode_cell(value: ValueRef<'_>, field_type: FieldType, column: &str) -> FieldValue {
    match (field_type, value) {
        (_, ValueRef::Null) => FieldValue::zero(field_type),
        (FieldType::Int, ValueRef::Integer(i)) => FieldValue::Int(i),
        (FieldType::Int, ValueRef::Real(f)) => {
            let truncated = f as i64;
            if truncated as f64 != f {
                warn!(column, "Truncated REAL {} to integer {}", f, truncated);
            }
            FieldValue::Int(truncated)
        }
        (FieldType::Int, ValueRef::Text(t)) => FieldValue::Int(parse_or_zero(t, column)),
        (FieldType::Int, ValueRef::Blob(_)) => {
            warn!(column, "BLOB read as integer, using 0");
            FieldValue::Int(0)
        }
        (FieldType::Double, ValueRef::Integer(i)) => FieldValue::Double(i as f64),
        (FieldType::Double, ValueRef::Real(f)) => FieldValue::Double(f),
        (FieldType::Double, ValueRef::Text(t)) => FieldValue::Double(parse_or_zero(t, column)),
        (FieldType::Double, ValueRef::Blob(_)) => {
            warn!(column, "BLOB read as double, using 0");
            FieldValue::Double(0.0)
        }
        (FieldType::Str, ValueRef::Integer(i)) => FieldValue::Str(i.to_string()),
        (FieldType::Str, ValueRef::Real(f)) => FieldValue::Str(f.to_string()),
        (FieldType::Str, ValueRef::Text(t) | ValueRef::Blob(t)) => {
            let text = String::from_utf8_lossy(t);
            if let Cow::Owned(_) = text {
                warn!(column, "Replaced invalid UTF-8 in text value");
            }
            FieldValue::Str(text.into_owned())
        }
        (FieldType::Blob, ValueRef::Integer(i)) => FieldValue::Blob(i.to_string().into_bytes()),
        (FieldType::Blob, ValueRef::Real(f)) => FieldValue::Blob(f.to_string().into_bytes()),
        (FieldType::Blob, ValueRef::Text(b) | ValueRef::Blob(b)) => FieldValue::Blob(b.to_vec()),
    }
}

fn parse_or_zero<T: FromStr + Default>(text: &[u8], column: &str) -> T {
    let text = String::from_utf8_lossy(text);
    text.trim().parse().unwrap_or_else(|_| {
        warn!(column, "Could not parse {:?} as a number, using 0", text);
        T::default()
    })
}
