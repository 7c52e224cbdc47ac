/// Database Facade Module
///
/// The public entry point. A `Database` owns its pools and the async
/// scheduler between `init` and `destroy`; nothing is kept in global state,
/// so several independent databases can live in one process.
use crate::config::{Config, DbConfig, SyncPath};
use crate::core::db::driver::Driver;
use crate::core::db::pool::ConnectionPool;
use crate::core::db::record::Mode;
use crate::core::db::recordset::Recordset;
use crate::core::db::scheduler::{AsyncScheduler, QueryKind};
use crate::core::db::sqlite::{SqliteDriver, SqliteOptions};
use crate::core::{DbError, Result};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

struct DbContext {
    async_pool: Arc<ConnectionPool>,
    /// `None` when synchronous calls share the async pool.
    sync_pool: Option<ConnectionPool>,
    scheduler: AsyncScheduler,
}

impl DbContext {
    fn sync_pool(&self) -> &ConnectionPool {
        self.sync_pool.as_ref().unwrap_or(&*self.async_pool)
    }
}

pub struct Database {
    driver: Arc<dyn Driver>,
    context: Option<DbContext>,
}

impl Default for Database {
    fn default() -> Self {
        Database::new()
    }
}

impl Database {
    /// Creates an uninitialized database backed by SQLite.
    pub fn new() -> Self {
        Database::with_driver(SqliteDriver::default())
    }

    pub fn sqlite(options: SqliteOptions) -> Self {
        Database::with_driver(SqliteDriver::new(options))
    }

    /// Creates an uninitialized database on top of any driver.
    pub fn with_driver(driver: impl Driver) -> Self {
        Database {
            driver: Arc::new(driver),
            context: None,
        }
    }

    /// Opens a SQLite-backed database from a loaded configuration file.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut db = Database::sqlite(config.sqlite.clone());
        db.init_with_config(&config.database)?;
        Ok(db)
    }

    /// Connects the async pool of `async_conn_num` connections (plus the
    /// dedicated sync connection) and starts the async workers.
    ///
    /// # Errors
    ///
    /// `DbError::Connection` if no connection could be opened,
    /// `DbError::Config` for a zero-sized pool, `DbError::AlreadyInitialized`
    /// if called twice without `destroy`.
    pub fn init(
        &mut self,
        host: &str,
        port: u16,
        user: &str,
        password: &str,
        db_name: &str,
        async_conn_num: usize,
    ) -> Result<()> {
        let config = DbConfig {
            host: host.to_string(),
            port,
            user: user.to_string(),
            password: password.to_string(),
            db_name: db_name.to_string(),
            async_conn_num,
            sync_path: SyncPath::default(),
        };
        self.init_with_config(&config)
    }

    pub fn init_with_config(&mut self, config: &DbConfig) -> Result<()> {
        if self.context.is_some() {
            return Err(DbError::AlreadyInitialized);
        }
        config.validate()?;
        let params = config.connect_params();

        // Pools close their connections when dropped, so an early return
        // below leaves nothing half-open.
        let async_pool = Arc::new(ConnectionPool::open(
            "async",
            Arc::clone(&self.driver),
            params.clone(),
            config.async_conn_num,
        )?);
        let sync_pool = match config.sync_path {
            SyncPath::Dedicated => Some(ConnectionPool::open(
                "sync",
                Arc::clone(&self.driver),
                params,
                1,
            )?),
            SyncPath::Shared => None,
        };
        let scheduler = AsyncScheduler::start(Arc::clone(&async_pool), async_pool.live())?;

        info!(
            "Database {} initialized ({} async connections, {:?} sync path)",
            config.db_name,
            async_pool.live(),
            config.sync_path
        );
        self.context = Some(DbContext {
            async_pool,
            sync_pool,
            scheduler,
        });
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.context.is_some()
    }

    fn context(&self) -> Result<&DbContext> {
        self.context.as_ref().ok_or(DbError::NotInitialized)
    }

    /// Stops the async workers, drops queued work without running its
    /// callbacks and disconnects every connection. Safe to call at any time.
    pub fn destroy(&mut self) {
        let Some(mut context) = self.context.take() else {
            return;
        };
        context.scheduler.shutdown();
        context.async_pool.close();
        if let Some(sync_pool) = &context.sync_pool {
            sync_pool.close();
        }
        info!("Database destroyed");
    }

    /// Delivers completed async results on the calling thread. Returns the
    /// number of callbacks invoked.
    pub fn flush(&self) -> usize {
        match &self.context {
            Some(context) => context.scheduler.flush(),
            None => 0,
        }
    }

    /// Async queries queued or running.
    pub fn pending(&self) -> usize {
        self.context.as_ref().map_or(0, |c| c.scheduler.pending())
    }

    /// Runs a read query and returns its rows.
    ///
    /// # Errors
    ///
    /// `DbError::Query` if the SQL was rejected; an empty result is an empty
    /// recordset, not an error.
    pub fn query(&self, sql: &str, mode: Mode) -> Result<Recordset> {
        let context = self.context()?;
        let mut conn = context.sync_pool().acquire()?;
        let result = conn.query(sql, mode);
        conn.observe(&result);
        match &result {
            Ok(records) => debug!("Query returned {} records: {}", records.len(), sql),
            Err(e) => error!("Query failed: {}: {}", e, sql),
        }
        result
    }

    /// Runs a statement for its effect.
    ///
    /// Returns `Ok(false)` when the database rejects the SQL; only a lost
    /// connection is an `Err`.
    pub fn execute(&self, sql: &str) -> Result<bool> {
        let context = self.context()?;
        let mut conn = context.sync_pool().acquire()?;
        match conn.execute(sql) {
            Ok(affected) => {
                debug!("Statement affected {} rows: {}", affected, sql);
                Ok(true)
            }
            Err(e) if e.is_connection_error() => {
                conn.mark_broken();
                error!("Statement lost its connection: {}", e);
                Err(e)
            }
            Err(e) => {
                warn!("Statement failed: {}: {}", e, sql);
                Ok(false)
            }
        }
    }

    /// Queues a read under `key`. `callback` fires once from `flush`, with
    /// `None` if the query failed.
    pub fn query_async<F>(&self, key: u64, sql: &str, mode: Mode, callback: F) -> Result<()>
    where
        F: FnOnce(Option<Recordset>) + Send + 'static,
    {
        let context = self.context()?;
        context.scheduler.enqueue(
            key,
            sql,
            QueryKind::Read {
                mode,
                callback: Box::new(callback),
            },
        );
        Ok(())
    }

    /// Queues a statement under `key`. `callback` fires once from `flush`
    /// with the success flag.
    pub fn execute_async<F>(&self, key: u64, sql: &str, callback: F) -> Result<()>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let context = self.context()?;
        context.scheduler.enqueue(
            key,
            sql,
            QueryKind::Write {
                callback: Box::new(callback),
            },
        );
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{flush_until, ScriptedDriver, SqliteFixture};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn sqlite_db(fixture: &SqliteFixture, conns: usize) -> Database {
        let mut db = Database::new();
        let p = fixture.params();
        db.init(&p.host, p.port, &p.user, &p.password, &p.db_name, conns)
            .unwrap();
        db
    }

    #[test]
    fn test_select_one() {
        let fixture = SqliteFixture::new();
        let db = sqlite_db(&fixture, 2);
        let set = db.query("SELECT 1", Mode::Read).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.get_record(0).unwrap().get_int(0).unwrap(), 1);
    }

    #[test]
    fn test_unreachable_host_fails_cleanly() {
        let mut db = Database::new();
        let result = db.init("db.invalid", 3306, "u", "p", "/nonexistent/dir/game.db", 2);
        assert!(matches!(result, Err(DbError::Connection(_))));
        assert!(!db.is_initialized());
        db.destroy();
        db.destroy();
        assert!(matches!(db.query("SELECT 1", Mode::Read), Err(DbError::NotInitialized)));
    }

    #[test]
    fn test_no_half_open_connections_after_failed_init() {
        let driver = Arc::new(ScriptedDriver::unreachable());
        let mut db = Database::with_driver(driver.clone());
        assert!(db.init_with_config(&DbConfig::new("x")).is_err());
        assert_eq!(driver.open_connections(), 0);
    }

    #[test]
    fn test_uninitialized_calls() {
        let db = Database::new();
        assert_eq!(db.flush(), 0);
        assert_eq!(db.pending(), 0);
        assert!(matches!(db.execute("DELETE FROM t"), Err(DbError::NotInitialized)));
        assert!(matches!(
            db.execute_async(1, "DELETE FROM t", |_| {}),
            Err(DbError::NotInitialized)
        ));
    }

    #[test]
    fn test_init_twice_and_zero_pool() {
        let fixture = SqliteFixture::new();
        let mut db = sqlite_db(&fixture, 1);
        assert!(matches!(
            db.init("", 0, "", "", &fixture.path, 1),
            Err(DbError::AlreadyInitialized)
        ));

        let mut other = Database::new();
        assert!(matches!(
            other.init("", 0, "", "", &fixture.path, 0),
            Err(DbError::Config(_))
        ));
    }

    #[test]
    fn test_write_failure_returns_false() {
        let fixture = SqliteFixture::new();
        let db = sqlite_db(&fixture, 1);
        assert!(db.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)").unwrap());
        assert!(db.execute("INSERT INTO t (v) VALUES ('a')").unwrap());
        assert!(!db.execute("INSERT INTO missing VALUES (1)").unwrap());
    }

    #[test]
    fn test_read_failure_differs_from_empty() {
        let fixture = SqliteFixture::new();
        let db = sqlite_db(&fixture, 1);
        db.execute("CREATE TABLE t (id INTEGER)").unwrap();
        assert!(db.query("SELECT * FROM t", Mode::Read).unwrap().is_empty());
        assert!(matches!(db.query("SELECT * FROM nope", Mode::Read), Err(DbError::Query(_))));
    }

    #[test]
    fn test_async_round_trip_on_sqlite() {
        let fixture = SqliteFixture::new();
        let db = sqlite_db(&fixture, 2);
        db.execute("CREATE TABLE player (id INTEGER PRIMARY KEY, gold INTEGER)").unwrap();
        db.execute("INSERT INTO player (id, gold) VALUES (1, 0)").unwrap();

        let writes = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let w = writes.clone();
            db.execute_async(1, "UPDATE player SET gold = gold + 1 WHERE id = 1", move |ok| {
                assert!(ok);
                w.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        db.query_async(1, "SELECT gold FROM player WHERE id = 1", Mode::Edit, move |records| {
            let records = records.unwrap();
            *s.lock().unwrap() = Some(records[0].get_int("gold").unwrap());
        })
        .unwrap();

        flush_until(|| db.flush(), 11);
        assert_eq!(writes.load(Ordering::SeqCst), 10);
        assert_eq!(*seen.lock().unwrap(), Some(10));
        assert_eq!(db.pending(), 0);
    }

    #[test]
    fn test_failed_async_read_delivers_none() {
        let fixture = SqliteFixture::new();
        let db = sqlite_db(&fixture, 1);
        let got = Arc::new(Mutex::new(Vec::new()));
        let g = got.clone();
        db.query_async(5, "SELECT * FROM nope", Mode::Read, move |records| {
            g.lock().unwrap().push(records.is_none());
        })
        .unwrap();
        flush_until(|| db.flush(), 1);
        assert_eq!(*got.lock().unwrap(), vec![true]);
    }

    #[test]
    fn test_destroy_drops_pending_callbacks() {
        let driver = Arc::new(ScriptedDriver::new());
        let mut db = Database::with_driver(driver.clone());
        db.init_with_config(&DbConfig::new("scripted")).unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let f = fired.clone();
            db.execute_async(1, "SLEEP 40 slow", move |_| {
                f.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        db.destroy();
        assert_eq!(db.flush(), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(driver.open_connections(), 0);
    }

    #[test]
    fn test_sync_path_capacity() {
        let dedicated = Arc::new(ScriptedDriver::new());
        let mut db = Database::with_driver(dedicated.clone());
        let mut config = DbConfig::new("scripted");
        config.async_conn_num = 3;
        db.init_with_config(&config).unwrap();
        assert_eq!(dedicated.open_connections(), 4);

        let shared = Arc::new(ScriptedDriver::new());
        let mut db = Database::with_driver(shared.clone());
        config.sync_path = SyncPath::Shared;
        db.init_with_config(&config).unwrap();
        assert_eq!(shared.open_connections(), 3);
        assert!(db.execute("UPDATE t").unwrap());
        assert_eq!(db.query("SELECT x", Mode::Read).unwrap().len(), 1);
    }
}
