/// # Test Utilities Module
///
/// Testing infrastructure shared by the unit tests:
/// - A scripted in-process driver that records when each statement started
///   and finished, and how many ran at once
/// - SQLite fixtures on temporary files
/// - Log initialization and completion draining helpers
use crate::core::db::driver::{ConnectParams, Connection, Driver};
use crate::core::db::field::{Field, FieldValue};
use crate::core::db::record::{Mode, Record};
use crate::core::db::recordset::Recordset;
use crate::core::{DbError, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Installs a test-friendly tracing subscriber once per process.
pub fn init_test_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

/// Calls `flush` until it has reported `expected` deliveries in total.
///
/// Panics after five seconds so a lost completion fails the test instead of
/// hanging it.
pub fn flush_until(mut flush: impl FnMut() -> usize, expected: usize) -> usize {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut delivered = 0;
    while delivered < expected {
        delivered += flush();
        if delivered >= expected {
            break;
        }
        assert!(
            Instant::now() < deadline,
            "only {} of {} completions delivered",
            delivered,
            expected
        );
        thread::sleep(Duration::from_millis(2));
    }
    delivered
}

/// One statement run by a scripted connection.
#[derive(Debug, Clone)]
pub struct Execution {
    pub sql: String,
    pub started: Instant,
    pub finished: Instant,
}

#[derive(Default)]
struct Probe {
    open: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    log: Mutex<Vec<Execution>>,
}

/// A driver whose connections interpret the SQL text as a script:
///
/// - `SLEEP <ms> ...` holds the connection for `<ms>` milliseconds
/// - `FAIL_CONNECTION` fails as if the connection dropped
/// - anything else starting with `FAIL` fails as rejected SQL
///
/// Reads return one record with a `sql` field echoing the statement.
pub struct ScriptedDriver {
    probe: Arc<Probe>,
    reachable: AtomicBool,
    pub connects: AtomicUsize,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        init_test_logging();
        ScriptedDriver {
            probe: Arc::new(Probe::default()),
            reachable: AtomicBool::new(true),
            connects: AtomicUsize::new(0),
        }
    }

    pub fn unreachable() -> Self {
        let driver = ScriptedDriver::new();
        driver.set_reachable(false);
        driver
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn open_connections(&self) -> usize {
        self.probe.open.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.probe.max_in_flight.load(Ordering::SeqCst)
    }

    /// Executions whose SQL contains `pattern`, ordered by start time.
    pub fn executions_matching(&self, pattern: &str) -> Vec<Execution> {
        let mut runs: Vec<Execution> = self
            .probe
            .log
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.sql.contains(pattern))
            .cloned()
            .collect();
        runs.sort_by_key(|e| e.started);
        runs
    }
}

impl Driver for ScriptedDriver {
    fn connect(&self, _params: &ConnectParams) -> Result<Box<dyn Connection>> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(DbError::Connection("scripted host unreachable".to_string()));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.probe.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedConnection {
            probe: self.probe.clone(),
        }))
    }
}

struct ScriptedConnection {
    probe: Arc<Probe>,
}

impl ScriptedConnection {
    fn run(&self, sql: &str) -> Result<()> {
        let running = self.probe.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let started = Instant::now();

        let mut words = sql.split_whitespace();
        let outcome = match words.next() {
            Some("SLEEP") => {
                let ms = words.next().and_then(|w| w.parse().ok()).unwrap_or(0);
                thread::sleep(Duration::from_millis(ms));
                Ok(())
            }
            Some("FAIL_CONNECTION") => Err(DbError::Connection("scripted disconnect".into())),
            Some(word) if word.starts_with("FAIL") => Err(DbError::Query("scripted failure".into())),
            _ => Ok(()),
        };

        self.probe.log.lock().unwrap().push(Execution {
            sql: sql.to_string(),
            started,
            finished: Instant::now(),
        });
        self.probe.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

impl Connection for ScriptedConnection {
    fn query(&mut self, sql: &str, mode: Mode) -> Result<Recordset> {
        self.run(sql)?;
        let mut record = Record::new(1, "scripted", mode);
        record.write_field(0, Field::new("sql", FieldValue::Str(sql.to_string())))?;
        Ok(Recordset::from(vec![record]))
    }

    fn execute(&mut self, sql: &str) -> Result<u64> {
        self.run(sql)?;
        Ok(1)
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

impl Drop for ScriptedConnection {
    fn drop(&mut self) {
        self.probe.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A SQLite database file that lives as long as the fixture.
pub struct SqliteFixture {
    _dir: TempDir,
    pub path: String,
}

impl SqliteFixture {
    pub fn new() -> Self {
        init_test_logging();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("game.db").to_string_lossy().into_owned();
        SqliteFixture { _dir: dir, path }
    }

    pub fn params(&self) -> ConnectParams {
        ConnectParams {
            host: "localhost".to_string(),
            port: 0,
            user: "game".to_string(),
            password: "secret".to_string(),
            db_name: self.path.clone(),
        }
    }
}
