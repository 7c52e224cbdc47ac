/// Connection Pool Module
///
/// A fixed set of live connections. `acquire` blocks until one is idle and
/// hands out an exclusive guard; dropping the guard returns the connection.
/// A connection that failed at the transport level is replaced on release,
/// or dropped from the pool if the database cannot be reached again.
use crate::core::db::driver::{ConnectParams, Connection, Driver};
use crate::core::{DbError, Result};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

struct PoolState {
    idle: Vec<Box<dyn Connection>>,
    /// Connections that exist, idle or checked out.
    live: usize,
    closed: bool,
}

pub struct ConnectionPool {
    name: &'static str,
    driver: Arc<dyn Driver>,
    params: ConnectParams,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl ConnectionPool {
    /// Opens up to `size` connections.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if not a single connection could be
    /// opened. Nothing is left open in that case.
    pub fn open(
        name: &'static str,
        driver: Arc<dyn Driver>,
        params: ConnectParams,
        size: usize,
    ) -> Result<Self> {
        let mut idle = Vec::with_capacity(size);
        let mut last_error = None;
        for _ in 0..size {
            match driver.connect(&params) {
                Ok(conn) => idle.push(conn),
                Err(e) => {
                    error!("{} pool: failed to open connection: {}", name, e);
                    last_error = Some(e);
                }
            }
        }

        if idle.is_empty() {
            return Err(match last_error {
                Some(DbError::Connection(msg)) => DbError::Connection(msg),
                Some(other) => DbError::Connection(other.to_string()),
                None => DbError::Connection(format!("{} pool size must be at least 1", name)),
            });
        }
        if idle.len() < size {
            warn!("{} pool running with {} of {} connections", name, idle.len(), size);
        } else {
            info!("{} pool opened with {} connections", name, size);
        }

        let live = idle.len();
        Ok(ConnectionPool {
            name,
            driver,
            params,
            state: Mutex::new(PoolState {
                idle,
                live,
                closed: false,
            }),
            available: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Blocks until a connection is idle and checks it out.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` once the pool is closed or has lost every
    /// connection.
    pub fn acquire(&self) -> Result<PooledConnection<'_>> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return Err(DbError::Connection(format!("{} pool is closed", self.name)));
            }
            if let Some(conn) = state.idle.pop() {
                return Ok(PooledConnection {
                    pool: self,
                    conn: Some(conn),
                    broken: false,
                });
            }
            if state.live == 0 {
                return Err(DbError::Connection(format!(
                    "{} pool has no live connections",
                    self.name
                )));
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    /// Returns a connection to the pool. Equivalent to dropping the guard.
    pub fn release(&self, conn: PooledConnection<'_>) {
        drop(conn);
    }

    fn check_in(&self, conn: Box<dyn Connection>, broken: bool) {
        let conn = if broken {
            let _ = conn.close();
            match self.driver.connect(&self.params) {
                Ok(fresh) => {
                    info!("{} pool: replaced broken connection", self.name);
                    Some(fresh)
                }
                Err(e) => {
                    error!("{} pool: reconnect failed, dropping slot: {}", self.name, e);
                    None
                }
            }
        } else {
            Some(conn)
        };

        let mut state = self.lock();
        match conn {
            Some(conn) if !state.closed => state.idle.push(conn),
            Some(conn) => {
                state.live -= 1;
                drop(state);
                close_quietly(self.name, conn);
                self.available.notify_all();
                return;
            }
            None => state.live -= 1,
        }
        drop(state);
        // Waiters also need to observe a shrinking pool, so wake everyone.
        self.available.notify_all();
    }

    /// Number of connections currently alive.
    pub fn live(&self) -> usize {
        self.lock().live
    }

    pub fn idle(&self) -> usize {
        self.lock().idle.len()
    }

    /// Disconnects idle connections and refuses further checkouts.
    /// Connections checked out at this point are closed when returned.
    pub fn close(&self) {
        let idle = {
            let mut state = self.lock();
            state.closed = true;
            let idle = std::mem::take(&mut state.idle);
            state.live -= idle.len();
            idle
        };
        self.available.notify_all();
        debug!("{} pool closing {} idle connections", self.name, idle.len());
        for conn in idle {
            close_quietly(self.name, conn);
        }
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        if !self.lock().closed {
            self.close();
        }
    }
}

fn close_quietly(name: &str, conn: Box<dyn Connection>) {
    if let Err(e) = conn.close() {
        warn!("{} pool: error while disconnecting: {}", name, e);
    }
}

/// Exclusive use of one pooled connection.
pub struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    conn: Option<Box<dyn Connection>>,
    broken: bool,
}

impl PooledConnection<'_> {
    /// Flags the connection as unusable; it is replaced when returned.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Marks the connection broken if `result` carries a connectivity error.
    pub fn observe<T>(&mut self, result: &Result<T>) {
        if matches!(result, Err(e) if e.is_connection_error()) {
            self.mark_broken();
        }
    }
}

impl Deref for PooledConnection<'_> {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_deref().expect("connection present until drop")
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_deref_mut().expect("connection present until drop")
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.check_in(conn, self.broken);
        }
    }
}
