//! Connection pool lifecycle: lazy database creation, per-connection setup,
//! scoped acquisition, and teardown.

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use postgres::error::SqlState;
use postgres::{Client, NoTls};
use r2d2::{ManageConnection, Pool, PooledConnection};
use serde::Deserialize;

use crate::error::DbError;
use crate::query::quote_ident;

const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Where to connect.
#[derive(Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConnectionTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Name of the database the pool serves. Created on first open if it
    /// does not exist.
    pub database: String,
    /// Per-statement timeout in seconds, enforced server-side through
    /// `statement_timeout`. `None` disables it.
    pub command_timeout_secs: Option<f64>,
    /// Database used for `CREATE DATABASE` / `DROP DATABASE`.
    pub maintenance_database: String,
}

impl Default for ConnectionTarget {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "recc".to_string(),
            password: String::new(),
            database: "recc".to_string(),
            command_timeout_secs: None,
            maintenance_database: "template1".to_string(),
        }
    }
}

impl fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("command_timeout_secs", &self.command_timeout_secs)
            .field("maintenance_database", &self.maintenance_database)
            .finish()
    }
}

impl ConnectionTarget {
    fn config_for(&self, database: &str) -> postgres::Config {
        let mut config = postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .user(&self.user)
            .dbname(database)
            .application_name("recc");
        if !self.password.is_empty() {
            config.password(&self.password);
        }
        config
    }

    fn command_timeout(&self) -> Option<Duration> {
        positive_secs(self.command_timeout_secs)
    }
}

/// Sizing and recycling limits for the pool.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct PoolLimits {
    /// Idle connections the pool tries to keep open.
    pub min_size: u32,
    /// Maximum number of pooled connections.
    pub max_size: u32,
    /// Dispatches a connection may serve before it is recycled. Zero
    /// disables recycling.
    ///
    /// A dispatch is one checkout of the client: each pooled operation on
    /// [`Database`] counts once, and a whole transaction (including the
    /// schema bootstrap) counts once however many statements it runs.
    pub max_queries: u64,
    /// Idle connections older than this are closed. Non-positive disables it.
    pub max_inactive_lifetime_secs: f64,
    /// How long `acquire` waits for a free connection.
    pub acquire_timeout_secs: f64,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            min_size: 10,
            max_size: 10,
            max_queries: 50_000,
            max_inactive_lifetime_secs: 300.0,
            acquire_timeout_secs: DEFAULT_ACQUIRE_TIMEOUT.as_secs_f64(),
        }
    }
}

fn positive_secs(secs: Option<f64>) -> Option<Duration> {
    secs.filter(|s| *s > 0.0)
        .and_then(|s| Duration::try_from_secs_f64(s).ok())
}

/// A pooled client and the number of dispatches served through it.
struct PgSession {
    client: Client,
    dispatched: u64,
}

/// r2d2 manager that runs the session setup on every new physical
/// connection.
struct SessionManager {
    config: postgres::Config,
    setup_sql: String,
    max_queries: u64,
}

impl SessionManager {
    fn new(target: &ConnectionTarget, limits: &PoolLimits) -> Self {
        Self {
            config: target.config_for(&target.database),
            setup_sql: session_setup_sql(target.command_timeout()),
            max_queries: limits.max_queries,
        }
    }
}

fn session_setup_sql(command_timeout: Option<Duration>) -> String {
    let timeout_ms = command_timeout.map_or(0, |t| t.as_millis());
    format!("SET TIME ZONE 'UTC'; SET statement_timeout = {timeout_ms};")
}

impl ManageConnection for SessionManager {
    type Connection = PgSession;
    type Error = postgres::Error;

    fn connect(&self) -> Result<PgSession, postgres::Error> {
        let mut client = self.config.connect(NoTls)?;
        client.batch_execute(&self.setup_sql)?;
        tracing::debug!("opened pooled database connection");
        Ok(PgSession {
            client,
            dispatched: 0,
        })
    }

    fn is_valid(&self, conn: &mut PgSession) -> Result<(), postgres::Error> {
        conn.client.simple_query("").map(|_| ())
    }

    fn has_broken(&self, conn: &mut PgSession) -> bool {
        if conn.client.is_closed() {
            return true;
        }
        if self.max_queries > 0 && conn.dispatched >= self.max_queries {
            tracing::debug!(
                dispatched = conn.dispatched,
                "recycling connection after reaching max queries"
            );
            return true;
        }
        false
    }
}

#[derive(Debug)]
struct TracingErrorHandler;

impl r2d2::HandleError<postgres::Error> for TracingErrorHandler {
    fn handle_error(&self, error: postgres::Error) {
        tracing::warn!(error = %error, "pooled database connection failed");
    }
}

thread_local! {
    static ACTIVE_SESSIONS: Cell<u32> = const { Cell::new(0) };
}

/// Marks a session as checked out on the current thread.
struct ThreadSession {
    _not_send: PhantomData<*const ()>,
}

impl ThreadSession {
    /// Debug builds panic if the thread already holds a session.
    fn enter() -> Self {
        ACTIVE_SESSIONS.with(|active| {
            debug_assert_eq!(active.get(), 0, "nested pooled connection acquisition");
            active.set(active.get() + 1);
        });
        Self {
            _not_send: PhantomData,
        }
    }
}

impl Drop for ThreadSession {
    fn drop(&mut self) {
        ACTIVE_SESSIONS.with(|active| active.set(active.get().saturating_sub(1)));
    }
}

/// A connection checked out of the pool. Returned to the pool on drop.
///
/// Sessions are scoped to the thread that acquired them.
pub struct PooledSession {
    conn: PooledConnection<SessionManager>,
    _thread: ThreadSession,
}

impl PooledSession {
    /// Returns the client for one dispatch.
    ///
    /// Each call counts once towards [`PoolLimits::max_queries`], whatever
    /// the caller runs on the client.
    pub fn client(&mut self) -> &mut Client {
        self.conn.dispatched += 1;
        &mut self.conn.client
    }
}

/// Pool occupancy snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub connections: u32,
    pub idle_connections: u32,
    pub max_size: u32,
}

/// Owner of the connection pool for one database target.
///
/// A handle starts closed; [`Database::open`] builds the pool and
/// [`Database::close`] tears it down. Every operation on a closed handle
/// fails with `DbError::NotOpen`. The handle is `Send + Sync` and meant to be
/// shared (e.g. behind an `Arc`) by all callers of one database.
pub struct Database {
    target: ConnectionTarget,
    limits: PoolLimits,
    pool: RwLock<Option<Pool<SessionManager>>>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("target", &self.target)
            .field("limits", &self.limits)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Database {
    /// Creates a closed handle.
    pub fn new(target: ConnectionTarget, limits: PoolLimits) -> Self {
        Self {
            target,
            limits,
            pool: RwLock::new(None),
        }
    }

    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    pub fn limits(&self) -> &PoolLimits {
        &self.limits
    }

    pub fn is_open(&self) -> bool {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Opens the pool, creating the database first if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `DbError::AlreadyOpen` if the handle is open,
    /// `DbError::ConnectFailure` if the server cannot be reached (any failure
    /// other than a missing database), or `DbError::PoolInit` if the pool
    /// cannot establish its initial connections.
    pub fn open(&self) -> Result<(), DbError> {
        let mut slot = self.pool.write().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(DbError::AlreadyOpen);
        }

        ensure_database(&self.target)?;

        let max_size = self.limits.max_size.max(1);
        let min_idle = self.limits.min_size.min(max_size);
        let acquire_timeout =
            positive_secs(Some(self.limits.acquire_timeout_secs)).unwrap_or(DEFAULT_ACQUIRE_TIMEOUT);

        let pool = Pool::builder()
            .max_size(max_size)
            .min_idle(Some(min_idle))
            .idle_timeout(positive_secs(Some(self.limits.max_inactive_lifetime_secs)))
            .connection_timeout(acquire_timeout)
            .error_handler(Box::new(TracingErrorHandler))
            .build(SessionManager::new(&self.target, &self.limits))
            .map_err(DbError::PoolInit)?;

        tracing::info!(
            host = %self.target.host,
            port = self.target.port,
            database = %self.target.database,
            max_size,
            "opened database pool"
        );

        *slot = Some(pool);
        Ok(())
    }

    /// Closes the pool. Idle connections are terminated immediately;
    /// checked-out connections are terminated when released.
    ///
    /// # Errors
    ///
    /// Returns `DbError::NotOpen` if the handle is already closed.
    pub fn close(&self) -> Result<(), DbError> {
        let pool = self
            .pool
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(DbError::NotOpen)?;
        drop(pool);
        tracing::info!(database = %self.target.database, "closed database pool");
        Ok(())
    }

    /// Drops the target database through the maintenance database.
    ///
    /// Close the handle first; the server refuses to drop a database with
    /// open sessions.
    ///
    /// # Errors
    ///
    /// Returns `DbError::ConnectFailure` if the maintenance database is
    /// unreachable, or the classified engine error of `DROP DATABASE`.
    pub fn drop_database(&self) -> Result<(), DbError> {
        drop_database(&self.target)
    }

    /// Checks a connection out of the pool, waiting up to the acquire timeout.
    ///
    /// Holding two sessions on one thread at once is a bug; debug builds
    /// assert against it.
    ///
    /// # Errors
    ///
    /// Returns `DbError::NotOpen` if the handle is closed or
    /// `DbError::AcquireTimeout` if no connection became available.
    pub fn acquire(&self) -> Result<PooledSession, DbError> {
        let pool = self.pool()?;
        let conn = pool.get().map_err(DbError::AcquireTimeout)?;

        Ok(PooledSession {
            conn,
            _thread: ThreadSession::enter(),
        })
    }

    /// Returns the current pool occupancy.
    ///
    /// # Errors
    ///
    /// Returns `DbError::NotOpen` if the handle is closed.
    pub fn status(&self) -> Result<PoolStatus, DbError> {
        let pool = self.pool()?;
        let state = pool.state();
        Ok(PoolStatus {
            connections: state.connections,
            idle_connections: state.idle_connections,
            max_size: pool.max_size(),
        })
    }

    fn pool(&self) -> Result<Pool<SessionManager>, DbError> {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(DbError::NotOpen)
    }
}

/// Probes the target database and creates it when the server reports it
/// missing. Any other connection failure is returned untouched.
fn ensure_database(target: &ConnectionTarget) -> Result<(), DbError> {
    match target.config_for(&target.database).connect(NoTls) {
        Ok(_probe) => Ok(()),
        Err(err) if err.code() == Some(&SqlState::INVALID_CATALOG_NAME) => create_database(target),
        Err(err) => Err(DbError::ConnectFailure(err)),
    }
}

fn create_database(target: &ConnectionTarget) -> Result<(), DbError> {
    tracing::info!(database = %target.database, "database does not exist, creating it");

    let mut sys = target
        .config_for(&target.maintenance_database)
        .connect(NoTls)
        .map_err(DbError::ConnectFailure)?;

    let sql = format!(
        "CREATE DATABASE {} OWNER {}",
        quote_ident(&target.database),
        quote_ident(&target.user)
    );
    match sys.batch_execute(&sql) {
        Ok(()) => {}
        // Another opener created it between our probe and this statement.
        Err(err) if err.code() == Some(&SqlState::DUPLICATE_DATABASE) => {
            tracing::debug!(database = %target.database, "database was created concurrently");
        }
        Err(err) => return Err(err.into()),
    }
    sys.close()?;
    Ok(())
}

/// Drops the target database, connecting to the maintenance database rather
/// than going through a pool.
///
/// # Errors
///
/// Returns `DbError::ConnectFailure` if the maintenance database is
/// unreachable, or the classified engine error of `DROP DATABASE`.
pub fn drop_database(target: &ConnectionTarget) -> Result<(), DbError> {
    let mut sys = target
        .config_for(&target.maintenance_database)
        .connect(NoTls)
        .map_err(DbError::ConnectFailure)?;
    sys.batch_execute(&format!("DROP DATABASE {}", quote_ident(&target.database)))?;
    sys.close()?;
    tracing::info!(database = %target.database, "dropped database");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_limits() {
        let limits = PoolLimits::default();
        assert_eq!(limits.min_size, 10);
        assert_eq!(limits.max_size, 10);
        assert_eq!(limits.max_queries, 50_000);
        assert_eq!(limits.max_inactive_lifetime_secs, 300.0);

        let target = ConnectionTarget::default();
        assert_eq!(target.port, 5432);
        assert_eq!(target.maintenance_database, "template1");
    }

    #[test]
    fn debug_output_redacts_password() {
        let target = ConnectionTarget {
            password: "hunter2".to_string(),
            ..ConnectionTarget::default()
        };
        let rendered = format!("{target:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn invalid_durations_are_disabled() {
        assert_eq!(positive_secs(None), None);
        assert_eq!(positive_secs(Some(0.0)), None);
        assert_eq!(positive_secs(Some(-3.0)), None);
        assert_eq!(positive_secs(Some(f64::NAN)), None);
        assert_eq!(positive_secs(Some(1.5)), Some(Duration::from_millis(1_500)));
    }

    #[test]
    fn session_setup_sets_statement_timeout() {
        assert_eq!(
            session_setup_sql(Some(Duration::from_millis(2_500))),
            "SET TIME ZONE 'UTC'; SET statement_timeout = 2500;"
        );
        assert_eq!(
            session_setup_sql(None),
            "SET TIME ZONE 'UTC'; SET statement_timeout = 0;"
        );
    }

    #[test]
    fn sequential_sessions_on_one_thread_are_allowed() {
        drop(ThreadSession::enter());
        let _session = ThreadSession::enter();
        ACTIVE_SESSIONS.with(|active| assert_eq!(active.get(), 1));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "nested pooled connection acquisition")]
    fn nested_acquisition_is_caught_in_debug_builds() {
        let _outer = ThreadSession::enter();
        let _inner = ThreadSession::enter();
    }

    #[test]
    fn sessions_on_other_threads_are_independent() {
        let _session = ThreadSession::enter();
        std::thread::spawn(|| drop(ThreadSession::enter()))
            .join()
            .expect("a fresh thread holds no session");
    }

    #[test]
    fn closed_handle_fails_fast() {
        let db = Database::new(ConnectionTarget::default(), PoolLimits::default());
        assert!(!db.is_open());
        assert!(matches!(db.acquire(), Err(DbError::NotOpen)));
        assert!(matches!(db.status(), Err(DbError::NotOpen)));
        assert!(matches!(db.close(), Err(DbError::NotOpen)));
    }
}
