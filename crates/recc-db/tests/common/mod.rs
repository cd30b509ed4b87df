//! Shared fixtures for the live-database tests.
//!
//! These tests need a reachable PostgreSQL server whose user may create
//! databases. They run only when `RECC_TEST_PG_HOST` is set; otherwise each
//! test returns early. `RECC_TEST_PG_PORT`, `RECC_TEST_PG_USER` and
//! `RECC_TEST_PG_PASSWORD` override the remaining connection defaults.

#![allow(dead_code)]

use std::ops::Deref;

use recc_db::{create_schema, ConnectionTarget, Database, PoolLimits};

pub fn test_target(name: &str) -> Option<ConnectionTarget> {
    let host = std::env::var("RECC_TEST_PG_HOST").ok()?;
    let defaults = ConnectionTarget::default();
    Some(ConnectionTarget {
        host,
        port: std::env::var("RECC_TEST_PG_PORT")
            .ok()
            .and_then(|port| port.parse().ok())
            .unwrap_or(defaults.port),
        user: std::env::var("RECC_TEST_PG_USER").unwrap_or(defaults.user),
        password: std::env::var("RECC_TEST_PG_PASSWORD").unwrap_or(defaults.password),
        database: format!("recc_test_{}_{}", name, std::process::id()),
        command_timeout_secs: Some(10.0),
        ..ConnectionTarget::default()
    })
}

pub fn test_limits() -> PoolLimits {
    PoolLimits {
        min_size: 1,
        max_size: 4,
        acquire_timeout_secs: 5.0,
        ..PoolLimits::default()
    }
}

/// Whether the server's catalog lists the target database.
///
/// Asks through the `postgres` database: a session on `template1` would make
/// concurrent `CREATE DATABASE` calls of other tests fail.
pub fn database_exists(target: &ConnectionTarget) -> bool {
    let mut config = postgres::Config::new();
    config
        .host(&target.host)
        .port(target.port)
        .user(&target.user)
        .dbname("postgres");
    if !target.password.is_empty() {
        config.password(&target.password);
    }
    let mut client = config
        .connect(postgres::NoTls)
        .expect("catalog connection should open");
    client
        .query_one(
            "SELECT EXISTS (SELECT 1 FROM pg_database WHERE datname = $1)",
            &[&target.database],
        )
        .expect("catalog query should succeed")
        .get(0)
}

/// A database that exists for the duration of one test.
///
/// Dropping it closes the pool and drops the database.
pub struct TestDb {
    db: Database,
}

impl TestDb {
    /// Opens (and thereby creates) a fresh database.
    pub fn open(name: &str) -> Option<Self> {
        Self::open_with(name, test_limits())
    }

    /// [`TestDb::open`] with custom pool limits.
    pub fn open_with(name: &str, limits: PoolLimits) -> Option<Self> {
        let target = test_target(name)?;
        // Leftovers from an aborted run with the same pid.
        let _ = recc_db::drop_database(&target);

        let db = Database::new(target, limits);
        db.open().expect("test database should open");
        Some(Self { db })
    }

    /// Opens a fresh database and bootstraps the schema.
    pub fn bootstrapped(name: &str) -> Option<Self> {
        let test_db = Self::open(name)?;
        create_schema(&test_db).expect("bootstrap should succeed");
        Some(test_db)
    }
}

impl Deref for TestDb {
    type Target = Database;

    fn deref(&self) -> &Database {
        &self.db
    }
}

impl Drop for TestDb {
    fn drop(&mut self) {
        if self.db.is_open() {
            let _ = self.db.close();
        }
        let _ = self.db.drop_database();
    }
}
