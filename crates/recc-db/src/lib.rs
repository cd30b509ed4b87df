//! Persistence core for recc.
//!
//! Provides PostgreSQL connection pooling (via `r2d2`) with lazy database
//! creation, a parameterized query builder over sparse field sets, typed
//! row mapping, and the idempotent schema bootstrap. Every table of the
//! platform is created through [`create_schema`].
//!
//! # Design decisions
//!
//! - **Synchronous driver behind `r2d2`**: callers block on a bounded pool;
//!   a [`Database`] handle is `Send + Sync` and shared by reference.
//! - **Presence is explicit**: a [`FieldSet`] column is either absent or set,
//!   and set may mean NULL. UPDATE statements assign exactly the set
//!   columns.
//! - **Scoped writes**: UPDATE and DELETE refuse an empty [`Predicate`]
//!   unless it was built with [`Predicate::unscoped`].
//! - **Structural mapping**: rows become records by column name through
//!   `serde`, so a record type is just a `Deserialize` struct.
//! - **Embedded schema**: the DDL is compiled into the crate with
//!   `include_str!` and is guarded by a version row in the `info` table.

pub mod accessors;
mod bootstrap;
mod codec;
mod error;
mod mapper;
mod pool;
mod query;

pub use bootstrap::{create_schema, drop_schema, schema_version, BootstrapOutcome};
pub use codec::{Scalar, Value};
pub use error::{BootstrapStage, DbError};
pub use mapper::{
    execute, execute_batch, fetch_many, fetch_one, fetch_records, fetch_scalar, Record,
};
pub use pool::{
    drop_database, ConnectionTarget, Database, PoolLimits, PoolStatus, PooledSession,
};
pub use postgres::{GenericClient, Transaction};
pub use query::{quote_ident, Batch, FieldSet, Predicate, QueryPlan};

/// Query builder functions, namespaced to keep `insert`/`update`/`delete`
/// distinct from the pooled [`Database`] methods of the same name.
pub mod sql {
    pub use crate::query::{delete, insert, select, update};
}

/// Schema version stamped into the `info` table on first bootstrap.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
