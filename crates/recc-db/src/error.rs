//! Error taxonomy for the persistence core.

use std::fmt;

use postgres::error::SqlState;
use thiserror::Error;

/// Errors surfaced by every operation of the persistence core.
///
/// Engine errors are classified on the way out (see the `From<postgres::Error>`
/// impl) so callers can match on the failure kind without inspecting SQLSTATE
/// codes themselves. Nothing here is retried automatically.
#[derive(Debug, Error)]
pub enum DbError {
    /// The server was unreachable or rejected the credentials.
    #[error("failed to connect to database: {0}")]
    ConnectFailure(#[source] postgres::Error),

    /// The pool could not establish its initial connections.
    #[error("failed to create database connection pool: {0}")]
    PoolInit(#[source] r2d2::Error),

    /// The handle was never opened or has already been closed.
    #[error("database handle is not open")]
    NotOpen,

    /// `open` was called on a handle that already owns a pool.
    #[error("database handle is already open")]
    AlreadyOpen,

    /// No pooled connection became available within the acquire timeout.
    #[error("timed out waiting for a pooled connection: {0}")]
    AcquireTimeout(#[source] r2d2::Error),

    /// The server cancelled a statement after `statement_timeout` elapsed.
    #[error("statement timed out: {0}")]
    QueryTimeout(#[source] postgres::Error),

    /// An UPDATE was requested with no fields to assign.
    #[error("update of '{table}' has no fields to set")]
    EmptyUpdate {
        /// Target table.
        table: String,
    },

    /// An UPDATE or DELETE had no predicate terms and was not explicitly
    /// marked as unscoped.
    #[error("{statement} on '{table}' has no predicate; use Predicate::unscoped() to affect every row")]
    Unscoped {
        /// Target table.
        table: String,
        /// `UPDATE` or `DELETE`.
        statement: &'static str,
    },

    /// The query returned no row (or a NULL value) where one was required.
    #[error("the query result does not exist")]
    NotFound,

    /// A scalar decoded to a different kind than the caller declared.
    #[error("expected a value of type '{expected}', found '{found}'")]
    TypeMismatch {
        /// Kind requested by the caller.
        expected: &'static str,
        /// Kind actually decoded from the column.
        found: &'static str,
    },

    /// A result column has a type the row codec does not handle.
    #[error("column '{column}' has unsupported type '{type_name}'")]
    UnsupportedColumn {
        /// Column name as reported by the server.
        column: String,
        /// PostgreSQL type name.
        type_name: String,
    },

    /// A row could not be mapped onto the requested record type.
    #[error("failed to decode row into record: {0}")]
    Decode(#[source] serde_json::Error),

    /// A uniqueness, foreign-key, not-null or check constraint was violated.
    #[error("constraint violation: {0}")]
    ConstraintViolation(#[source] postgres::Error),

    /// A statement of the schema bootstrap failed; the whole bootstrap
    /// transaction was rolled back.
    #[error("schema bootstrap failed during {stage}: {source}")]
    BootstrapFailure {
        /// The step that failed.
        stage: BootstrapStage,
        /// The underlying failure.
        #[source]
        source: Box<DbError>,
    },

    /// Any other error reported by the server or the driver.
    #[error("database error: {0}")]
    Query(#[source] postgres::Error),
}

impl DbError {
    /// Returns the SQLSTATE of the underlying engine error, if any.
    pub fn sql_state(&self) -> Option<&SqlState> {
        match self {
            Self::ConnectFailure(e)
            | Self::QueryTimeout(e)
            | Self::ConstraintViolation(e)
            | Self::Query(e) => e.code(),
            Self::BootstrapFailure { source, .. } => source.sql_state(),
            _ => None,
        }
    }

    /// Wraps this error as a failure of the given bootstrap stage.
    pub(crate) fn in_stage(self, stage: BootstrapStage) -> Self {
        match self {
            already @ Self::BootstrapFailure { .. } => already,
            other => Self::BootstrapFailure {
                stage,
                source: Box::new(other),
            },
        }
    }
}

impl From<postgres::Error> for DbError {
    fn from(err: postgres::Error) -> Self {
        match err.code() {
            Some(code) if *code == SqlState::QUERY_CANCELED => Self::QueryTimeout(err),
            // Class 23: integrity constraint violation.
            Some(code) if code.code().starts_with("23") => Self::ConstraintViolation(err),
            _ => Self::Query(err),
        }
    }
}

/// Steps of the schema bootstrap, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStage {
    Begin,
    Tables,
    Indices,
    Views,
    Functions,
    VersionCheck,
    SeedPermissions,
    SeedRoles,
    SeedRolePermissions,
    VersionStamp,
    Commit,
}

impl BootstrapStage {
    /// Returns the stage name used in logs and error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Begin => "begin",
            Self::Tables => "tables",
            Self::Indices => "indices",
            Self::Views => "views",
            Self::Functions => "functions",
            Self::VersionCheck => "version_check",
            Self::SeedPermissions => "seed_permissions",
            Self::SeedRoles => "seed_roles",
            Self::SeedRolePermissions => "seed_role_permissions",
            Self::VersionStamp => "version_stamp",
            Self::Commit => "commit",
        }
    }
}

impl fmt::Display for BootstrapStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
