//! Schema bootstrap and teardown.
//!
//! The DDL is embedded at compile time from `schema/*.sql` and applied in a
//! fixed order: tables, indices, views, functions. Every statement is
//! `IF NOT EXISTS` / `OR REPLACE`, so the DDL half of a bootstrap is safe to
//! rerun. Reference data (permissions, default roles, their grants) is seeded
//! exactly once, guarded by the `recc.db.version` row of the `info` table.
//! Everything runs inside one transaction: a failed bootstrap leaves nothing
//! behind.
//!
//! No lock is taken. A concurrent bootstrap of the same database blocks on
//! the first `CREATE TABLE` until the other transaction ends, then either
//! proceeds (the other rolled back) or fails on the catalog; in the latter
//! case the committed marker is read back and the call is a no-op.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use postgres::error::SqlState;
use postgres::{Client, GenericClient, Transaction};
use recc_types::{
    DefaultPermission, DefaultRole, InfoRecord, INFO_KEY_DB_VERSION, TABLE_GROUP,
    TABLE_GROUP_MEMBER, TABLE_INFO, TABLE_PERMISSION, TABLE_PROJECT, TABLE_PROJECT_MEMBER,
    TABLE_ROLE, TABLE_ROLE_PERMISSION, TABLE_TASK, TABLE_USER, TABLE_USER_INFO,
    VIEW_INFO_DB_VERSION, VIEW_ROLE_PERMISSION_SLUGS,
};

use crate::error::{BootstrapStage, DbError};
use crate::mapper::{execute, execute_batch, fetch_many, fetch_scalar};
use crate::pool::Database;
use crate::query::{self, quote_ident, Batch, FieldSet, Predicate};
use crate::VERSION;

/// One embedded group of DDL statements.
struct Stage {
    stage: BootstrapStage,
    sql: &'static str,
}

/// DDL groups in creation order.
const STAGES: &[Stage] = &[
    Stage {
        stage: BootstrapStage::Tables,
        sql: include_str!("schema/tables.sql"),
    },
    Stage {
        stage: BootstrapStage::Indices,
        sql: include_str!("schema/indices.sql"),
    },
    Stage {
        stage: BootstrapStage::Views,
        sql: include_str!("schema/views.sql"),
    },
    Stage {
        stage: BootstrapStage::Functions,
        sql: include_str!("schema/functions.sql"),
    },
];

/// Tables in creation order; referenced tables come first.
const TABLES: &[&str] = &[
    TABLE_INFO,
    TABLE_USER,
    TABLE_USER_INFO,
    TABLE_GROUP,
    TABLE_PROJECT,
    TABLE_TASK,
    TABLE_PERMISSION,
    TABLE_ROLE,
    TABLE_ROLE_PERMISSION,
    TABLE_GROUP_MEMBER,
    TABLE_PROJECT_MEMBER,
];

const INDICES: &[&str] = &[
    "project_group_uid_idx",
    "task_project_uid_idx",
    "role_permission_permission_uid_idx",
    "group_member_user_uid_idx",
    "project_member_user_uid_idx",
];

/// Views in creation order; later views may read earlier ones.
const VIEWS: &[&str] = &[VIEW_INFO_DB_VERSION, VIEW_ROLE_PERMISSION_SLUGS];

/// Functions with their argument signatures, as `DROP FUNCTION` needs them.
const FUNCTIONS: &[(&str, &str)] = &[
    ("recc_role_permission_slugs", "integer"),
    ("recc_db_version", ""),
];

/// Result of [`create_schema`].
#[derive(Debug, Clone, PartialEq)]
pub enum BootstrapOutcome {
    /// The schema was created and seeded by this call.
    Initialized { version: String },
    /// A version marker was already present; seeding was skipped.
    AlreadyInitialized {
        version: String,
        installed_at: DateTime<Utc>,
    },
}

impl BootstrapOutcome {
    /// The schema version recorded in the marker row.
    pub fn version(&self) -> &str {
        match self {
            Self::Initialized { version } | Self::AlreadyInitialized { version, .. } => version,
        }
    }
}

/// Creates the schema and seeds the reference data if the database has not
/// been bootstrapped yet.
///
/// Two concurrent calls against one database both succeed: the one that
/// loses the race on the catalog or on a seeded key rolls back, finds the
/// marker committed by the winner and reports `AlreadyInitialized`.
///
/// # Errors
///
/// Returns `DbError::NotOpen` or `DbError::AcquireTimeout` if no session can
/// be checked out, and `DbError::BootstrapFailure` naming the failed step for
/// anything that goes wrong once the transaction has started. On failure the
/// transaction is rolled back.
pub fn create_schema(db: &Database) -> Result<BootstrapOutcome, DbError> {
    let mut session = db.acquire()?;

    let outcome = match run_bootstrap(session.client()) {
        Ok(outcome) => outcome,
        Err(err) if lost_race(&err) => match read_marker(session.client()) {
            Ok(Some(marker)) => {
                tracing::debug!(
                    error = %err,
                    "concurrent bootstrap committed first, using its marker"
                );
                already_initialized(marker)
            }
            _ => return Err(err),
        },
        Err(err) => return Err(err),
    };

    match &outcome {
        BootstrapOutcome::Initialized { version } => {
            tracing::info!(version = %version, "schema created and seeded");
        }
        BootstrapOutcome::AlreadyInitialized {
            version,
            installed_at,
        } => {
            tracing::info!(
                version = %version,
                installed_at = %installed_at,
                "schema already initialized, skipped seeding"
            );
        }
    }
    Ok(outcome)
}

fn run_bootstrap(client: &mut Client) -> Result<BootstrapOutcome, DbError> {
    let mut tx = client
        .transaction()
        .map_err(|e| DbError::from(e).in_stage(BootstrapStage::Begin))?;

    let outcome = bootstrap(&mut tx)?;

    tx.commit()
        .map_err(|e| DbError::from(e).in_stage(BootstrapStage::Commit))?;
    Ok(outcome)
}

/// Whether a failed bootstrap collided with objects or rows another
/// transaction created at the same time.
fn lost_race(err: &DbError) -> bool {
    err.sql_state().is_some_and(|state| {
        state.code().starts_with("23")
            || *state == SqlState::DUPLICATE_TABLE
            || *state == SqlState::DUPLICATE_OBJECT
    })
}

fn already_initialized(marker: InfoRecord) -> BootstrapOutcome {
    BootstrapOutcome::AlreadyInitialized {
        version: marker.value.unwrap_or_default(),
        installed_at: marker.created_at,
    }
}

fn bootstrap(tx: &mut Transaction<'_>) -> Result<BootstrapOutcome, DbError> {
    for stage in STAGES {
        execute_batch(tx, &Batch::new().push(stage.sql)).map_err(|e| e.in_stage(stage.stage))?;
        tracing::debug!(stage = %stage.stage, "applied schema stage");
    }

    let marker = read_marker(tx).map_err(|e| e.in_stage(BootstrapStage::VersionCheck))?;
    if let Some(marker) = marker {
        return Ok(already_initialized(marker));
    }

    let permissions =
        seed_permissions(tx).map_err(|e| e.in_stage(BootstrapStage::SeedPermissions))?;
    let roles = seed_roles(tx).map_err(|e| e.in_stage(BootstrapStage::SeedRoles))?;
    seed_role_permissions(tx, &roles, &permissions)
        .map_err(|e| e.in_stage(BootstrapStage::SeedRolePermissions))?;

    let now = Utc::now();
    let stamp = query::insert(
        TABLE_INFO,
        &FieldSet::new()
            .set("key", INFO_KEY_DB_VERSION)
            .set("value", VERSION)
            .set("created_at", now)
            .set("updated_at", now),
    );
    execute(tx, stamp.sql(), stamp.args()).map_err(|e| e.in_stage(BootstrapStage::VersionStamp))?;

    Ok(BootstrapOutcome::Initialized {
        version: VERSION.to_string(),
    })
}

fn read_marker<C: GenericClient>(client: &mut C) -> Result<Option<InfoRecord>, DbError> {
    let plan = query::select(
        TABLE_INFO,
        &[],
        &Predicate::new().eq("key", INFO_KEY_DB_VERSION),
    );
    let mut rows: Vec<InfoRecord> = fetch_many(client, plan.sql(), plan.args())?;
    Ok(rows.pop())
}

fn seed_permissions(
    tx: &mut Transaction<'_>,
) -> Result<HashMap<DefaultPermission, i32>, DbError> {
    let mut uids = HashMap::with_capacity(DefaultPermission::ALL.len());
    for permission in DefaultPermission::ALL {
        let fields = FieldSet::new()
            .set("slug", permission.slug())
            .set("name", permission.slug())
            .set("lock", true);
        let plan = query::insert(TABLE_PERMISSION, &fields).returning(&["uid"]);
        let uid: i32 = fetch_scalar(tx, plan.sql(), plan.args(), 0)?;
        uids.insert(permission, uid);
    }
    tracing::debug!(count = uids.len(), "seeded permissions");
    Ok(uids)
}

fn seed_roles(tx: &mut Transaction<'_>) -> Result<Vec<(DefaultRole, i32)>, DbError> {
    let mut uids = Vec::with_capacity(DefaultRole::ALL.len());
    for role in DefaultRole::ALL {
        let fields = FieldSet::new()
            .set("slug", role.slug())
            .set("name", role.slug())
            .set("lock", role.locked());
        let plan = query::insert(TABLE_ROLE, &fields).returning(&["uid"]);
        let uid: i32 = fetch_scalar(tx, plan.sql(), plan.args(), 0)?;
        uids.push((role, uid));
    }
    tracing::debug!(count = uids.len(), "seeded default roles");
    Ok(uids)
}

fn seed_role_permissions(
    tx: &mut Transaction<'_>,
    roles: &[(DefaultRole, i32)],
    permissions: &HashMap<DefaultPermission, i32>,
) -> Result<(), DbError> {
    let mut granted = 0usize;
    for (role, role_uid) in roles {
        for permission in role.permissions() {
            let Some(permission_uid) = permissions.get(permission) else {
                continue;
            };
            let fields = FieldSet::new()
                .set("role_uid", *role_uid)
                .set("permission_uid", *permission_uid);
            let plan = query::insert(TABLE_ROLE_PERMISSION, &fields);
            execute(tx, plan.sql(), plan.args())?;
            granted += 1;
        }
    }
    tracing::debug!(count = granted, "seeded role permissions");
    Ok(())
}

/// Drops every schema object in reverse dependency order: functions, views,
/// indices, tables.
///
/// Runs as one batch outside any bootstrap transaction. Objects that do not
/// exist are skipped.
///
/// # Errors
///
/// Returns `DbError::NotOpen` if the handle is closed, or the classified
/// engine error of the first failing `DROP`.
pub fn drop_schema(db: &Database) -> Result<(), DbError> {
    db.execute_batch(&drop_batch())?;
    tracing::info!(database = %db.target().database, "dropped schema");
    Ok(())
}

fn drop_batch() -> Batch {
    let functions = FUNCTIONS.iter().rev().map(|(name, args)| {
        format!("DROP FUNCTION IF EXISTS {}({args})", quote_ident(name))
    });
    let views = VIEWS
        .iter()
        .rev()
        .map(|name| format!("DROP VIEW IF EXISTS {}", quote_ident(name)));
    let indices = INDICES
        .iter()
        .rev()
        .map(|name| format!("DROP INDEX IF EXISTS {}", quote_ident(name)));
    let tables = TABLES
        .iter()
        .rev()
        .map(|name| format!("DROP TABLE IF EXISTS {}", quote_ident(name)));

    functions.chain(views).chain(indices).chain(tables).collect()
}

/// Reads the schema version marker. `None` means the database has not been
/// bootstrapped, either because the `info` table is missing or because it
/// holds no marker.
///
/// # Errors
///
/// Returns `DbError::NotOpen` if the handle is closed, or the classified
/// engine error.
pub fn schema_version(db: &Database) -> Result<Option<InfoRecord>, DbError> {
    let plan = query::select(
        TABLE_INFO,
        &[],
        &Predicate::new().eq("key", INFO_KEY_DB_VERSION),
    );
    match db.fetch_many::<InfoRecord>(plan.sql(), plan.args()) {
        Ok(mut rows) => Ok(rows.pop()),
        Err(e) if e.sql_state() == Some(&SqlState::UNDEFINED_TABLE) => Ok(None),
        Err(e) => Err(e),
    }
}
