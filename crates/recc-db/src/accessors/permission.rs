//! Read accessors for the `permission` table.
//!
//! Permissions are reference data written by the schema bootstrap; nothing
//! here modifies them.

use recc_types::{PermissionRecord, TABLE_PERMISSION};

use crate::error::DbError;
use crate::pool::Database;
use crate::query::Predicate;

pub fn select_permission_by_uid(db: &Database, uid: i32) -> Result<PermissionRecord, DbError> {
    db.select_one(TABLE_PERMISSION, &Predicate::new().eq("uid", uid))
}

pub fn select_permission_by_slug(db: &Database, slug: &str) -> Result<PermissionRecord, DbError> {
    db.select_one(TABLE_PERMISSION, &Predicate::new().eq("slug", slug))
}

/// Every permission, ordered by uid.
pub fn select_permission_all(db: &Database) -> Result<Vec<PermissionRecord>, DbError> {
    let mut permissions: Vec<PermissionRecord> =
        db.select_many(TABLE_PERMISSION, &Predicate::new())?;
    permissions.sort_by_key(|permission| permission.uid);
    Ok(permissions)
}
