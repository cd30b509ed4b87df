//! Accessors for the `role` table and its permission grants.

use chrono::Utc;
use recc_types::{RoleRecord, TABLE_GROUP_MEMBER, TABLE_PROJECT_MEMBER, TABLE_ROLE};
use serde::Deserialize;

use crate::error::DbError;
use crate::pool::Database;
use crate::query::{self, quote_ident, FieldSet, Predicate};

/// Columns of a role to insert. Unset optional columns take their defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewRole {
    pub slug: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub extra: Option<serde_json::Value>,
    pub hidden: Option<bool>,
    pub lock: Option<bool>,
}

impl NewRole {
    pub fn new(slug: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            ..Self::default()
        }
    }

    fn fields(&self) -> FieldSet {
        FieldSet::new()
            .set("slug", self.slug.as_str())
            .patch("name", self.name.clone())
            .patch("description", self.description.clone())
            .patch("extra", self.extra.clone())
            .patch("hidden", self.hidden)
            .patch("lock", self.lock)
    }
}

/// A partial update of a role.
///
/// The outer `Option` says whether a column is touched at all; for nullable
/// columns the inner `Option` is the new value, `None` meaning NULL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RolePatch {
    pub slug: Option<String>,
    pub name: Option<Option<String>>,
    pub description: Option<Option<String>>,
    pub extra: Option<Option<serde_json::Value>>,
    pub hidden: Option<bool>,
    pub lock: Option<bool>,
}

impl RolePatch {
    /// Renders the touched columns. `updated_at` is added whenever anything
    /// else is, so an empty patch stays empty.
    fn fields(&self) -> FieldSet {
        let mut fields = FieldSet::new()
            .patch("slug", self.slug.clone())
            .patch("name", self.name.clone())
            .patch("description", self.description.clone())
            .patch("extra", self.extra.clone())
            .patch("hidden", self.hidden)
            .patch("lock", self.lock);
        if !fields.is_empty() {
            fields.insert("updated_at", Utc::now());
        }
        fields
    }
}

fn by_uid(uid: i32) -> Predicate {
    Predicate::new().eq("uid", uid)
}

fn by_slug(slug: &str) -> Predicate {
    Predicate::new().eq("slug", slug)
}

/// Inserts a role and returns its uid.
///
/// # Errors
///
/// Returns `DbError::ConstraintViolation` if the slug is taken.
pub fn insert_role(db: &Database, role: &NewRole) -> Result<i32, DbError> {
    let uid: i32 = db.insert(TABLE_ROLE, &role.fields(), "uid")?;
    tracing::debug!(uid, slug = %role.slug, "inserted role");
    Ok(uid)
}

/// Applies `patch` to the role with `uid`. Returns the number of rows
/// changed.
///
/// # Errors
///
/// Returns `DbError::EmptyUpdate` if the patch touches nothing.
pub fn update_role_by_uid(db: &Database, uid: i32, patch: &RolePatch) -> Result<u64, DbError> {
    db.update(TABLE_ROLE, &patch.fields(), &by_uid(uid))
}

/// Deletes a role. Grants referencing it are removed by cascade.
pub fn delete_role_by_uid(db: &Database, uid: i32) -> Result<u64, DbError> {
    db.delete(TABLE_ROLE, &by_uid(uid))
}

pub fn select_role_by_uid(db: &Database, uid: i32) -> Result<RoleRecord, DbError> {
    db.select_one(TABLE_ROLE, &by_uid(uid))
}

pub fn select_role_by_slug(db: &Database, slug: &str) -> Result<RoleRecord, DbError> {
    db.select_one(TABLE_ROLE, &by_slug(slug))
}

pub fn select_role_uid_by_slug(db: &Database, slug: &str) -> Result<i32, DbError> {
    let plan = query::select(TABLE_ROLE, &["uid"], &by_slug(slug));
    db.fetch_scalar(plan.sql(), plan.args(), 0)
}

/// Every role, ordered by uid.
pub fn select_role_all(db: &Database) -> Result<Vec<RoleRecord>, DbError> {
    let mut roles: Vec<RoleRecord> = db.select_many(TABLE_ROLE, &Predicate::new())?;
    roles.sort_by_key(|role| role.uid);
    Ok(roles)
}

/// The role a user holds as a member of a group.
///
/// # Errors
///
/// Returns `DbError::NotFound` if the user is not a member of the group.
pub fn select_role_by_user_uid_and_group_uid(
    db: &Database,
    user_uid: i32,
    group_uid: i32,
) -> Result<RoleRecord, DbError> {
    select_role_by_membership(db, TABLE_GROUP_MEMBER, "group_uid", user_uid, group_uid)
}

/// The role a user holds as a member of a project.
///
/// # Errors
///
/// Returns `DbError::NotFound` if the user is not a member of the project.
pub fn select_role_by_user_uid_and_project_uid(
    db: &Database,
    user_uid: i32,
    project_uid: i32,
) -> Result<RoleRecord, DbError> {
    select_role_by_membership(db, TABLE_PROJECT_MEMBER, "project_uid", user_uid, project_uid)
}

fn select_role_by_membership(
    db: &Database,
    member_table: &str,
    scope_column: &str,
    user_uid: i32,
    scope_uid: i32,
) -> Result<RoleRecord, DbError> {
    db.fetch_one(
        &membership_sql(member_table, scope_column),
        &[user_uid.into(), scope_uid.into()],
    )
}

fn membership_sql(member_table: &str, scope_column: &str) -> String {
    format!(
        "SELECT r.* FROM {role} AS r JOIN {member} AS m ON m.role_uid = r.uid \
         WHERE m.user_uid = $1 AND m.{scope} = $2",
        role = quote_ident(TABLE_ROLE),
        member = quote_ident(member_table),
        scope = quote_ident(scope_column),
    )
}

#[derive(Deserialize)]
struct PermissionSlug {
    slug: String,
}

/// Slugs of the permissions granted to a role, sorted. An unknown role has
/// none.
pub fn select_role_permission_slugs(db: &Database, role_uid: i32) -> Result<Vec<String>, DbError> {
    let rows: Vec<PermissionSlug> = db.fetch_many(
        "SELECT slug FROM \"recc_role_permission_slugs\"($1) AS slug",
        &[role_uid.into()],
    )?;
    Ok(rows.into_iter().map(|row| row.slug).collect())
}
