//! Shared types, table names, and reference-data constants for recc.
//!
//! This crate holds the vocabulary that both the persistence core and its
//! consumers agree on: the names of every table and view created by the
//! schema bootstrap, the keys stored in the `info` table, the catalog of
//! default permissions and roles seeded on first bootstrap, and the record
//! structs that rows of the core tables decode into.
//!
//! Nothing here talks to a database. Keeping it dependency-light lets
//! callers that only need the record shapes avoid pulling in the driver.

use serde::{Deserialize, Serialize};

mod records;

pub use records::{InfoRecord, PermissionRecord, RoleRecord};

/// Key/value metadata table. Holds the schema version marker.
pub const TABLE_INFO: &str = "info";
pub const TABLE_USER: &str = "user";
pub const TABLE_USER_INFO: &str = "user_info";
pub const TABLE_GROUP: &str = "group";
pub const TABLE_PROJECT: &str = "project";
pub const TABLE_TASK: &str = "task";
pub const TABLE_PERMISSION: &str = "permission";
pub const TABLE_ROLE: &str = "role";
pub const TABLE_ROLE_PERMISSION: &str = "role_permission";
pub const TABLE_GROUP_MEMBER: &str = "group_member";
pub const TABLE_PROJECT_MEMBER: &str = "project_member";

/// View exposing the installed schema version as a single `version` column.
pub const VIEW_INFO_DB_VERSION: &str = "info_db_version";
/// View joining role slugs with the permission slugs granted to them.
pub const VIEW_ROLE_PERMISSION_SLUGS: &str = "role_permission_slugs";

/// `info` key under which the schema version marker is stored.
pub const INFO_KEY_DB_VERSION: &str = "recc.db.version";

/// Primary key of the `owner` role. The owner role is seeded first, so the
/// `serial` sequence always hands it uid 1.
pub const ROLE_UID_OWNER: i32 = 1;

/// Permissions seeded into the `permission` table on first bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultPermission {
    ViewGroup,
    EditGroup,
    ManageGroupMember,
    ViewProject,
    EditProject,
    ManageProjectMember,
    ViewTask,
    EditTask,
    ManageTask,
}

impl DefaultPermission {
    /// Every default permission, in seeding order.
    pub const ALL: [DefaultPermission; 9] = [
        Self::ViewGroup,
        Self::EditGroup,
        Self::ManageGroupMember,
        Self::ViewProject,
        Self::EditProject,
        Self::ManageProjectMember,
        Self::ViewTask,
        Self::EditTask,
        Self::ManageTask,
    ];

    /// Returns the slug stored in `permission.slug`.
    pub fn slug(self) -> &'static str {
        match self {
            Self::ViewGroup => "view_group",
            Self::EditGroup => "edit_group",
            Self::ManageGroupMember => "manage_group_member",
            Self::ViewProject => "view_project",
            Self::EditProject => "edit_project",
            Self::ManageProjectMember => "manage_project_member",
            Self::ViewTask => "view_task",
            Self::EditTask => "edit_task",
            Self::ManageTask => "manage_task",
        }
    }
}

/// Roles seeded into the `role` table on first bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultRole {
    Owner,
    Maintainer,
    Developer,
    Reporter,
    Guest,
}

impl DefaultRole {
    /// Every default role, in seeding order. `Owner` must stay first so it
    /// receives [`ROLE_UID_OWNER`].
    pub const ALL: [DefaultRole; 5] = [
        Self::Owner,
        Self::Maintainer,
        Self::Developer,
        Self::Reporter,
        Self::Guest,
    ];

    /// Returns the slug stored in `role.slug`.
    pub fn slug(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Maintainer => "maintainer",
            Self::Developer => "developer",
            Self::Reporter => "reporter",
            Self::Guest => "guest",
        }
    }

    /// Attempts to resolve a slug to a default role.
    ///
    /// Returns `None` for custom roles.
    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|role| role.slug() == slug)
    }

    /// Locked roles cannot be edited or deleted by group administrators.
    pub fn locked(self) -> bool {
        matches!(self, Self::Owner)
    }

    /// Permissions granted to this role by the default role-permission seed.
    pub fn permissions(self) -> &'static [DefaultPermission] {
        use DefaultPermission::*;

        match self {
            Self::Owner => &DefaultPermission::ALL,
            Self::Maintainer => &[
                ViewGroup,
                ViewProject,
                EditProject,
                ManageProjectMember,
                ViewTask,
                EditTask,
                ManageTask,
            ],
            Self::Developer => &[ViewGroup, ViewProject, ViewTask, EditTask, ManageTask],
            Self::Reporter => &[ViewGroup, ViewProject, ViewTask],
            Self::Guest => &[ViewGroup, ViewProject],
        }
    }
}
