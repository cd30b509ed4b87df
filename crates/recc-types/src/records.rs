//! Record shapes for the tables the persistence core itself reads.
//!
//! Field names match column names exactly; rows are mapped structurally, so
//! an unexpected column is a decoding error rather than being dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A row of the `info` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InfoRecord {
    pub key: String,
    pub value: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A row of the `role` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleRecord {
    /// Internal database ID.
    pub uid: i32,
    /// Unique, URL-safe identifier.
    pub slug: String,
    /// Display name. Seeded roles use their slug.
    pub name: Option<String>,
    pub description: Option<String>,
    /// Free-form JSON attached by clients.
    pub extra: Option<serde_json::Value>,
    pub hidden: bool,
    /// Locked roles cannot be modified through the management API.
    pub lock: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A row of the `permission` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PermissionRecord {
    pub uid: i32,
    pub slug: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub extra: Option<serde_json::Value>,
    pub hidden: bool,
    pub lock: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
