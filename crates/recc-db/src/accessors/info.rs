//! Accessors for the `info` key/value table.

use chrono::Utc;
use recc_types::{InfoRecord, TABLE_INFO};

use crate::error::DbError;
use crate::pool::Database;
use crate::query::{quote_ident, FieldSet, Predicate, QueryPlan};

fn by_key(key: &str) -> Predicate {
    Predicate::new().eq("key", key)
}

/// Inserts a new key. Timestamps take their column defaults.
///
/// # Errors
///
/// Returns `DbError::ConstraintViolation` if the key already exists.
pub fn insert_info(db: &Database, key: &str, value: Option<&str>) -> Result<(), DbError> {
    let fields = FieldSet::new().set("key", key).set("value", value);
    let _: String = db.insert(TABLE_INFO, &fields, "key")?;
    Ok(())
}

fn upsert_plan(key: &str, value: Option<&str>) -> QueryPlan {
    let sql = format!(
        "INSERT INTO {} (\"key\", \"value\") VALUES ($1, $2) \
         ON CONFLICT (\"key\") DO UPDATE SET \"value\" = EXCLUDED.\"value\", \"updated_at\" = now()",
        quote_ident(TABLE_INFO)
    );
    QueryPlan::new(sql, vec![key.into(), value.into()])
}

/// Inserts `key` or, if it exists, replaces its value and bumps
/// `updated_at`.
pub fn upsert_info(db: &Database, key: &str, value: Option<&str>) -> Result<(), DbError> {
    db.execute_plan(&upsert_plan(key, value))?;
    Ok(())
}

/// Replaces the value of an existing key. Returns the number of rows changed
/// (zero if the key does not exist).
pub fn update_info_value(db: &Database, key: &str, value: Option<&str>) -> Result<u64, DbError> {
    let fields = FieldSet::new()
        .set("value", value)
        .set("updated_at", Utc::now());
    db.update(TABLE_INFO, &fields, &by_key(key))
}

pub fn delete_info(db: &Database, key: &str) -> Result<u64, DbError> {
    db.delete(TABLE_INFO, &by_key(key))
}

pub fn exists_info(db: &Database, key: &str) -> Result<bool, DbError> {
    let sql = format!(
        "SELECT EXISTS(SELECT 1 FROM {} WHERE \"key\" = $1)",
        quote_ident(TABLE_INFO)
    );
    db.fetch_scalar(&sql, &[key.into()], 0)
}

/// # Errors
///
/// Returns `DbError::NotFound` if the key does not exist.
pub fn select_info(db: &Database, key: &str) -> Result<InfoRecord, DbError> {
    db.select_one(TABLE_INFO, &by_key(key))
}

/// Every key, sorted by name.
pub fn select_info_all(db: &Database) -> Result<Vec<InfoRecord>, DbError> {
    let mut rows: Vec<InfoRecord> = db.select_many(TABLE_INFO, &Predicate::new())?;
    rows.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(rows)
}

/// Reads the installed schema version through `recc_db_version()`.
///
/// Returns `None` when the schema exists but has not been stamped.
pub fn select_db_version(db: &Database) -> Result<Option<String>, DbError> {
    match db.fetch_scalar::<String>("SELECT \"recc_db_version\"()", &[], 0) {
        Ok(version) => Ok(Some(version)),
        Err(DbError::NotFound) => Ok(None),
        Err(e) => Err(e),
    }
}
