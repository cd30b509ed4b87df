//! Entity accessors.
//!
//! The generic operations on [`Database`] below are the boundary every
//! per-entity accessor is written against: build a [`FieldSet`] and a
//! [`Predicate`], name the table, and let the core render, execute and map.
//! The `info`, `permission` and `role` submodules are the accessors the core
//! itself needs.

pub mod info;
pub mod permission;
pub mod role;

use serde::de::DeserializeOwned;

use crate::codec::Scalar;
use crate::error::DbError;
use crate::pool::Database;
use crate::query::{self, FieldSet, Predicate};

impl Database {
    /// Inserts one row and returns its `key` column, read back through
    /// `RETURNING`.
    ///
    /// # Errors
    ///
    /// Returns `DbError::ConstraintViolation` on a duplicate or dangling key,
    /// `DbError::TypeMismatch` if `key` is not a `K`, or any other classified
    /// engine error.
    pub fn insert<K: Scalar>(
        &self,
        table: &str,
        fields: &FieldSet,
        key: &str,
    ) -> Result<K, DbError> {
        let plan = query::insert(table, fields).returning(&[key]);
        self.fetch_scalar(plan.sql(), plan.args(), 0)
    }

    /// Updates the rows matching `predicate` and returns how many changed.
    ///
    /// # Errors
    ///
    /// Returns `DbError::EmptyUpdate` or `DbError::Unscoped` before touching
    /// the database, otherwise the classified engine error.
    pub fn update(
        &self,
        table: &str,
        fields: &FieldSet,
        predicate: &Predicate,
    ) -> Result<u64, DbError> {
        let plan = query::update(table, fields, predicate)?;
        self.execute_plan(&plan)
    }

    /// Deletes the rows matching `predicate` and returns how many went.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Unscoped` before touching the database, otherwise
    /// the classified engine error.
    pub fn delete(&self, table: &str, predicate: &Predicate) -> Result<u64, DbError> {
        let plan = query::delete(table, predicate)?;
        self.execute_plan(&plan)
    }

    /// Selects the first row matching `predicate`.
    ///
    /// # Errors
    ///
    /// Returns `DbError::NotFound` when nothing matches, or `DbError::Decode`
    /// when the row does not fit `T`.
    pub fn select_one<T: DeserializeOwned>(
        &self,
        table: &str,
        predicate: &Predicate,
    ) -> Result<T, DbError> {
        let plan = query::select(table, &[], predicate);
        self.fetch_one(plan.sql(), plan.args())
    }

    /// Selects every row matching `predicate`. No match is an empty vector.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Decode` when a row does not fit `T`, or the
    /// classified engine error.
    pub fn select_many<T: DeserializeOwned>(
        &self,
        table: &str,
        predicate: &Predicate,
    ) -> Result<Vec<T>, DbError> {
        let plan = query::select(table, &[], predicate);
        self.fetch_many(plan.sql(), plan.args())
    }
}
