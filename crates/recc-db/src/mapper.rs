//! Query execution and row-to-record mapping.
//!
//! The free functions run on any [`GenericClient`], so the same code path
//! serves a pooled client and an open transaction. The `Database` methods
//! below each check out one pooled session for the duration of a single
//! call.
//!
//! Rows map onto record types structurally: each column becomes a field of
//! the same name and the result is deserialized with `serde`. A missing
//! required field, or an unknown column on a type declared with
//! `#[serde(deny_unknown_fields)]`, fails with `DbError::Decode`.

use postgres::types::ToSql;
use postgres::{GenericClient, Row, Transaction};
use serde::de::DeserializeOwned;

use crate::codec::{into_scalar, Scalar, Value};
use crate::error::DbError;
use crate::pool::Database;
use crate::query::{Batch, QueryPlan};

/// One result row: column names and decoded values, in result order.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    columns: Vec<(String, Value)>,
}

impl Record {
    fn from_row(row: &Row) -> Result<Self, DbError> {
        let columns = row
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, column)| Ok((column.name().to_string(), Value::decode(row, idx)?)))
            .collect::<Result<Vec<_>, DbError>>()?;
        Ok(Self { columns })
    }

    /// Returns the value of the first column named `name`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Maps this record onto `T` by column name.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Decode` if the columns do not fit the shape of `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, DbError> {
        let object: serde_json::Map<String, serde_json::Value> = self
            .columns
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        serde_json::from_value(serde_json::Value::Object(object)).map_err(DbError::Decode)
    }
}

fn params(args: &[Value]) -> Vec<&(dyn ToSql + Sync)> {
    args.iter().map(|arg| arg as &(dyn ToSql + Sync)).collect()
}

/// Executes `sql` and returns every row as an untyped [`Record`].
///
/// # Errors
///
/// Returns the classified engine error, or `DbError::UnsupportedColumn` if a
/// result column cannot be decoded.
pub fn fetch_records<C: GenericClient>(
    client: &mut C,
    sql: &str,
    args: &[Value],
) -> Result<Vec<Record>, DbError> {
    let rows = client.query(sql, &params(args))?;
    rows.iter().map(Record::from_row).collect()
}

/// Executes `sql` and maps every row onto `T`. Zero rows yield an empty
/// vector.
///
/// # Errors
///
/// Returns the classified engine error or `DbError::Decode`.
pub fn fetch_many<C: GenericClient, T: DeserializeOwned>(
    client: &mut C,
    sql: &str,
    args: &[Value],
) -> Result<Vec<T>, DbError> {
    fetch_records(client, sql, args)?
        .iter()
        .map(|record| record.decode())
        .collect()
}

/// Executes `sql` and maps the first row onto `T`.
///
/// Further rows are ignored; uniqueness is the query's responsibility.
///
/// # Errors
///
/// Returns `DbError::NotFound` when no row is returned.
pub fn fetch_one<C: GenericClient, T: DeserializeOwned>(
    client: &mut C,
    sql: &str,
    args: &[Value],
) -> Result<T, DbError> {
    let rows = client.query(sql, &params(args))?;
    let row = rows.first().ok_or(DbError::NotFound)?;
    Record::from_row(row)?.decode()
}

/// Executes `sql` and reads `column` of the first row as `V`.
///
/// # Errors
///
/// Returns `DbError::NotFound` when there is no row, no such column, or the
/// value is NULL, and `DbError::TypeMismatch` when the value is not a `V`.
pub fn fetch_scalar<C: GenericClient, V: Scalar>(
    client: &mut C,
    sql: &str,
    args: &[Value],
    column: usize,
) -> Result<V, DbError> {
    let rows = client.query(sql, &params(args))?;
    let row = rows.first().ok_or(DbError::NotFound)?;
    if column >= row.len() {
        return Err(DbError::NotFound);
    }
    into_scalar(Value::decode(row, column)?)
}

/// Executes one statement and returns the number of affected rows.
///
/// # Errors
///
/// Returns the classified engine error.
pub fn execute<C: GenericClient>(
    client: &mut C,
    sql: &str,
    args: &[Value],
) -> Result<u64, DbError> {
    Ok(client.execute(sql, &params(args))?)
}

/// Executes every statement of `batch` in one round trip.
///
/// # Errors
///
/// Returns the classified engine error of the first failing statement.
pub fn execute_batch<C: GenericClient>(client: &mut C, batch: &Batch) -> Result<(), DbError> {
    if batch.is_empty() {
        return Ok(());
    }
    Ok(client.batch_execute(&batch.sql())?)
}

impl Database {
    /// Pooled form of [`fetch_records`].
    pub fn fetch_records(&self, sql: &str, args: &[Value]) -> Result<Vec<Record>, DbError> {
        let mut session = self.acquire()?;
        fetch_records(session.client(), sql, args)
    }

    /// Pooled form of [`fetch_many`].
    pub fn fetch_many<T: DeserializeOwned>(
        &self,
        sql: &str,
        args: &[Value],
    ) -> Result<Vec<T>, DbError> {
        let mut session = self.acquire()?;
        fetch_many(session.client(), sql, args)
    }

    /// Pooled form of [`fetch_one`].
    pub fn fetch_one<T: DeserializeOwned>(&self, sql: &str, args: &[Value]) -> Result<T, DbError> {
        let mut session = self.acquire()?;
        fetch_one(session.client(), sql, args)
    }

    /// Pooled form of [`fetch_scalar`].
    pub fn fetch_scalar<V: Scalar>(
        &self,
        sql: &str,
        args: &[Value],
        column: usize,
    ) -> Result<V, DbError> {
        let mut session = self.acquire()?;
        fetch_scalar(session.client(), sql, args, column)
    }

    /// Pooled form of [`execute`].
    pub fn execute(&self, sql: &str, args: &[Value]) -> Result<u64, DbError> {
        let mut session = self.acquire()?;
        execute(session.client(), sql, args)
    }

    /// Executes a rendered [`QueryPlan`].
    pub fn execute_plan(&self, plan: &QueryPlan) -> Result<u64, DbError> {
        self.execute(plan.sql(), plan.args())
    }

    /// Pooled form of [`execute_batch`].
    pub fn execute_batch(&self, batch: &Batch) -> Result<(), DbError> {
        let mut session = self.acquire()?;
        execute_batch(session.client(), batch)
    }

    /// Runs `f` inside one transaction on one pooled session.
    ///
    /// The transaction commits when `f` returns `Ok` and rolls back when it
    /// returns `Err` or panics. `f` must not use `self` to acquire another
    /// session.
    ///
    /// # Errors
    ///
    /// Returns the error of `f`, or the classified engine error of
    /// `BEGIN`/`COMMIT`.
    pub fn transaction<R, F>(&self, f: F) -> Result<R, DbError>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<R, DbError>,
    {
        let mut session = self.acquire()?;
        let mut tx = session.client().transaction()?;
        let out = f(&mut tx)?;
        tx.commit()?;
        Ok(out)
    }
}
