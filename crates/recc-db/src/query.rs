//! Parameterized SQL construction from sparse field sets.
//!
//! Every function here is pure: it renders SQL text and collects the bound
//! arguments, and never touches a connection. Placeholders are numbered
//! `$1..$n` in the order the arguments appear in the text (SET assignments
//! first, then WHERE terms), one placeholder per argument.

use crate::codec::Value;
use crate::error::DbError;

/// Quotes an identifier for PostgreSQL, doubling embedded double quotes.
///
/// Always quoting keeps reserved words such as `user` and `group` usable as
/// table names.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Column assignments for an INSERT or UPDATE.
///
/// A column is either absent (not part of the statement at all) or present
/// with a value, which may be [`Value::Null`]. Columns keep the order in
/// which they were first set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSet {
    fields: Vec<(String, Value)>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `column` present with `value`, replacing any previous value.
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value);
        self
    }

    /// Marks `column` present only when `value` is `Some`.
    ///
    /// `None` leaves the column absent. To assign NULL explicitly, pass
    /// `Some(None::<T>)`.
    pub fn patch<T: Into<Value>>(self, column: impl Into<String>, value: Option<T>) -> Self {
        match value {
            Some(v) => self.set(column, v),
            None => self,
        }
    }

    /// In-place form of [`FieldSet::set`].
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(name, _)| *name == column) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((column, value)),
        }
    }

    /// Makes `column` absent again, returning its value if it was present.
    pub fn remove(&mut self, column: &str) -> Option<Value> {
        let pos = self.fields.iter().position(|(name, _)| name == column)?;
        Some(self.fields.remove(pos).1)
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Present columns in assignment order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }
}

/// A conjunction of `column = value` terms.
///
/// UPDATE and DELETE refuse an empty predicate unless it was built with
/// [`Predicate::unscoped`].
#[derive(Debug, Clone, Default)]
pub struct Predicate {
    terms: Vec<(String, Value)>,
    unscoped: bool,
}

impl Predicate {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty predicate that UPDATE and DELETE accept, affecting every row.
    pub fn unscoped() -> Self {
        Self {
            terms: Vec::new(),
            unscoped: true,
        }
    }

    /// Adds a `column = value` term.
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.terms.push((column.into(), value.into()));
        self
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn is_unscoped(&self) -> bool {
        self.unscoped
    }

    /// Appends ` WHERE ...` to `sql`, binding each term's value.
    fn render_into(&self, sql: &mut String, args: &mut Vec<Value>) {
        if self.terms.is_empty() {
            return;
        }
        let clauses: Vec<String> = self
            .terms
            .iter()
            .map(|(column, value)| {
                args.push(value.clone());
                format!("{} = ${}", quote_ident(column), args.len())
            })
            .collect();
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }

    fn require_scope(&self, table: &str, statement: &'static str) -> Result<(), DbError> {
        if self.terms.is_empty() && !self.unscoped {
            return Err(DbError::Unscoped {
                table: table.to_string(),
                statement,
            });
        }
        Ok(())
    }
}

/// Rendered SQL text plus its ordered arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    sql: String,
    args: Vec<Value>,
}

impl QueryPlan {
    /// Wraps hand-written SQL and its arguments.
    pub fn new(sql: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            args,
        }
    }

    /// Appends a `RETURNING` clause. An empty column list returns `*`.
    pub fn returning(mut self, columns: &[&str]) -> Self {
        self.sql.push_str(" RETURNING ");
        if columns.is_empty() {
            self.sql.push('*');
        } else {
            self.sql.push_str(&quoted_list(columns.iter().copied()));
        }
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn into_parts(self) -> (String, Vec<Value>) {
        (self.sql, self.args)
    }
}

fn quoted_list<'a>(names: impl Iterator<Item = &'a str>) -> String {
    names.map(quote_ident).collect::<Vec<_>>().join(", ")
}

/// Renders `INSERT INTO table (...) VALUES (...)` for the present fields.
///
/// Absent columns are left to their column defaults. An empty field set
/// renders `INSERT INTO table DEFAULT VALUES`.
pub fn insert(table: &str, fields: &FieldSet) -> QueryPlan {
    if fields.is_empty() {
        let sql = format!("INSERT INTO {} DEFAULT VALUES", quote_ident(table));
        return QueryPlan::new(sql, Vec::new());
    }

    let args: Vec<Value> = fields.iter().map(|(_, value)| value.clone()).collect();
    let placeholders = (1..=args.len())
        .map(|n| format!("${n}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        quoted_list(fields.columns()),
        placeholders
    );
    QueryPlan::new(sql, args)
}

/// Renders `UPDATE table SET ... WHERE ...` assigning exactly the present
/// fields.
///
/// # Errors
///
/// Returns `DbError::EmptyUpdate` when `fields` is empty and
/// `DbError::Unscoped` when `predicate` has no terms and is not unscoped.
pub fn update(table: &str, fields: &FieldSet, predicate: &Predicate) -> Result<QueryPlan, DbError> {
    if fields.is_empty() {
        return Err(DbError::EmptyUpdate {
            table: table.to_string(),
        });
    }
    predicate.require_scope(table, "UPDATE")?;

    let mut args = Vec::with_capacity(fields.len() + predicate.len());
    let assignments: Vec<String> = fields
        .iter()
        .map(|(column, value)| {
            args.push(value.clone());
            format!("{} = ${}", quote_ident(column), args.len())
        })
        .collect();

    let mut sql = format!("UPDATE {} SET {}", quote_ident(table), assignments.join(", "));
    predicate.render_into(&mut sql, &mut args);
    Ok(QueryPlan::new(sql, args))
}

/// Renders `DELETE FROM table WHERE ...`.
///
/// # Errors
///
/// Returns `DbError::Unscoped` when `predicate` has no terms and is not
/// unscoped.
pub fn delete(table: &str, predicate: &Predicate) -> Result<QueryPlan, DbError> {
    predicate.require_scope(table, "DELETE")?;

    let mut args = Vec::with_capacity(predicate.len());
    let mut sql = format!("DELETE FROM {}", quote_ident(table));
    predicate.render_into(&mut sql, &mut args);
    Ok(QueryPlan::new(sql, args))
}

/// Renders `SELECT columns FROM table WHERE ...`. No columns selects `*`; an
/// empty predicate selects every row.
pub fn select(table: &str, columns: &[&str], predicate: &Predicate) -> QueryPlan {
    let projection = if columns.is_empty() {
        "*".to_string()
    } else {
        quoted_list(columns.iter().copied())
    };

    let mut args = Vec::with_capacity(predicate.len());
    let mut sql = format!("SELECT {} FROM {}", projection, quote_ident(table));
    predicate.render_into(&mut sql, &mut args);
    QueryPlan::new(sql, args)
}

/// Independent, argument-free statements executed together as one text.
///
/// Composition happens entirely before execution; the batch is sent with
/// the simple query protocol, which is why its statements cannot carry
/// positional arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    statements: Vec<String>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one or more statements. Blank fragments are ignored.
    pub fn push(mut self, statement: impl Into<String>) -> Self {
        let statement = statement.into();
        let trimmed = statement.trim();
        if !trimmed.is_empty() {
            self.statements.push(trimmed.to_string());
        }
        self
    }

    /// Appends every statement of `other` after this batch's statements.
    pub fn merge(mut self, other: Batch) -> Self {
        self.statements.extend(other.statements);
        self
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// The executable text: fragments in order, each terminated by `;`.
    pub fn sql(&self) -> String {
        self.statements
            .iter()
            .map(|stmt| {
                if stmt.ends_with(';') {
                    stmt.clone()
                } else {
                    format!("{stmt};")
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl<S: Into<String>> FromIterator<S> for Batch {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        iter.into_iter().fold(Batch::new(), Batch::push)
    }
}
