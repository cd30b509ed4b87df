//! Conversion between column values and native values at the driver boundary.
//!
//! [`Value`] is the dynamic currency of the query builder and the mapper: it
//! is bound as a positional parameter through [`ToSql`] and produced from any
//! supported result column by [`Value::decode`]. JSON and JSONB columns
//! marshal through `serde_json`, so structured payloads round-trip without
//! callers touching text encoding.

use std::error::Error;

use bytes::BytesMut;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use postgres::types::{FromSql, IsNull, ToSql, Type};
use postgres::Row;

use crate::error::DbError;

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    /// Any integer column. Narrowed to `int2`/`int4` on encode when the
    /// parameter type demands it.
    Int(i64),
    Float(f64),
    Text(String),
    Json(serde_json::Value),
    Timestamp(DateTime<Utc>),
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns the kind name used in [`DbError::TypeMismatch`].
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Json(_) => "json",
            Self::Timestamp(_) => "timestamp",
            Self::Bytes(_) => "bytes",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Decodes column `idx` of `row`, dispatching on the column's type.
    ///
    /// # Errors
    ///
    /// Returns `DbError::UnsupportedColumn` for column types without a
    /// [`Value`] representation.
    pub fn decode(row: &Row, idx: usize) -> Result<Self, DbError> {
        let column = &row.columns()[idx];
        let ty = column.type_();

        let value = if <bool as FromSql>::accepts(ty) {
            read(row, idx, Self::Bool)?
        } else if <i16 as FromSql>::accepts(ty) {
            read(row, idx, |v: i16| Self::Int(v.into()))?
        } else if <i32 as FromSql>::accepts(ty) {
            read(row, idx, |v: i32| Self::Int(v.into()))?
        } else if <i64 as FromSql>::accepts(ty) {
            read(row, idx, Self::Int)?
        } else if <f32 as FromSql>::accepts(ty) {
            read(row, idx, |v: f32| Self::Float(v.into()))?
        } else if <f64 as FromSql>::accepts(ty) {
            read(row, idx, Self::Float)?
        } else if <String as FromSql>::accepts(ty) {
            read(row, idx, Self::Text)?
        } else if <serde_json::Value as FromSql>::accepts(ty) {
            read(row, idx, Self::Json)?
        } else if <DateTime<Utc> as FromSql>::accepts(ty) {
            read(row, idx, Self::Timestamp)?
        } else if <NaiveDateTime as FromSql>::accepts(ty) {
            // `timestamp without time zone` is interpreted as UTC, matching
            // the session time zone pinned at connect.
            read(row, idx, |v: NaiveDateTime| Self::Timestamp(v.and_utc()))?
        } else if <&[u8] as FromSql>::accepts(ty) {
            read(row, idx, |v: &[u8]| Self::Bytes(v.to_vec()))?
        } else {
            return Err(DbError::UnsupportedColumn {
                column: column.name().to_string(),
                type_name: ty.name().to_string(),
            });
        };

        Ok(value)
    }

    /// Converts to the JSON form used for structural record mapping.
    ///
    /// Timestamps become RFC 3339 strings, which `chrono`'s `Deserialize`
    /// accepts back; non-finite floats become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;

        match self {
            Self::Null => Json::Null,
            Self::Bool(v) => Json::Bool(*v),
            Self::Int(v) => Json::from(*v),
            Self::Float(v) => serde_json::Number::from_f64(*v)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Self::Text(v) => Json::String(v.clone()),
            Self::Json(v) => v.clone(),
            Self::Timestamp(v) => Json::String(v.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Self::Bytes(v) => Json::Array(v.iter().map(|b| Json::from(*b)).collect()),
        }
    }
}

fn read<'a, T, F>(row: &'a Row, idx: usize, wrap: F) -> Result<Value, DbError>
where
    T: FromSql<'a>,
    F: FnOnce(T) -> Value,
{
    let raw: Option<T> = row.try_get(idx)?;
    Ok(raw.map(wrap).unwrap_or(Value::Null))
}

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            Self::Null => Ok(IsNull::Yes),
            Self::Bool(v) => v.to_sql_checked(ty, out),
            Self::Int(v) => {
                if *ty == Type::INT2 {
                    i16::try_from(*v)?.to_sql_checked(ty, out)
                } else if *ty == Type::INT4 {
                    i32::try_from(*v)?.to_sql_checked(ty, out)
                } else {
                    v.to_sql_checked(ty, out)
                }
            }
            Self::Float(v) => {
                if *ty == Type::FLOAT4 {
                    let narrowed = *v as f32;
                    if v.is_finite() && !narrowed.is_finite() {
                        return Err(format!("{v} is out of range for float4").into());
                    }
                    narrowed.to_sql_checked(ty, out)
                } else {
                    v.to_sql_checked(ty, out)
                }
            }
            Self::Text(v) => v.to_sql_checked(ty, out),
            Self::Json(v) => v.to_sql_checked(ty, out),
            Self::Timestamp(v) => {
                if *ty == Type::TIMESTAMP {
                    v.naive_utc().to_sql_checked(ty, out)
                } else {
                    v.to_sql_checked(ty, out)
                }
            }
            Self::Bytes(v) => v.as_slice().to_sql_checked(ty, out),
        }
    }

    // Type checking is delegated to the wrapped native value in `to_sql`.
    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn to_sql_checked(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        self.to_sql(ty, out)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Self::Int(v.into())
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// A native type a single column can be read as.
///
/// Implementations accept exactly one [`Value`] kind; integers additionally
/// accept any integer column that fits without truncation.
pub trait Scalar: Sized {
    /// Kind name reported as `expected` in [`DbError::TypeMismatch`].
    const KIND: &'static str;

    /// Converts a non-null value, handing it back unchanged on mismatch.
    fn from_value(value: Value) -> Result<Self, Value>;
}

impl Scalar for Value {
    const KIND: &'static str = "any";

    fn from_value(value: Value) -> Result<Self, Value> {
        Ok(value)
    }
}

impl Scalar for bool {
    const KIND: &'static str = "bool";

    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Bool(v) => Ok(v),
            other => Err(other),
        }
    }
}

impl Scalar for i64 {
    const KIND: &'static str = "int";

    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Int(v) => Ok(v),
            other => Err(other),
        }
    }
}

impl Scalar for i32 {
    const KIND: &'static str = "int";

    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Int(v) => i32::try_from(v).map_err(|_| Value::Int(v)),
            other => Err(other),
        }
    }
}

impl Scalar for f64 {
    const KIND: &'static str = "float";

    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Float(v) => Ok(v),
            other => Err(other),
        }
    }
}

impl Scalar for String {
    const KIND: &'static str = "text";

    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Text(v) => Ok(v),
            other => Err(other),
        }
    }
}

impl Scalar for serde_json::Value {
    const KIND: &'static str = "json";

    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Json(v) => Ok(v),
            other => Err(other),
        }
    }
}

impl Scalar for DateTime<Utc> {
    const KIND: &'static str = "timestamp";

    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Timestamp(v) => Ok(v),
            other => Err(other),
        }
    }
}

impl Scalar for Vec<u8> {
    const KIND: &'static str = "bytes";

    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Bytes(v) => Ok(v),
            other => Err(other),
        }
    }
}

/// Converts a decoded value into `V`, classifying NULL and kind mismatches.
pub(crate) fn into_scalar<V: Scalar>(value: Value) -> Result<V, DbError> {
    if value.is_null() {
        return Err(DbError::NotFound);
    }
    V::from_value(value).map_err(|found| DbError::TypeMismatch {
        expected: V::KIND,
        found: found.kind(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: &Value, ty: &Type) -> Result<(IsNull, BytesMut), String> {
        let mut buf = BytesMut::new();
        value
            .to_sql_checked(ty, &mut buf)
            .map(|is_null| (is_null, buf))
            .map_err(|e| e.to_string())
    }

    #[test]
    fn null_encodes_for_any_type() {
        for ty in [Type::INT4, Type::TEXT, Type::JSONB, Type::TIMESTAMPTZ] {
            let (is_null, buf) = encode(&Value::Null, &ty).expect("null should encode");
            assert!(matches!(is_null, IsNull::Yes));
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn int_narrows_to_parameter_width() {
        let (_, buf) = encode(&Value::Int(7), &Type::INT4).expect("int4 should encode");
        assert_eq!(&buf[..], &7i32.to_be_bytes());

        let (_, buf) = encode(&Value::Int(7), &Type::INT2).expect("int2 should encode");
        assert_eq!(&buf[..], &7i16.to_be_bytes());

        let (_, buf) = encode(&Value::Int(7), &Type::INT8).expect("int8 should encode");
        assert_eq!(&buf[..], &7i64.to_be_bytes());
    }

    #[test]
    fn int_out_of_range_is_rejected() {
        let err = encode(&Value::Int(i64::from(i32::MAX) + 1), &Type::INT4);
        assert!(err.is_err(), "overflowing int4 must not be truncated");
    }

    #[test]
    fn float_narrows_to_float4_only_when_finite() {
        let (_, buf) = encode(&Value::Float(1.5), &Type::FLOAT4).expect("float4 should encode");
        assert_eq!(&buf[..], &1.5f32.to_be_bytes());

        let err = encode(&Value::Float(1e300), &Type::FLOAT4);
        assert!(err.is_err(), "overflowing float4 must not become infinity");

        let (_, buf) = encode(&Value::Float(1e300), &Type::FLOAT8).expect("float8 should encode");
        assert_eq!(&buf[..], &1e300f64.to_be_bytes());

        let (_, buf) =
            encode(&Value::Float(f64::INFINITY), &Type::FLOAT4).expect("infinity stays infinity");
        assert_eq!(&buf[..], &f32::INFINITY.to_be_bytes());
    }

    #[test]
    fn mismatched_parameter_type_is_rejected() {
        assert!(encode(&Value::Text("x".into()), &Type::INT4).is_err());
        assert!(encode(&Value::Bool(true), &Type::TEXT).is_err());
        assert!(encode(&Value::Text("{}".into()), &Type::JSONB).is_err());
    }

    #[test]
    fn json_encodes_into_jsonb() {
        let payload = serde_json::json!({"A": 65, "B": 66});
        let (_, buf) = encode(&Value::Json(payload), &Type::JSONB).expect("jsonb should encode");
        // JSONB binary format is a version byte followed by the JSON text.
        assert_eq!(buf[0], 1);
        let text: serde_json::Value =
            serde_json::from_slice(&buf[1..]).expect("payload should be valid json");
        assert_eq!(text["A"], 65);
    }

    #[test]
    fn option_none_becomes_null() {
        assert_eq!(Value::from(None::<String>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".to_string()));
    }

    #[test]
    fn scalar_kinds_are_strict() {
        assert_eq!(into_scalar::<i64>(Value::Int(5)).expect("int"), 5);
        assert_eq!(into_scalar::<i32>(Value::Int(5)).expect("int"), 5);

        match into_scalar::<String>(Value::Int(5)) {
            Err(DbError::TypeMismatch { expected, found }) => {
                assert_eq!(expected, "text");
                assert_eq!(found, "int");
            }
            other => panic!("unexpected result: {other:?}"),
        }

        assert!(matches!(
            into_scalar::<f64>(Value::Int(1)),
            Err(DbError::TypeMismatch { .. })
        ));
        assert!(matches!(
            into_scalar::<i32>(Value::Int(i64::MAX)),
            Err(DbError::TypeMismatch { found: "int", .. })
        ));
    }

    #[test]
    fn null_scalar_is_not_found() {
        assert!(matches!(
            into_scalar::<bool>(Value::Null),
            Err(DbError::NotFound)
        ));
    }

    #[test]
    fn timestamps_render_as_rfc3339() {
        let at = DateTime::from_timestamp(1_700_000_000, 123_456_000).expect("valid timestamp");
        let json = Value::Timestamp(at).to_json();
        let back: DateTime<Utc> = serde_json::from_value(json).expect("should parse back");
        assert_eq!(back, at);
    }
}
