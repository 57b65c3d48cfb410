//! SQL scalar values for database-agnostic row handling.
//!
//! Table shapes are not known until catalog introspection, so rows are
//! dynamically shaped: each column value is one of these tagged scalars.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use mongodb::bson::{spec::BinarySubtype, Binary, Bson};
use rust_decimal::Decimal;
use uuid::Uuid;

/// SQL value enum covering the scalar types MSSQL hands back.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL value.
    Null,

    /// Boolean value (bit).
    Bool(bool),

    /// 16-bit signed integer (smallint, widened tinyint).
    I16(i16),

    /// 32-bit signed integer (int).
    I32(i32),

    /// 64-bit signed integer (bigint).
    I64(i64),

    /// 32-bit floating point (real).
    F32(f32),

    /// 64-bit floating point (float).
    F64(f64),

    /// Text data (varchar, nvarchar, char, nchar, text, ntext, xml).
    Text(String),

    /// Binary data (binary, varbinary, image).
    Bytes(Vec<u8>),

    /// UUID/GUID value (uniqueidentifier).
    Uuid(Uuid),

    /// Decimal value with arbitrary precision (decimal, numeric, money).
    Decimal(Decimal),

    /// Timestamp without timezone (datetime, datetime2, smalldatetime).
    DateTime(NaiveDateTime),

    /// Date without time component.
    Date(NaiveDate),

    /// Time without date component.
    Time(NaiveTime),
}

impl SqlValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Convert to the BSON representation written to the destination store.
    ///
    /// Integers, booleans, floats, and timestamps map to their native BSON
    /// counterparts. Types BSON has no scalar for keep a lossless textual
    /// form: `Decimal` and `Uuid` as canonical strings, `Date` and `Time` as
    /// ISO-8601 strings. Naive timestamps are taken as UTC.
    #[must_use]
    pub fn into_bson(self) -> Bson {
        match self {
            SqlValue::Null => Bson::Null,
            SqlValue::Bool(v) => Bson::Boolean(v),
            SqlValue::I16(v) => Bson::Int32(v as i32),
            SqlValue::I32(v) => Bson::Int32(v),
            SqlValue::I64(v) => Bson::Int64(v),
            SqlValue::F32(v) => Bson::Double(v as f64),
            SqlValue::F64(v) => Bson::Double(v),
            SqlValue::Text(v) => Bson::String(v),
            SqlValue::Bytes(v) => Bson::Binary(Binary {
                subtype: BinarySubtype::Generic,
                bytes: v,
            }),
            SqlValue::Uuid(v) => Bson::String(v.to_string()),
            SqlValue::Decimal(v) => Bson::String(v.to_string()),
            SqlValue::DateTime(v) => {
                Bson::DateTime(mongodb::bson::DateTime::from_millis(v.and_utc().timestamp_millis()))
            }
            SqlValue::Date(v) => Bson::String(v.format("%Y-%m-%d").to_string()),
            SqlValue::Time(v) => Bson::String(v.format("%H:%M:%S%.f").to_string()),
        }
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::I32(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars_map_to_native_bson() {
        assert_eq!(SqlValue::I32(42).into_bson(), Bson::Int32(42));
        assert_eq!(SqlValue::I16(7).into_bson(), Bson::Int32(7));
        assert_eq!(SqlValue::I64(1 << 40).into_bson(), Bson::Int64(1 << 40));
        assert_eq!(SqlValue::Bool(true).into_bson(), Bson::Boolean(true));
        assert_eq!(
            SqlValue::Text("Alice".into()).into_bson(),
            Bson::String("Alice".into())
        );
        assert_eq!(SqlValue::Null.into_bson(), Bson::Null);
    }

    #[test]
    fn test_lossless_textual_forms() {
        let uuid = Uuid::parse_str("6ba7b810-9dad-11d1-80b4-00c04fd430c8").unwrap();
        assert_eq!(
            SqlValue::Uuid(uuid).into_bson(),
            Bson::String("6ba7b810-9dad-11d1-80b4-00c04fd430c8".into())
        );

        let dec: Decimal = "123.450".parse().unwrap();
        assert_eq!(SqlValue::Decimal(dec).into_bson(), Bson::String("123.450".into()));

        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(SqlValue::Date(date).into_bson(), Bson::String("2024-03-09".into()));
    }

    #[test]
    fn test_datetime_converts_to_bson_datetime() {
        let dt = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        match SqlValue::DateTime(dt).into_bson() {
            Bson::DateTime(b) => assert_eq!(b.timestamp_millis(), dt.and_utc().timestamp_millis()),
            other => panic!("expected BSON datetime, got {:?}", other),
        }
    }
}
