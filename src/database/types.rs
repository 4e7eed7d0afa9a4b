//! SQL Server type mapping to JSON-representable values.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use serde_json::Value;
use tiberius::Row;
use uuid::Uuid;

/// A SQL value as read from, or bound to, the database.
///
/// Serializes to plain JSON: temporal values become ISO-8601 strings, binary
/// becomes a `0x`-prefixed hex string and decimals keep full precision as strings.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    U8(u8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    Decimal(Decimal),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeOffset(DateTime<FixedOffset>),
}

impl SqlValue {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Borrow the text of a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Read any integer-like value, including integral decimals and numeric text.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::U8(v) => Some(i64::from(*v)),
            SqlValue::I16(v) => Some(i64::from(*v)),
            SqlValue::I32(v) => Some(i64::from(*v)),
            SqlValue::I64(v) => Some(*v),
            SqlValue::Bool(v) => Some(i64::from(*v)),
            SqlValue::Decimal(d) if d.fract().is_zero() => d.to_i64(),
            SqlValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Read a BIT-like value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SqlValue::Bool(v) => Some(*v),
            other => other.as_i64().map(|v| v != 0),
        }
    }

    /// Render the value as text, `None` for NULL.
    pub fn to_text(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::String(s) => Some(s.clone()),
            other => match other.to_json() {
                Value::String(s) => Some(s),
                v => Some(v.to_string()),
            },
        }
    }

    /// Convert to a JSON value.
    pub fn to_json(&self) -> Value {
        match self {
            SqlValue::Null => Value::Null,
            SqlValue::Bool(v) => Value::Bool(*v),
            SqlValue::U8(v) => Value::from(*v),
            SqlValue::I16(v) => Value::from(*v),
            SqlValue::I32(v) => Value::from(*v),
            SqlValue::I64(v) => Value::from(*v),
            SqlValue::F32(v) => Value::from(f64::from(*v)),
            SqlValue::F64(v) => Value::from(*v),
            SqlValue::String(v) => Value::String(v.clone()),
            SqlValue::Bytes(v) => Value::String(format!("0x{}", hex::encode(v))),
            SqlValue::Decimal(v) => Value::String(v.to_string()),
            SqlValue::Uuid(v) => Value::String(v.to_string()),
            SqlValue::Date(v) => Value::String(v.format("%Y-%m-%d").to_string()),
            SqlValue::Time(v) => Value::String(v.format("%H:%M:%S%.f").to_string()),
            SqlValue::DateTime(v) => Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            SqlValue::DateTimeOffset(v) => Value::String(v.to_rfc3339()),
        }
    }

    /// Convert a JSON tool argument into a bind value.
    ///
    /// Arrays and objects are bound as their JSON text.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::I64(i)
                } else if let Some(f) = n.as_f64() {
                    SqlValue::F64(f)
                } else {
                    SqlValue::String(n.to_string())
                }
            }
            Value::String(s) => SqlValue::String(s.clone()),
            other => SqlValue::String(other.to_string()),
        }
    }
}

impl Serialize for SqlValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SqlValue::Null => serializer.serialize_none(),
            SqlValue::Bool(v) => serializer.serialize_bool(*v),
            SqlValue::U8(v) => serializer.serialize_u8(*v),
            SqlValue::I16(v) => serializer.serialize_i16(*v),
            SqlValue::I32(v) => serializer.serialize_i32(*v),
            SqlValue::I64(v) => serializer.serialize_i64(*v),
            SqlValue::F32(v) => serializer.serialize_f32(*v),
            SqlValue::F64(v) => serializer.serialize_f64(*v),
            SqlValue::String(v) => serializer.serialize_str(v),
            other => other.to_json().serialize(serializer),
        }
    }
}

/// Type mapper for converting SQL Server types to [`SqlValue`].
pub struct TypeMapper;

impl TypeMapper {
    /// Extract a value from a Tiberius row column.
    pub fn extract_column(row: &Row, idx: usize) -> SqlValue {
        if row.columns().get(idx).is_none() {
            return SqlValue::Null;
        }

        // Strings (most common)
        if let Some(v) = row.try_get::<&str, _>(idx).ok().flatten() {
            return SqlValue::String(v.to_string());
        }

        // Integers
        if let Some(v) = row.try_get::<i32, _>(idx).ok().flatten() {
            return SqlValue::I32(v);
        }
        if let Some(v) = row.try_get::<i64, _>(idx).ok().flatten() {
            return SqlValue::I64(v);
        }
        if let Some(v) = row.try_get::<i16, _>(idx).ok().flatten() {
            return SqlValue::I16(v);
        }
        if let Some(v) = row.try_get::<u8, _>(idx).ok().flatten() {
            return SqlValue::U8(v);
        }

        // Floating point
        if let Some(v) = row.try_get::<f64, _>(idx).ok().flatten() {
            return SqlValue::F64(v);
        }
        if let Some(v) = row.try_get::<f32, _>(idx).ok().flatten() {
            return SqlValue::F32(v);
        }

        if let Some(v) = row.try_get::<Decimal, _>(idx).ok().flatten() {
            return SqlValue::Decimal(v);
        }

        if let Some(v) = row.try_get::<bool, _>(idx).ok().flatten() {
            return SqlValue::Bool(v);
        }

        if let Some(v) = row.try_get::<Uuid, _>(idx).ok().flatten() {
            return SqlValue::Uuid(v);
        }

        // Date/Time types
        if let Some(v) = row.try_get::<NaiveDateTime, _>(idx).ok().flatten() {
            return SqlValue::DateTime(v);
        }
        if let Some(v) = row.try_get::<DateTime<FixedOffset>, _>(idx).ok().flatten() {
            return SqlValue::DateTimeOffset(v);
        }
        if let Some(v) = row.try_get::<NaiveDate, _>(idx).ok().flatten() {
            return SqlValue::Date(v);
        }
        if let Some(v) = row.try_get::<NaiveTime, _>(idx).ok().flatten() {
            return SqlValue::Time(v);
        }

        // Binary
        if let Some(v) = row.try_get::<&[u8], _>(idx).ok().flatten() {
            return SqlValue::Bytes(v.to_vec());
        }

        // NULLs and unsupported types
        SqlValue::Null
    }

    /// Get the SQL type name for a column.
    pub fn sql_type_name(col: &tiberius::Column) -> &'static str {
        use tiberius::ColumnType;

        match col.column_type() {
            ColumnType::Null => "null",
            ColumnType::Int1 => "tinyint",
            ColumnType::Int2 => "smallint",
            ColumnType::Int4 | ColumnType::Intn => "int",
            ColumnType::Int8 => "bigint",
            ColumnType::Float4 => "real",
            ColumnType::Float8 | ColumnType::Floatn => "float",
            ColumnType::Money => "money",
            ColumnType::Money4 => "smallmoney",
            ColumnType::Datetime | ColumnType::Datetimen => "datetime",
            ColumnType::Datetime4 => "smalldatetime",
            ColumnType::Bit | ColumnType::Bitn => "bit",
            ColumnType::Guid => "uniqueidentifier",
            ColumnType::Decimaln => "decimal",
            ColumnType::Numericn => "numeric",
            ColumnType::Daten => "date",
            ColumnType::Timen => "time",
            ColumnType::Datetime2 => "datetime2",
            ColumnType::DatetimeOffsetn => "datetimeoffset",
            ColumnType::BigVarBin => "varbinary",
            ColumnType::BigVarChar => "varchar",
            ColumnType::BigBinary => "binary",
            ColumnType::BigChar => "char",
            ColumnType::NVarchar => "nvarchar",
            ColumnType::NChar => "nchar",
            ColumnType::Xml => "xml",
            ColumnType::Text => "text",
            ColumnType::Image => "image",
            ColumnType::NText => "ntext",
            ColumnType::SSVariant => "sql_variant",
            _ => "unknown",
        }
    }
}

mod hex {
    pub fn encode(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02X}", b)).collect()
    }
}
