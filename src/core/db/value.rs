/// Value Module
///
/// Portable values exchanged with providers, the portable parameter type
/// enumeration, and the closed set of coercion rules used when a caller asks
/// for a value as a concrete Rust type.
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Text layout used when date-times are stored as text.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const DATETIME_FORMATS: [&str; 2] = [DATETIME_FORMAT, "%Y-%m-%dT%H:%M:%S%.f"];
const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";

/// A single value read from or bound to a provider.
///
/// `Null` is the explicit database-null marker; providers never see an
/// absent value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Uuid(Uuid),
    DateTime(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the variant, used in conversion errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
            Value::Uuid(_) => "uuid",
            Value::DateTime(_) => "datetime",
        }
    }

    /// Renders the value as JSON for display and export.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Real(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Blob(b) => serde_json::Value::String(format!("<BLOB: {} bytes>", b.len())),
            Value::Uuid(u) => serde_json::Value::String(u.hyphenated().to_string()),
            Value::DateTime(dt) => serde_json::Value::String(dt.format(DATETIME_FORMAT).to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
            Value::Text(s) => write!(f, "{}", s),
            Value::Blob(b) => write!(f, "<BLOB: {} bytes>", b.len()),
            Value::Uuid(u) => write!(f, "{}", u.hyphenated()),
            Value::DateTime(dt) => write!(f, "{}", dt.format(DATETIME_FORMAT)),
        }
    }
}

macro_rules! impl_value_from {
    ($($t:ty => $variant:ident as $conv:ty),* $(,)?) => {$(
        impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::$variant(<$conv>::from(v))
            }
        }
    )*};
}

impl_value_from! {
    bool => Bool as bool,
    i8 => Integer as i64,
    i16 => Integer as i64,
    i32 => Integer as i64,
    i64 => Integer as i64,
    u8 => Integer as i64,
    u16 => Integer as i64,
    u32 => Integer as i64,
    f32 => Real as f64,
    f64 => Real as f64,
    String => Text as String,
    Vec<u8> => Blob as Vec<u8>,
    Uuid => Uuid as Uuid,
    NaiveDateTime => DateTime as NaiveDateTime,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Blob(v.to_vec())
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::DateTime(v.and_time(NaiveTime::MIN))
    }
}

impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        Value::Text(v.format(TIME_FORMAT).to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Portable, backend-agnostic parameter types.
///
/// Each provider translates these through its type mapping table; a type
/// without a mapping is rejected when the parameter is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbType {
    AnsiString,
    AnsiStringFixedLength,
    Binary,
    Boolean,
    Byte,
    Currency,
    Date,
    DateTime,
    DateTime2,
    DateTimeOffset,
    Decimal,
    Double,
    Guid,
    Int16,
    Int32,
    Int64,
    Object,
    SByte,
    Single,
    String,
    StringFixedLength,
    Time,
    UInt16,
    UInt32,
    UInt64,
    VarNumeric,
    Xml,
}

impl DbType {
    pub const ALL: [DbType; 27] = [
        DbType::AnsiString,
        DbType::AnsiStringFixedLength,
        DbType::Binary,
        DbType::Boolean,
        DbType::Byte,
        DbType::Currency,
        DbType::Date,
        DbType::DateTime,
        DbType::DateTime2,
        DbType::DateTimeOffset,
        DbType::Decimal,
        DbType::Double,
        DbType::Guid,
        DbType::Int16,
        DbType::Int32,
        DbType::Int64,
        DbType::Object,
        DbType::SByte,
        DbType::Single,
        DbType::String,
        DbType::StringFixedLength,
        DbType::Time,
        DbType::UInt16,
        DbType::UInt32,
        DbType::UInt64,
        DbType::VarNumeric,
        DbType::Xml,
    ];
}

/// A value could not be coerced to the requested Rust type.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot convert {from} value \"{value}\" to {target}")]
pub struct ConversionError {
    pub from: &'static str,
    pub value: String,
    pub target: &'static str,
}

impl ConversionError {
    pub fn new(from: &'static str, value: impl fmt::Display, target: &'static str) -> Self {
        ConversionError {
            from,
            value: value.to_string(),
            target,
        }
    }

    fn of(value: &Value, target: &'static str) -> Self {
        ConversionError::new(value.kind_name(), value, target)
    }
}

/// Closed set of coercions from a non-null `Value` into `Self`.
///
/// Every implementation passes its own variant through untouched before
/// trying any other rule. Null handling lives in [`convert`].
pub trait FromValue: Sized {
    fn from_value(value: Value) -> std::result::Result<Self, ConversionError>;
}

/// Converts a value to `T`; database-null maps to `T::default()`.
pub fn convert<T: FromValue + Default>(value: Value) -> std::result::Result<T, ConversionError> {
    if value.is_null() {
        return Ok(T::default());
    }
    T::from_value(value)
}

impl FromValue for Value {
    fn from_value(value: Value) -> std::result::Result<Self, ConversionError> {
        Ok(value)
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> std::result::Result<Self, ConversionError> {
        if value.is_null() {
            return Ok(None);
        }
        T::from_value(value).map(Some)
    }
}

/// Rounds half to even. `i64::MAX as f64` is 2^63, one past the range.
fn real_to_i64(f: f64) -> Option<i64> {
    let rounded = f.round_ties_even();
    if rounded.is_finite() && rounded >= i64::MIN as f64 && rounded < i64::MAX as f64 {
        Some(rounded as i64)
    } else {
        None
    }
}

macro_rules! impl_from_value_int {
    ($($t:ty),* $(,)?) => {$(
        impl FromValue for $t {
            fn from_value(value: Value) -> std::result::Result<Self, ConversionError> {
                let target = stringify!($t);
                match value {
                    Value::Integer(i) => <$t>::try_from(i)
                        .map_err(|_| ConversionError::new("integer", i, target)),
                    Value::Bool(b) => Ok(b as $t),
                    Value::Real(f) => real_to_i64(f)
                        .and_then(|i| <$t>::try_from(i).ok())
                        .ok_or_else(|| ConversionError::new("real", f, target)),
                    Value::Text(ref s) => s
                        .trim()
                        .parse::<$t>()
                        .map_err(|_| ConversionError::of(&value, target)),
                    other => Err(ConversionError::of(&other, target)),
                }
            }
        }
    )*};
}

impl_from_value_int!(i8, i16, i32, i64, u8, u16, u32, u64, usize);

impl FromValue for f64 {
    fn from_value(value: Value) -> std::result::Result<Self, ConversionError> {
        match value {
            Value::Real(f) => Ok(f),
            Value::Integer(i) => Ok(i as f64),
            Value::Bool(b) => Ok(if b { 1.0 } else { 0.0 }),
            Value::Text(ref s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| ConversionError::of(&value, "f64")),
            other => Err(ConversionError::of(&other, "f64")),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: Value) -> std::result::Result<Self, ConversionError> {
        match value {
            Value::Text(ref s) => s
                .trim()
                .parse::<f32>()
                .map_err(|_| ConversionError::of(&value, "f32")),
            other => f64::from_value(other)
                .map(|f| f as f32)
                .map_err(|e| ConversionError { target: "f32", ..e }),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> std::result::Result<Self, ConversionError> {
        match value {
            Value::Bool(b) => Ok(b),
            Value::Integer(i) => Ok(i != 0),
            Value::Real(f) => Ok(f != 0.0),
            Value::Text(ref s) => {
                let trimmed = s.trim();
                if trimmed.eq_ignore_ascii_case("true") || trimmed == "1" {
                    Ok(true)
                } else if trimmed.eq_ignore_ascii_case("false") || trimmed == "0" {
                    Ok(false)
                } else {
                    Err(ConversionError::of(&value, "bool"))
                }
            }
            other => Err(ConversionError::of(&other, "bool")),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> std::result::Result<Self, ConversionError> {
        match value {
            Value::Text(s) => Ok(s),
            Value::Blob(ref b) => {
                String::from_utf8(b.clone()).map_err(|_| ConversionError::of(&value, "String"))
            }
            other => Ok(other.to_string()),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> std::result::Result<Self, ConversionError> {
        match value {
            Value::Blob(b) => Ok(b),
            Value::Uuid(u) => Ok(u.as_bytes().to_vec()),
            other => Err(ConversionError::of(&other, "Vec<u8>")),
        }
    }
}

/// Identifiers arrive either as their textual form or as 16 raw bytes.
impl FromValue for Uuid {
    fn from_value(value: Value) -> std::result::Result<Self, ConversionError> {
        match value {
            Value::Uuid(u) => Ok(u),
            Value::Text(ref s) => {
                Uuid::parse_str(s.trim()).map_err(|_| ConversionError::of(&value, "Uuid"))
            }
            Value::Blob(ref b) => {
                Uuid::from_slice(b).map_err(|_| ConversionError::of(&value, "Uuid"))
            }
            other => Err(ConversionError::of(&other, "Uuid")),
        }
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: Value) -> std::result::Result<Self, ConversionError> {
        match value {
            Value::DateTime(dt) => Ok(dt),
            Value::Integer(secs) => DateTime::from_timestamp(secs, 0)
                .map(|dt| dt.naive_utc())
                .ok_or_else(|| ConversionError::new("integer", secs, "NaiveDateTime")),
            Value::Text(ref s) => parse_datetime(s.trim())
                .ok_or_else(|| ConversionError::of(&value, "NaiveDateTime")),
            other => Err(ConversionError::of(&other, "NaiveDateTime")),
        }
    }
}

impl FromValue for NaiveDate {
    fn from_value(value: Value) -> std::result::Result<Self, ConversionError> {
        match value {
            Value::Text(ref s) => NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
                .ok()
                .or_else(|| parse_datetime(s.trim()).map(|dt| dt.date()))
                .ok_or_else(|| ConversionError::of(&value, "NaiveDate")),
            other => NaiveDateTime::from_value(other)
                .map(|dt| dt.date())
                .map_err(|e| ConversionError { target: "NaiveDate", ..e }),
        }
    }
}

impl FromValue for NaiveTime {
    fn from_value(value: Value) -> std::result::Result<Self, ConversionError> {
        match value {
            Value::DateTime(dt) => Ok(dt.time()),
            Value::Text(ref s) => NaiveTime::parse_from_str(s.trim(), TIME_FORMAT)
                .map_err(|_| ConversionError::of(&value, "NaiveTime")),
            other => Err(ConversionError::of(&other, "NaiveTime")),
        }
    }
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, DATE_FORMAT)
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_converts_to_default() {
        assert_eq!(convert::<i32>(Value::Null).unwrap(), 0);
        assert_eq!(convert::<String>(Value::Null).unwrap(), "");
        assert_eq!(convert::<Option<i64>>(Value::Null).unwrap(), None);
        assert_eq!(convert::<Uuid>(Value::Null).unwrap(), Uuid::nil());
        assert_eq!(convert::<Value>(Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn test_numeric_widening_and_text_parsing() {
        assert_eq!(convert::<i32>(Value::Text("5".into())).unwrap(), 5);
        assert_eq!(convert::<i64>(Value::Text(" 42 ".into())).unwrap(), 42);
        assert_eq!(convert::<f64>(Value::Integer(3)).unwrap(), 3.0);
        assert_eq!(convert::<i32>(Value::Real(2.6)).unwrap(), 3);
        assert_eq!(convert::<i32>(Value::Real(2.5)).unwrap(), 2);
        assert_eq!(convert::<i32>(Value::Real(3.5)).unwrap(), 4);
        assert_eq!(convert::<i64>(Value::Real(-2.5)).unwrap(), -2);
        assert_eq!(convert::<i32>(Value::Bool(true)).unwrap(), 1);
        assert_eq!(convert::<String>(Value::Integer(7)).unwrap(), "7");
        assert_eq!(convert::<Option<i32>>(Value::Integer(9)).unwrap(), Some(9));
    }

    #[test]
    fn test_conversion_failures() {
        let err = convert::<i32>(Value::Text("abc".into())).unwrap_err();
        assert_eq!(err.from, "text");
        assert_eq!(err.target, "i32");
        assert_eq!(err.to_string(), "cannot convert text value \"abc\" to i32");

        assert!(convert::<u8>(Value::Integer(300)).is_err());
        assert!(convert::<i64>(Value::Real(9_223_372_036_854_775_808.0)).is_err());
        assert_eq!(
            convert::<i64>(Value::Real(-9_223_372_036_854_775_808.0)).unwrap(),
            i64::MIN
        );
        assert!(convert::<i64>(Value::Blob(vec![1, 2])).is_err());
        assert!(convert::<bool>(Value::Text("maybe".into())).is_err());
        assert_eq!(convert::<f32>(Value::Blob(vec![])).unwrap_err().target, "f32");
    }

    #[test]
    fn test_identifier_from_text_and_bytes() {
        let id = Uuid::new_v4();
        let from_text: Uuid = convert(Value::Text(id.hyphenated().to_string())).unwrap();
        let from_blob: Uuid = convert(Value::Blob(id.as_bytes().to_vec())).unwrap();
        assert_eq!(from_text, id);
        assert_eq!(from_blob, id);
        assert!(convert::<Uuid>(Value::Blob(vec![0; 15])).is_err());
    }

    #[test]
    fn test_datetime_text_roundtrip() {
        let dt = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_micro_opt(13, 45, 1, 250)
            .unwrap();
        let text = String::from_value(Value::DateTime(dt)).unwrap();
        assert_eq!(convert::<NaiveDateTime>(Value::Text(text)).unwrap(), dt);
        assert_eq!(
            convert::<NaiveDate>(Value::Text("2024-02-29".into())).unwrap(),
            dt.date()
        );
        assert_eq!(
            convert::<NaiveDateTime>(Value::Integer(0)).unwrap(),
            NaiveDate::from_ymd_opt(1970, 1, 1).unwrap().and_time(NaiveTime::MIN)
        );
    }

    #[test]
    fn test_same_type_passes_through() {
        let blob = Value::Blob(vec![9, 8, 7]);
        assert_eq!(convert::<Value>(blob.clone()).unwrap(), blob);
        assert_eq!(convert::<Vec<u8>>(blob).unwrap(), vec![9, 8, 7]);
    }

    #[test]
    fn test_value_from_option() {
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".into()));
        assert_eq!(Value::from(5u8).to_json(), serde_json::json!(5));
    }
}
