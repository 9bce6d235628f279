//! Dynamic SQL values and literal escaping.
//!
//! [`SqlValue`] is the single value representation flowing through the
//! compiler: filter operands, payload values, and raw-query parameters.
//! [`escape`] renders a value as dialect-safe literal text and is the one
//! injection boundary for every inline literal; the [`ToSql`] impl carries
//! the same values over the positional-parameter path for write payloads.

use std::fmt;
use std::sync::Arc;

use bytes::BytesMut;
use chrono::NaiveDateTime;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};

/// A dynamically typed SQL value.
#[derive(Clone)]
pub enum SqlValue {
    Null,
    /// The designated skip marker: payload fields carrying `Absent` are
    /// omitted from INSERT and UPDATE statements entirely.
    Absent,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
    Array(Vec<SqlValue>),
    Json(serde_json::Value),
    /// A lazily computed literal: invoked at escape/bind time and the
    /// result re-escaped. See [`SqlValue::now`].
    Deferred(Arc<dyn Fn() -> SqlValue + Send + Sync>),
}

impl SqlValue {
    /// A deferred value producing the current UTC timestamp when escaped.
    pub fn now() -> Self {
        SqlValue::Deferred(Arc::new(|| {
            SqlValue::Timestamp(chrono::Utc::now().naive_utc())
        }))
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, SqlValue::Absent)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Resolve deferred values; everything else passes through.
    fn resolved(&self) -> SqlValue {
        match self {
            SqlValue::Deferred(f) => f().resolved(),
            other => other.clone(),
        }
    }
}

impl fmt::Debug for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "Null"),
            SqlValue::Absent => write!(f, "Absent"),
            SqlValue::Bool(v) => write!(f, "Bool({v})"),
            SqlValue::Int(v) => write!(f, "Int({v})"),
            SqlValue::Float(v) => write!(f, "Float({v})"),
            SqlValue::Text(v) => write!(f, "Text({v:?})"),
            SqlValue::Timestamp(v) => write!(f, "Timestamp({v})"),
            SqlValue::Array(v) => f.debug_tuple("Array").field(v).finish(),
            SqlValue::Json(v) => write!(f, "Json({v})"),
            SqlValue::Deferred(_) => write!(f, "Deferred(..)"),
        }
    }
}

impl PartialEq for SqlValue {
    fn eq(&self, other: &Self) -> bool {
        use SqlValue::*;
        match (self, other) {
            (Null, Null) | (Absent, Absent) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Text(a), Text(b)) => a == b,
            (Timestamp(a), Timestamp(b)) => a == b,
            (Array(a), Array(b)) => a == b,
            (Json(a), Json(b)) => a == b,
            _ => false,
        }
    }
}

/// Render a value as PostgreSQL literal text.
///
/// Strings double single quotes and backslashes; a literal that contained a
/// backslash is prefixed with `E` so quoting stays correct regardless of
/// the server's `standard_conforming_strings` setting.
pub fn escape(value: &SqlValue) -> String {
    match value {
        SqlValue::Null | SqlValue::Absent => "null".to_string(),
        SqlValue::Deferred(f) => escape(&f()),
        SqlValue::Bool(true) => "true".to_string(),
        SqlValue::Bool(false) => "false".to_string(),
        SqlValue::Int(i) => i.to_string(),
        SqlValue::Float(f) => {
            if f.is_finite() {
                f.to_string()
            } else {
                "null".to_string()
            }
        }
        SqlValue::Text(s) => quote_string(s),
        SqlValue::Timestamp(ts) => quote_string(&ts.format("%Y-%m-%d %H:%M:%S").to_string()),
        SqlValue::Array(items) => {
            if items.is_empty() {
                return "null".to_string();
            }
            let inner: Vec<String> = items.iter().map(escape).collect();
            format!("ARRAY[{}]", inner.join(","))
        }
        SqlValue::Json(v) => match v {
            serde_json::Value::Null => "null".to_string(),
            serde_json::Value::Bool(b) => escape(&SqlValue::Bool(*b)),
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::String(s) => quote_string(s),
            serde_json::Value::Array(items) => {
                escape(&SqlValue::Array(items.iter().cloned().map(SqlValue::from).collect()))
            }
            serde_json::Value::Object(_) => quote_string(&v.to_string()),
        },
    }
}

/// Quote a string literal, doubling `'` and `\`.
fn quote_string(val: &str) -> String {
    let mut out = String::with_capacity(val.len() + 2);
    let mut backslash = false;
    for c in val.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' => {
                backslash = true;
                out.push_str("\\\\");
            }
            c => out.push(c),
        }
    }
    let prefix = if backslash { "E" } else { "" };
    format!("{prefix}'{out}'")
}

impl ToSql for SqlValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            SqlValue::Null | SqlValue::Absent => Ok(IsNull::Yes),
            SqlValue::Deferred(f) => f().resolved().to_sql(ty, out),
            SqlValue::Bool(b) => b.to_sql(ty, out),
            SqlValue::Int(i) => match *ty {
                Type::INT2 => (*i as i16).to_sql(ty, out),
                Type::INT4 => (*i as i32).to_sql(ty, out),
                Type::FLOAT4 => (*i as f32).to_sql(ty, out),
                Type::FLOAT8 => (*i as f64).to_sql(ty, out),
                Type::TEXT | Type::VARCHAR => i.to_string().to_sql(ty, out),
                _ => i.to_sql(ty, out),
            },
            SqlValue::Float(f) => match *ty {
                Type::FLOAT4 => (*f as f32).to_sql(ty, out),
                Type::TEXT | Type::VARCHAR => f.to_string().to_sql(ty, out),
                _ => f.to_sql(ty, out),
            },
            SqlValue::Text(s) => s.to_sql(ty, out),
            SqlValue::Timestamp(ts) => ts.to_sql(ty, out),
            SqlValue::Array(items) => match *ty {
                Type::JSON | Type::JSONB => {
                    let json: Vec<serde_json::Value> =
                        items.iter().map(|v| v.resolved().into_json()).collect();
                    serde_json::Value::Array(json).to_sql(ty, out)
                }
                _ => Err("array parameters are only bindable to json columns; \
                          use an inline filter literal instead"
                    .into()),
            },
            SqlValue::Json(v) => match *ty {
                Type::TEXT | Type::VARCHAR => v.to_string().to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

impl SqlValue {
    /// Convert into a JSON value, losing only deferred laziness.
    pub fn into_json(self) -> serde_json::Value {
        match self {
            SqlValue::Null | SqlValue::Absent => serde_json::Value::Null,
            SqlValue::Bool(b) => serde_json::Value::Bool(b),
            SqlValue::Int(i) => serde_json::Value::from(i),
            SqlValue::Float(f) => serde_json::Value::from(f),
            SqlValue::Text(s) => serde_json::Value::String(s),
            SqlValue::Timestamp(ts) => {
                serde_json::Value::String(ts.format("%Y-%m-%d %H:%M:%S").to_string())
            }
            SqlValue::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(SqlValue::into_json).collect())
            }
            SqlValue::Json(v) => v,
            SqlValue::Deferred(f) => f().into_json(),
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(v as i64)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
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

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::Timestamp(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => SqlValue::Null,
        }
    }
}

impl From<serde_json::Value> for SqlValue {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => SqlValue::Null,
            serde_json::Value::Bool(b) => SqlValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::Int(i)
                } else {
                    SqlValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => SqlValue::Text(s),
            serde_json::Value::Array(items) => {
                SqlValue::Array(items.into_iter().map(SqlValue::from).collect())
            }
            obj @ serde_json::Value::Object(_) => SqlValue::Json(obj),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_escape_null_and_absent() {
        assert_eq!(escape(&SqlValue::Null), "null");
        assert_eq!(escape(&SqlValue::Absent), "null");
    }

    #[test]
    fn test_escape_booleans() {
        assert_eq!(escape(&SqlValue::Bool(true)), "true");
        assert_eq!(escape(&SqlValue::Bool(false)), "false");
    }

    #[test]
    fn test_escape_numbers_unquoted() {
        assert_eq!(escape(&SqlValue::Int(42)), "42");
        assert_eq!(escape(&SqlValue::Int(-7)), "-7");
        assert_eq!(escape(&SqlValue::Float(3.5)), "3.5");
        assert_eq!(escape(&SqlValue::Float(f64::NAN)), "null");
    }

    #[test]
    fn test_escape_plain_string() {
        assert_eq!(escape(&SqlValue::from("hello")), "'hello'");
    }

    #[test]
    fn test_escape_doubles_single_quotes() {
        assert_eq!(escape(&SqlValue::from("O'Brien")), "'O''Brien'");
    }

    #[test]
    fn test_escape_backslash_gets_e_prefix() {
        assert_eq!(escape(&SqlValue::from(r"a\b")), r"E'a\\b'");
        assert_eq!(escape(&SqlValue::from(r"it's a \ path")), r"E'it''s a \\ path'");
    }

    #[test]
    fn test_escape_timestamp_zero_padded() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 7)
            .unwrap()
            .and_hms_opt(9, 5, 1)
            .unwrap();
        assert_eq!(escape(&SqlValue::Timestamp(ts)), "'2024-03-07 09:05:01'");
    }

    #[test]
    fn test_escape_array() {
        let arr = SqlValue::Array(vec![SqlValue::Int(1), SqlValue::from("x'y")]);
        assert_eq!(escape(&arr), "ARRAY[1,'x''y']");
    }

    #[test]
    fn test_escape_empty_array_is_null() {
        assert_eq!(escape(&SqlValue::Array(vec![])), "null");
    }

    #[test]
    fn test_escape_nested_array() {
        let arr = SqlValue::Array(vec![SqlValue::Array(vec![SqlValue::Int(1)])]);
        assert_eq!(escape(&arr), "ARRAY[ARRAY[1]]");
    }

    #[test]
    fn test_escape_json_object_encodes_then_quotes() {
        let v = SqlValue::Json(serde_json::json!({"a": "b'c"}));
        assert_eq!(escape(&v), r#"'{"a":"b''c"}'"#);
    }

    #[test]
    fn test_escape_json_scalars() {
        assert_eq!(escape(&SqlValue::Json(serde_json::json!(true))), "true");
        assert_eq!(escape(&SqlValue::Json(serde_json::json!(12))), "12");
        assert_eq!(escape(&SqlValue::Json(serde_json::json!("s"))), "'s'");
        assert_eq!(escape(&SqlValue::Json(serde_json::Value::Null)), "null");
    }

    #[test]
    fn test_escape_deferred_invokes_and_reescapes() {
        let v = SqlValue::Deferred(Arc::new(|| SqlValue::from("late")));
        assert_eq!(escape(&v), "'late'");
    }

    #[test]
    fn test_escape_round_trip_for_quoted_strings() {
        // Substituting the escaped literal back and reading it the way the
        // server would must reproduce the original bytes.
        for original in ["a'b", r"a\b", r"'\''", "plain"] {
            let escaped = escape(&SqlValue::from(original));
            let body = escaped
                .strip_prefix('E')
                .unwrap_or(&escaped)
                .strip_prefix('\'')
                .and_then(|s| s.strip_suffix('\''))
                .unwrap();
            let decoded = body.replace("''", "'").replace(r"\\", r"\");
            assert_eq!(decoded, original, "escape({original:?}) = {escaped}");
        }
    }

    #[test]
    fn test_from_json_value() {
        assert_eq!(SqlValue::from(serde_json::json!(null)), SqlValue::Null);
        assert_eq!(SqlValue::from(serde_json::json!(3)), SqlValue::Int(3));
        assert_eq!(SqlValue::from(serde_json::json!(2.5)), SqlValue::Float(2.5));
        assert_eq!(
            SqlValue::from(serde_json::json!(["a"])),
            SqlValue::Array(vec![SqlValue::from("a")])
        );
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(SqlValue::from(None::<i64>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some(5i64)), SqlValue::Int(5));
    }
}
