//! Type coercion applied when a value is assigned to a declared column

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::backends::DatabaseValue;
use crate::connection::NOW;
use crate::schema::{SqlType, TypeFamily};

/// Sanitizes text assigned to text columns.
///
/// Supplied by the host application; the record layer only calls it.
pub trait ImportFilter: Send + Sync {
    fn import(&self, text: &str) -> String;
}

/// Leaves text untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl ImportFilter for PassThrough {
    fn import(&self, text: &str) -> String {
        text.to_string()
    }
}

/// Escapes the HTML special characters
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlEscapeFilter;

impl ImportFilter for HtmlEscapeFilter {
    fn import(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for c in text.chars() {
            match c {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '"' => out.push_str("&quot;"),
                '\'' => out.push_str("&#039;"),
                other => out.push(other),
            }
        }
        out
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d.%m.%Y", "%Y/%m/%d"];

/// Convert a value to the canonical form of the declared column type.
///
/// Values that cannot be represented become `Null`; coercion never fails.
/// Date and time columns keep the `NOW()` sentinel so the database fills it in.
pub fn coerce(sql_type: SqlType, value: DatabaseValue, filter: &dyn ImportFilter) -> DatabaseValue {
    if value.is_null() {
        return value;
    }

    let family = sql_type.family();
    if is_now(&value) && matches!(family, TypeFamily::DateTime | TypeFamily::Date | TypeFamily::Time) {
        return DatabaseValue::from(NOW);
    }

    match family {
        TypeFamily::Integer => to_integer(&value),
        TypeFamily::Float => to_float(&value),
        TypeFamily::Boolean => DatabaseValue::Bool(!value.is_empty()),
        TypeFamily::Text => match value {
            DatabaseValue::String(text) => DatabaseValue::String(filter.import(&text)),
            other => DatabaseValue::String(filter.import(&other.to_string())),
        },
        TypeFamily::DateTime => to_datetime(&value)
            .map(DatabaseValue::Timestamp)
            .unwrap_or(DatabaseValue::Null),
        TypeFamily::Date => to_datetime(&value)
            .map(|ts| DatabaseValue::Date(ts.date()))
            .unwrap_or(DatabaseValue::Null),
        TypeFamily::Time => to_time(&value)
            .map(DatabaseValue::Time)
            .unwrap_or(DatabaseValue::Null),
        TypeFamily::Json => match value {
            DatabaseValue::Json(json) => DatabaseValue::Json(json),
            DatabaseValue::String(text) => DatabaseValue::Json(
                serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text)),
            ),
            other => DatabaseValue::Json(other.to_json()),
        },
        TypeFamily::Uuid => match value {
            DatabaseValue::Uuid(id) => DatabaseValue::Uuid(id),
            DatabaseValue::String(text) => uuid::Uuid::parse_str(text.trim())
                .map(DatabaseValue::Uuid)
                .unwrap_or(DatabaseValue::Null),
            _ => DatabaseValue::Null,
        },
        TypeFamily::Binary => value,
    }
}

/// Equality used by change tracking.
///
/// Date-like columns compare by parsed value and numbers by magnitude, so
/// `"2024-01-05 10:00"` equals `"2024-01-05 10:00:00"` and `5` equals `5.0`.
pub fn values_equal(sql_type: SqlType, a: &DatabaseValue, b: &DatabaseValue) -> bool {
    match (a.is_null(), b.is_null()) {
        (true, true) => return true,
        (true, false) | (false, true) => return false,
        _ => {}
    }

    match sql_type.family() {
        TypeFamily::DateTime | TypeFamily::Date => match (to_datetime(a), to_datetime(b)) {
            (Some(left), Some(right)) if sql_type.family() == TypeFamily::Date => left.date() == right.date(),
            (Some(left), Some(right)) => left == right,
            _ => a == b,
        },
        TypeFamily::Time => match (to_time(a), to_time(b)) {
            (Some(left), Some(right)) => left == right,
            _ => a == b,
        },
        TypeFamily::Integer | TypeFamily::Float => match (a.as_f64(), b.as_f64()) {
            (Some(left), Some(right)) => left == right,
            _ => a == b,
        },
        TypeFamily::Boolean => a.is_empty() == b.is_empty(),
        _ => a == b,
    }
}

fn is_now(value: &DatabaseValue) -> bool {
    matches!(value, DatabaseValue::String(text) if text.trim().eq_ignore_ascii_case(NOW))
}

fn to_integer(value: &DatabaseValue) -> DatabaseValue {
    match value {
        DatabaseValue::Int32(i) => DatabaseValue::Int64(*i as i64),
        DatabaseValue::Int64(i) => DatabaseValue::Int64(*i),
        DatabaseValue::Bool(b) => DatabaseValue::Int64(*b as i64),
        DatabaseValue::Float64(f) if f.is_finite() && f.fract() == 0.0 => DatabaseValue::Int64(*f as i64),
        DatabaseValue::String(s) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                return DatabaseValue::Int64(i);
            }
            match trimmed.parse::<f64>() {
                Ok(f) if f.is_finite() && f.fract() == 0.0 => DatabaseValue::Int64(f as i64),
                _ => DatabaseValue::Null,
            }
        }
        _ => DatabaseValue::Null,
    }
}

fn to_float(value: &DatabaseValue) -> DatabaseValue {
    match value {
        DatabaseValue::String(s) => s
            .trim()
            .replace(',', ".")
            .parse::<f64>()
            .map(DatabaseValue::Float64)
            .unwrap_or(DatabaseValue::Null),
        other => other
            .as_f64()
            .or_else(|| other.as_bool().map(|b| b as i64 as f64))
            .map(DatabaseValue::Float64)
            .unwrap_or(DatabaseValue::Null),
    }
}

fn from_epoch(seconds: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp(seconds, 0).map(|ts| ts.naive_utc())
}

fn to_datetime(value: &DatabaseValue) -> Option<NaiveDateTime> {
    match value {
        DatabaseValue::Timestamp(ts) => ts.with_nanosecond(0),
        DatabaseValue::Date(date) => date.and_hms_opt(0, 0, 0),
        DatabaseValue::Int32(i) => from_epoch(*i as i64),
        DatabaseValue::Int64(i) => from_epoch(*i),
        DatabaseValue::Float64(f) if f.is_finite() => from_epoch(f.trunc() as i64),
        DatabaseValue::String(s) => parse_datetime(s.trim()),
        _ => None,
    }
}

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    if text.is_empty() {
        return None;
    }
    if text.bytes().all(|b| b.is_ascii_digit()) && text.len() > 8 {
        return from_epoch(text.parse().ok()?);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return ts.naive_utc().with_nanosecond(0);
    }
    for format in DATETIME_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, format) {
            return ts.with_nanosecond(0);
        }
    }
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

fn to_time(value: &DatabaseValue) -> Option<NaiveTime> {
    match value {
        DatabaseValue::Time(time) => time.with_nanosecond(0),
        DatabaseValue::Timestamp(ts) => ts.time().with_nanosecond(0),
        DatabaseValue::String(s) => {
            let text = s.trim();
            NaiveTime::parse_from_str(text, "%H:%M:%S")
                .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
                .ok()
                .or_else(|| parse_datetime(text).map(|ts| ts.time()))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(text: &str) -> DatabaseValue {
        DatabaseValue::Timestamp(NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S").unwrap())
    }

    #[test]
    fn test_integer_requires_whole_number() {
        assert_eq!(coerce(SqlType::Integer, "42".into(), &PassThrough), DatabaseValue::Int64(42));
        assert_eq!(coerce(SqlType::BigInt, "42.0".into(), &PassThrough), DatabaseValue::Int64(42));
        assert_eq!(coerce(SqlType::Integer, "4.5".into(), &PassThrough), DatabaseValue::Null);
        assert_eq!(coerce(SqlType::Integer, "abc".into(), &PassThrough), DatabaseValue::Null);
    }

    #[test]
    fn test_float_accepts_decimal_comma() {
        assert_eq!(
            coerce(SqlType::Decimal(10, 2), "12,50".into(), &PassThrough),
            DatabaseValue::Float64(12.5)
        );
        assert_eq!(coerce(SqlType::Double, 3i64.into(), &PassThrough), DatabaseValue::Float64(3.0));
    }

    #[test]
    fn test_boolean_cast_keeps_null() {
        assert_eq!(coerce(SqlType::Boolean, "1".into(), &PassThrough), DatabaseValue::Bool(true));
        assert_eq!(coerce(SqlType::Boolean, "0".into(), &PassThrough), DatabaseValue::Bool(false));
        assert_eq!(coerce(SqlType::Boolean, 0i64.into(), &PassThrough), DatabaseValue::Bool(false));
        assert_eq!(coerce(SqlType::Boolean, DatabaseValue::Null, &PassThrough), DatabaseValue::Null);
    }

    #[test]
    fn test_text_goes_through_filter() {
        assert_eq!(
            coerce(SqlType::Text, "<b>Acme</b>".into(), &HtmlEscapeFilter),
            DatabaseValue::from("&lt;b&gt;Acme&lt;/b&gt;")
        );
        assert_eq!(coerce(SqlType::Varchar(10), 7i64.into(), &PassThrough), DatabaseValue::from("7"));
    }

    #[test]
    fn test_datetime_parsing() {
        assert_eq!(
            coerce(SqlType::DateTime, "2024-01-05 10:30:00".into(), &PassThrough),
            ts("2024-01-05 10:30:00")
        );
        assert_eq!(
            coerce(SqlType::Timestamp, "2024-01-05T10:30:00Z".into(), &PassThrough),
            ts("2024-01-05 10:30:00")
        );
        assert_eq!(
            coerce(SqlType::DateTime, 1704450600i64.into(), &PassThrough),
            ts("2024-01-05 10:30:00")
        );
        assert_eq!(
            coerce(SqlType::Date, "2024-01-05 10:30:00".into(), &PassThrough),
            DatabaseValue::Date(NaiveDate::from_ymd_opt(2024, 1, 5).unwrap())
        );
        assert_eq!(coerce(SqlType::DateTime, "next tuesday".into(), &PassThrough), DatabaseValue::Null);
    }

    #[test]
    fn test_now_sentinel_survives_temporal_columns() {
        for sql_type in [SqlType::DateTime, SqlType::Timestamp, SqlType::Date, SqlType::Time] {
            assert_eq!(coerce(sql_type, "NOW()".into(), &PassThrough), DatabaseValue::from(NOW));
        }
        assert_eq!(coerce(SqlType::DateTime, " now() ".into(), &PassThrough), DatabaseValue::from(NOW));
        assert_eq!(coerce(SqlType::Varchar(10), "NOW()".into(), &PassThrough), DatabaseValue::from("NOW()"));
        assert!(!values_equal(SqlType::DateTime, &"NOW()".into(), &ts("2024-01-05 10:30:00")));
    }

    #[test]
    fn test_dates_compare_by_parsed_value() {
        assert!(values_equal(
            SqlType::DateTime,
            &"2024-01-05 10:30".into(),
            &ts("2024-01-05 10:30:00")
        ));
        assert!(!values_equal(
            SqlType::DateTime,
            &"2024-01-05 10:31:00".into(),
            &ts("2024-01-05 10:30:00")
        ));
        assert!(values_equal(SqlType::Integer, &5i64.into(), &5.0f64.into()));
        assert!(!values_equal(SqlType::Text, &"a".into(), &DatabaseValue::Null));
    }
}
