//! DuckDB cell → JSON conversion

use chrono::{DateTime, Days, NaiveDate, Utc};
use duckdb::types::{TimeUnit, ValueRef};
use serde_json::{json, Value};

/// Convert one DuckDB cell to a JSON scalar.
pub fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Boolean(b) => Value::Bool(b),
        ValueRef::TinyInt(i) => json!(i),
        ValueRef::SmallInt(i) => json!(i),
        ValueRef::Int(i) => json!(i),
        ValueRef::BigInt(i) => json!(i),
        ValueRef::HugeInt(i) => match i64::try_from(i) {
            Ok(small) => json!(small),
            Err(_) => Value::String(i.to_string()),
        },
        ValueRef::UTinyInt(i) => json!(i),
        ValueRef::USmallInt(i) => json!(i),
        ValueRef::UInt(i) => json!(i),
        ValueRef::UBigInt(i) => json!(i),
        ValueRef::Float(f) => json!(f),
        ValueRef::Double(f) => json!(f),
        ValueRef::Decimal(d) => {
            let text = d.to_string();
            match text.parse::<f64>() {
                Ok(f) => json!(f),
                Err(_) => Value::String(text),
            }
        }
        ValueRef::Text(s) => Value::String(String::from_utf8_lossy(s).to_string()),
        ValueRef::Blob(b) => Value::String(format!("<blob {} bytes>", b.len())),
        ValueRef::Date32(days) => date_from_days(days),
        ValueRef::Timestamp(unit, value) => timestamp(unit, value),
        _ => Value::String("<unsupported>".to_string()),
    }
}

fn date_from_days(days: i32) -> Value {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1);
    let date = match epoch {
        Some(epoch) if days >= 0 => epoch.checked_add_days(Days::new(days as u64)),
        Some(epoch) => epoch.checked_sub_days(Days::new(days.unsigned_abs() as u64)),
        None => None,
    };
    match date {
        Some(date) => Value::String(date.format("%Y-%m-%d").to_string()),
        None => json!(days),
    }
}

fn timestamp(unit: TimeUnit, value: i64) -> Value {
    let micros = match unit {
        TimeUnit::Second => value.checked_mul(1_000_000),
        TimeUnit::Millisecond => value.checked_mul(1_000),
        TimeUnit::Microsecond => Some(value),
        TimeUnit::Nanosecond => Some(value / 1_000),
    };
    match micros.and_then(DateTime::<Utc>::from_timestamp_micros) {
        Some(ts) => Value::String(ts.format("%Y-%m-%d %H:%M:%S").to_string()),
        None => json!(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars() {
        assert_eq!(to_json(ValueRef::Null), Value::Null);
        assert_eq!(to_json(ValueRef::Int(42)), json!(42));
        assert_eq!(to_json(ValueRef::Text(b"Alice")), json!("Alice"));
        assert_eq!(to_json(ValueRef::HugeInt(4)), json!(4));
    }

    #[test]
    fn test_dates_render_as_iso_strings() {
        assert_eq!(to_json(ValueRef::Date32(0)), json!("1970-01-01"));
        assert_eq!(to_json(ValueRef::Date32(17970)), json!("2019-03-15"));
        assert_eq!(to_json(ValueRef::Date32(-1)), json!("1969-12-31"));
    }

    #[test]
    fn test_timestamps() {
        assert_eq!(
            to_json(ValueRef::Timestamp(TimeUnit::Second, 86_400)),
            json!("1970-01-02 00:00:00")
        );
    }
}
