//! DuckDB value to JSON conversion

use chrono::{DateTime, NaiveDate, NaiveTime};
use duckdb::types::{TimeUnit, Value as DuckValue, ValueRef};
use serde_json::{Map, Value};

/// Days between 0001-01-01 (CE day 1) and the Unix epoch
const UNIX_EPOCH_CE_DAYS: i32 = 719_163;

/// Convert a single DuckDB cell to JSON.
///
/// Integers that don't fit in 64 bits and decimals that don't fit in a double
/// are rendered as strings rather than lost.
pub fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Boolean(b) => Value::Bool(b),
        ValueRef::TinyInt(i) => Value::from(i),
        ValueRef::SmallInt(i) => Value::from(i),
        ValueRef::Int(i) => Value::from(i),
        ValueRef::BigInt(i) => Value::from(i),
        ValueRef::HugeInt(i) => match i64::try_from(i) {
            Ok(i) => Value::from(i),
            Err(_) => Value::String(i.to_string()),
        },
        ValueRef::UHugeInt(i) => match u64::try_from(i) {
            Ok(i) => Value::from(i),
            Err(_) => Value::String(i.to_string()),
        },
        ValueRef::UTinyInt(i) => Value::from(i),
        ValueRef::USmallInt(i) => Value::from(i),
        ValueRef::UInt(i) => Value::from(i),
        ValueRef::UBigInt(i) => Value::from(i),
        ValueRef::Float(f) => float(f64::from(f)),
        ValueRef::Double(f) => float(f),
        ValueRef::Decimal(d) => {
            let text = d.to_string();
            match text.parse::<f64>() {
                Ok(f) if f.is_finite() => float(f),
                _ => Value::String(text),
            }
        }
        ValueRef::Text(s) => Value::String(String::from_utf8_lossy(s).to_string()),
        ValueRef::Blob(b) => Value::String(format!("<blob {} bytes>", b.len())),
        ValueRef::Geometry(b) => Value::String(format!("<geometry {} bytes>", b.len())),
        ValueRef::Date32(days) => NaiveDate::from_num_days_from_ce_opt(days + UNIX_EPOCH_CE_DAYS)
            .map(|d| Value::String(d.to_string()))
            .unwrap_or(Value::Null),
        ValueRef::Timestamp(unit, raw) => DateTime::from_timestamp_micros(to_micros(unit, raw))
            .map(|ts| Value::String(ts.naive_utc().to_string()))
            .unwrap_or(Value::Null),
        ValueRef::Time64(unit, raw) => {
            let micros = to_micros(unit, raw);
            let secs = u32::try_from(micros.div_euclid(1_000_000)).unwrap_or(0);
            let nanos = u32::try_from(micros.rem_euclid(1_000_000) * 1_000).unwrap_or(0);
            NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
                .map(|t| Value::String(t.to_string()))
                .unwrap_or(Value::Null)
        }
        ValueRef::Interval { months, days, nanos } => Value::String(interval_text(months, days, nanos)),
        // Lists, structs, maps, enums and unions are materialized first
        other => nested_to_json(&other.to_owned()),
    }
}

/// Containers become arrays and objects; map keys use their display form
fn nested_to_json(value: &DuckValue) -> Value {
    match value {
        DuckValue::List(items) | DuckValue::Array(items) => Value::Array(items.iter().map(nested_to_json).collect()),
        DuckValue::Struct(fields) => Value::Object(
            fields
                .iter()
                .map(|(name, field)| (name.clone(), nested_to_json(field)))
                .collect::<Map<String, Value>>(),
        ),
        DuckValue::Map(entries) => Value::Object(
            entries
                .iter()
                .map(|(key, entry)| (display(&nested_to_json(key)), nested_to_json(entry)))
                .collect::<Map<String, Value>>(),
        ),
        DuckValue::Enum(label) => Value::String(label.clone()),
        DuckValue::Union(inner) => nested_to_json(inner),
        DuckValue::Interval { months, days, nanos } => Value::String(interval_text(*months, *days, *nanos)),
        // Everything left is a scalar with a borrowed form
        scalar => to_json(ValueRef::from(scalar)),
    }
}

/// Interval in DuckDB's own textual layout, e.g. `1 year 2 months 3 days 01:30:00`
fn interval_text(months: i32, days: i32, nanos: i64) -> String {
    let mut parts = Vec::new();
    let years = months / 12;
    let months = months % 12;
    for (amount, unit) in [(years as i64, "year"), (months as i64, "month"), (days as i64, "day")] {
        if amount != 0 {
            let plural = if amount.abs() == 1 { "" } else { "s" };
            parts.push(format!("{amount} {unit}{plural}"));
        }
    }

    if nanos != 0 || parts.is_empty() {
        let sign = if nanos < 0 { "-" } else { "" };
        let micros = nanos.unsigned_abs() / 1_000;
        let secs = micros / 1_000_000;
        let mut clock = format!("{sign}{:02}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60);
        let fraction = micros % 1_000_000;
        if fraction != 0 {
            clock.push_str(&format!(".{fraction:06}"));
        }
        parts.push(clock);
    }

    parts.join(" ")
}

fn float(f: f64) -> Value {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn to_micros(unit: TimeUnit, raw: i64) -> i64 {
    match unit {
        TimeUnit::Second => raw.saturating_mul(1_000_000),
        TimeUnit::Millisecond => raw.saturating_mul(1_000),
        TimeUnit::Microsecond => raw,
        TimeUnit::Nanosecond => raw / 1_000,
    }
}

/// Render a JSON cell the way the answer prompt and fallback table show it
pub fn display(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
