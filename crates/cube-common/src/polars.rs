//! Cell conversions between cube tables and polars frames.
//!
//! Cube tables hold [`Value`] cells; these helpers move cells across the
//! boundary with polars frames in both directions.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use cube_model::Value;
use polars::prelude::*;

/// Days from 0001-01-01 (CE day 1) to the Unix epoch.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Converts a Polars `AnyValue` to a cube [`Value`].
///
/// Integers widen to `Int` (unsigned values beyond `i64` fall back to
/// `Float`), dates and datetimes keep their calendar meaning and any other
/// type is carried as its display text. Datetime time zones are dropped; the
/// naive UTC wall time is kept.
///
/// # Examples
///
/// ```
/// use cube_common::any_to_value;
/// use cube_model::Value;
/// use polars::prelude::AnyValue;
///
/// assert_eq!(any_to_value(AnyValue::Null), Value::Null);
/// assert_eq!(any_to_value(AnyValue::Int32(42)), Value::Int(42));
/// assert_eq!(any_to_value(AnyValue::String("ASN")), Value::from("ASN"));
/// ```
pub fn any_to_value(value: AnyValue<'_>) -> Value {
    match value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Bool(b),
        AnyValue::Int8(v) => Value::Int(i64::from(v)),
        AnyValue::Int16(v) => Value::Int(i64::from(v)),
        AnyValue::Int32(v) => Value::Int(i64::from(v)),
        AnyValue::Int64(v) => Value::Int(v),
        AnyValue::UInt8(v) => Value::Int(i64::from(v)),
        AnyValue::UInt16(v) => Value::Int(i64::from(v)),
        AnyValue::UInt32(v) => Value::Int(i64::from(v)),
        AnyValue::UInt64(v) => i64::try_from(v).map_or(Value::Float(v as f64), Value::Int),
        AnyValue::Float32(v) => Value::Float(f64::from(v)),
        AnyValue::Float64(v) => Value::Float(v),
        AnyValue::String(s) => Value::Text(s.to_string()),
        AnyValue::StringOwned(s) => Value::Text(s.to_string()),
        AnyValue::Date(days) => date_from_epoch_days(days).map_or(Value::Null, Value::Date),
        AnyValue::Datetime(v, unit, _) | AnyValue::DatetimeOwned(v, unit, _) => {
            datetime_from_epoch(v, unit).map_or(Value::Null, Value::DateTime)
        }
        // Display text, outer quotes stripped
        other => {
            let text = other.to_string();
            match text.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
                Some(inner) => Value::Text(inner.to_string()),
                None => Value::Text(text),
            }
        }
    }
}

/// Converts a cube [`Value`] to an owned Polars `AnyValue`.
///
/// Datetimes are written with microsecond precision and no time zone.
pub fn value_to_any(value: &Value) -> AnyValue<'static> {
    match value {
        Value::Null => AnyValue::Null,
        Value::Bool(b) => AnyValue::Boolean(*b),
        Value::Int(v) => AnyValue::Int64(*v),
        Value::Float(v) => AnyValue::Float64(*v),
        Value::Text(s) => AnyValue::StringOwned(s.as_str().into()),
        Value::Date(d) => AnyValue::Date(d.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE),
        Value::DateTime(dt) => {
            AnyValue::Datetime(dt.and_utc().timestamp_micros(), TimeUnit::Microseconds, None)
        }
    }
}

/// Builds a Series from cube values, letting polars pick the supertype.
///
/// Mixed integer and float cells become a float column; a column of nulls
/// only becomes a null-typed column.
pub fn values_to_series<'a, I>(name: &str, values: I) -> PolarsResult<Series>
where
    I: IntoIterator<Item = &'a Value>,
{
    let anys: Vec<AnyValue<'static>> = values.into_iter().map(value_to_any).collect();
    Series::from_any_values(name.into(), &anys, false)
}

/// Same as [`values_to_series`], wrapped as a DataFrame column.
pub fn values_to_column<'a, I>(name: &str, values: I) -> PolarsResult<Column>
where
    I: IntoIterator<Item = &'a Value>,
{
    values_to_series(name, values).map(IntoColumn::into_column)
}

/// `v` rounded to `places` decimals, trailing zeros dropped.
///
/// ```
/// use cube_common::format_decimal;
///
/// assert_eq!(format_decimal(110.574_389, 3), "110.574");
/// assert_eq!(format_decimal(40.0, 3), "40");
/// ```
pub fn format_decimal(v: f64, places: usize) -> String {
    let fixed = format!("{v:.places$}");
    if !fixed.contains('.') {
        return fixed;
    }
    match fixed.trim_end_matches('0').trim_end_matches('.') {
        "-0" => "0".to_string(),
        trimmed => trimmed.to_string(),
    }
}

fn date_from_epoch_days(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days.checked_add(UNIX_EPOCH_DAYS_FROM_CE)?)
}

fn datetime_from_epoch(v: i64, unit: TimeUnit) -> Option<NaiveDateTime> {
    let utc = match unit {
        TimeUnit::Milliseconds => DateTime::from_timestamp_millis(v)?,
        TimeUnit::Microseconds => DateTime::from_timestamp_micros(v)?,
        TimeUnit::Nanoseconds => DateTime::from_timestamp_nanos(v),
    };
    Some(utc.naive_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_to_value_numeric() {
        assert_eq!(any_to_value(AnyValue::Int8(-3)), Value::Int(-3));
        assert_eq!(any_to_value(AnyValue::UInt32(7)), Value::Int(7));
        assert_eq!(any_to_value(AnyValue::Float32(1.5)), Value::Float(1.5));
        assert!(matches!(
            any_to_value(AnyValue::UInt64(u64::MAX)),
            Value::Float(_)
        ));
    }

    #[test]
    fn test_date_round_trip() {
        let date = NaiveDate::from_ymd_opt(1970, 1, 11).unwrap();
        let any = value_to_any(&Value::Date(date));
        assert_eq!(any, AnyValue::Date(10));
        assert_eq!(any_to_value(any), Value::Date(date));
        assert_eq!(
            date_from_epoch_days(0).map(|d| d.year()),
            Some(1970)
        );
    }

    #[test]
    fn test_datetime_units() {
        let dt = NaiveDate::from_ymd_opt(2021, 6, 1)
            .unwrap()
            .and_hms_opt(6, 30, 0)
            .unwrap();
        let micros = dt.and_utc().timestamp_micros();
        assert_eq!(
            datetime_from_epoch(micros / 1000, TimeUnit::Milliseconds),
            Some(dt)
        );
        assert_eq!(
            datetime_from_epoch(micros * 1000, TimeUnit::Nanoseconds),
            Some(dt)
        );
    }

    #[test]
    fn test_values_to_series_supertype() {
        let values = [Value::Int(1), Value::Float(2.5), Value::Null];
        let series = values_to_series("x", &values).unwrap();
        assert_eq!(series.dtype(), &DataType::Float64);
        assert_eq!(series.len(), 3);
        assert_eq!(series.null_count(), 1);
    }

    #[test]
    fn decimals_are_trimmed() {
        assert_eq!(format_decimal(12.340, 3), "12.34");
        assert_eq!(format_decimal(0.0, 3), "0");
        assert_eq!(format_decimal(-0.0001, 3), "0");
        assert_eq!(format_decimal(100.0, 0), "100");
    }
}
