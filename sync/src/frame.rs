use std::{fs::File, path::Path};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use polars::prelude::*;
use serde_json::{Number, Value};
use thiserror::Error;

use crate::Row;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

// days between 0001-01-01 and 1970-01-01
const UNIX_EPOCH_FROM_CE: i32 = 719_163;

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("column {column:?}: {value} is not a date")]
    NotADate { column: String, value: String },
    #[error("column {column:?}: timestamp {value} out of range")]
    OutOfRange { column: String, value: i64 },
    #[error("column {column:?}: unknown time zone {tz:?}")]
    UnknownTimeZone { column: String, tz: String },
}

pub fn load_rows(path: &Path, date_column: &str) -> Result<Vec<Row>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let frame = ParquetReader::new(file)
        .finish()
        .with_context(|| format!("reading {}", path.display()))?;
    frame_to_rows(&frame, date_column)
}

/// Converts every row of `frame` into a JSON record. Values of `date_column`
/// are rendered as [`DATE_FORMAT`] strings.
pub fn frame_to_rows(frame: &DataFrame, date_column: &str) -> Result<Vec<Row>> {
    let columns = frame.get_columns();
    let mut rows = Vec::with_capacity(frame.height());

    for index in 0..frame.height() {
        let mut row = Row::new();
        for series in columns {
            let value = series.get(index)?;
            let value = if series.name() == date_column {
                date_value(series.name(), &value)?
            } else {
                json_value(series.name(), &value)?
            };
            row.insert(series.name().to_owned(), value);
        }
        rows.push(row);
    }

    Ok(rows)
}

/// Wall clock time of a timestamp, in its column's time zone when it has one.
fn timestamp(
    column: &str,
    value: i64,
    unit: &TimeUnit,
    tz: Option<&str>,
) -> Result<NaiveDateTime, NormalizeError> {
    let per_second: i64 = match unit {
        TimeUnit::Nanoseconds => 1_000_000_000,
        TimeUnit::Microseconds => 1_000_000,
        TimeUnit::Milliseconds => 1_000,
    };
    let nanos = value.rem_euclid(per_second) * (1_000_000_000 / per_second);
    let utc = DateTime::<Utc>::from_timestamp(value.div_euclid(per_second), nanos as u32)
        .ok_or_else(|| NormalizeError::OutOfRange {
            column: column.to_owned(),
            value,
        })?;

    let Some(name) = tz else {
        return Ok(utc.naive_utc());
    };
    let tz: Tz = name.parse().map_err(|_| NormalizeError::UnknownTimeZone {
        column: column.to_owned(),
        tz: name.to_owned(),
    })?;
    Ok(utc.with_timezone(&tz).naive_local())
}

fn days(column: &str, value: i32) -> Result<NaiveDate, NormalizeError> {
    NaiveDate::from_num_days_from_ce_opt(value + UNIX_EPOCH_FROM_CE).ok_or_else(|| {
        NormalizeError::OutOfRange {
            column: column.to_owned(),
            value: value.into(),
        }
    })
}

fn date_value(column: &str, value: &AnyValue) -> Result<Value, NormalizeError> {
    let date = match value {
        AnyValue::Null => return Ok(Value::Null),
        AnyValue::Date(value) => Some(days(column, *value)?),
        AnyValue::Datetime(value, unit, tz) => {
            Some(timestamp(column, *value, unit, tz.as_deref())?.date())
        }
        AnyValue::String(text) => parse_date_prefix(text),
        AnyValue::StringOwned(text) => parse_date_prefix(text),
        _ => None,
    }
    .ok_or_else(|| NormalizeError::NotADate {
        column: column.to_owned(),
        value: value.to_string(),
    })?;

    Ok(Value::String(date.format(DATE_FORMAT).to_string()))
}

fn parse_date_prefix(text: &str) -> Option<NaiveDate> {
    let prefix = text.get(..10)?;
    NaiveDate::parse_from_str(prefix, DATE_FORMAT).ok()
}

fn json_value(column: &str, value: &AnyValue) -> Result<Value, NormalizeError> {
    let value = match value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Bool(*b),
        AnyValue::String(s) => Value::String((*s).to_owned()),
        AnyValue::StringOwned(s) => Value::String(s.to_string()),
        AnyValue::Int8(n) => Value::from(*n),
        AnyValue::Int16(n) => Value::from(*n),
        AnyValue::Int32(n) => Value::from(*n),
        AnyValue::Int64(n) => Value::from(*n),
        AnyValue::UInt8(n) => Value::from(*n),
        AnyValue::UInt16(n) => Value::from(*n),
        AnyValue::UInt32(n) => Value::from(*n),
        AnyValue::UInt64(n) => Value::from(*n),
        AnyValue::Float32(n) => Number::from_f64(f64::from(*n)).map_or(Value::Null, Value::Number),
        AnyValue::Float64(n) => Number::from_f64(*n).map_or(Value::Null, Value::Number),
        AnyValue::Date(value) => {
            Value::String(days(column, *value)?.format(DATE_FORMAT).to_string())
        }
        AnyValue::Datetime(value, unit, tz) => Value::String(
            timestamp(column, *value, unit, tz.as_deref())?
                .format("%Y-%m-%dT%H:%M:%S%.f")
                .to_string(),
        ),
        other => Value::String(other.to_string()),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    // 2024-01-05
    const JAN_5: i32 = 19_727;

    fn frame() -> DataFrame {
        DataFrame::new(vec![
            Series::new("tipo", &["oro", "divisas"]),
            Series::new("fecha", &[JAN_5, JAN_5 + 1])
                .cast(&DataType::Date)
                .unwrap(),
            Series::new("valor", &[1.5f64, f64::NAN]),
            Series::new("subvariable", &[Some("total"), None]),
        ])
        .unwrap()
    }

    #[test]
    fn rows_carry_every_column() {
        let rows = frame_to_rows(&frame(), "fecha").unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(
            Value::Object(rows[0].clone()),
            json!({"tipo": "oro", "fecha": "2024-01-05", "valor": 1.5, "subvariable": "total"})
        );
        assert_eq!(rows[1]["fecha"], json!("2024-01-06"));
        assert_eq!(rows[1]["valor"], Value::Null);
        assert_eq!(rows[1]["subvariable"], Value::Null);
    }

    #[test]
    fn datetimes_are_truncated_to_dates() {
        let fecha = Series::new("fecha", &[1_704_412_800_000i64 + 3_600_000])
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))
            .unwrap();
        let frame = DataFrame::new(vec![fecha]).unwrap();

        let rows = frame_to_rows(&frame, "fecha").unwrap();

        assert_eq!(rows[0]["fecha"], json!("2024-01-05"));
    }

    #[test]
    fn zoned_datetimes_use_their_local_date() {
        // 2024-01-06 02:00 UTC is still the 5th in La Paz
        let la_paz = Some("America/La_Paz".to_owned());
        let value = AnyValue::Datetime(1_704_506_400_000, TimeUnit::Milliseconds, &la_paz);

        assert_eq!(date_value("fecha", &value).unwrap(), json!("2024-01-05"));
        assert_eq!(
            json_value("hora", &value).unwrap(),
            json!("2024-01-05T22:00:00")
        );

        let naive = AnyValue::Datetime(1_704_506_400_000, TimeUnit::Milliseconds, &None);
        assert_eq!(date_value("fecha", &naive).unwrap(), json!("2024-01-06"));
    }

    #[test]
    fn unknown_time_zone_is_rejected() {
        let zone = Some("America/Atlantis".to_owned());
        let value = AnyValue::Datetime(1_704_506_400_000, TimeUnit::Milliseconds, &zone);

        assert!(matches!(
            date_value("fecha", &value),
            Err(NormalizeError::UnknownTimeZone { .. })
        ));
    }

    #[test]
    fn date_strings_are_normalized() {
        let frame = DataFrame::new(vec![Series::new(
            "fecha",
            &["2024-01-05 00:00:00", "2024-01-06"],
        )])
        .unwrap();

        let rows = frame_to_rows(&frame, "fecha").unwrap();

        assert_eq!(rows[0]["fecha"], json!("2024-01-05"));
        assert_eq!(rows[1]["fecha"], json!("2024-01-06"));
    }

    #[test]
    fn non_dates_are_rejected() {
        let frame = DataFrame::new(vec![Series::new("fecha", &["pronto"])]).unwrap();
        assert!(frame_to_rows(&frame, "fecha").is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_rows(Path::new("no/such/file.parquet"), "fecha").is_err());
    }
}
