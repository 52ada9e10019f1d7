//! Row <-> domain-type conversions. Kept separate from `store.rs` so the
//! SQL text and the mapping logic can be read side by side without the
//! `tokio_rusqlite::Connection::call` plumbing in the way.

use rusqlite::types::Type;
use rusqlite::{Error as SqlError, Row};

use crate::domain::{
    ErrorKind, MetricName, MetricSnapshot, Run, RunStatus, RunType, SampleRecord, Trace,
};

fn json_column_error(column: usize, source: serde_json::Error) -> SqlError {
    SqlError::FromSqlConversionFailure(column, Type::Text, Box::new(source))
}

fn enum_column_error(column: usize, value: &str) -> SqlError {
    SqlError::FromSqlConversionFailure(
        column,
        Type::Text,
        Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("unrecognised enum value '{value}'"),
        )),
    )
}

pub(super) fn run_from_row(row: &Row<'_>) -> rusqlite::Result<Run> {
    let type_raw: String = row.get("type")?;
    let status_raw: String = row.get("status")?;
    let config_raw: String = row.get("config_snapshot")?;

    let run_type = RunType::from_str_opt(&type_raw).ok_or_else(|| enum_column_error(3, &type_raw))?;
    let status =
        RunStatus::from_str_opt(&status_raw).ok_or_else(|| enum_column_error(4, &status_raw))?;
    let config_snapshot =
        serde_json::from_str(&config_raw).map_err(|e| json_column_error(5, e))?;

    Ok(Run {
        id: row.get("id")?,
        request_id: row.get("request_id")?,
        environment_id: row.get("environment_id")?,
        run_type,
        status,
        config_snapshot,
        start_time: row.get("start_time")?,
        end_time: row.get("end_time")?,
    })
}

pub(super) fn metric_from_row(row: &Row<'_>) -> rusqlite::Result<MetricSnapshot> {
    let name_raw: String = row.get("name")?;
    let name = MetricName::from_str_opt(&name_raw).ok_or_else(|| enum_column_error(3, &name_raw))?;
    let labels_raw: Option<String> = row.get("labels")?;
    let labels = match labels_raw {
        Some(raw) => serde_json::from_str(&raw).map_err(|e| json_column_error(5, e))?,
        None => std::collections::BTreeMap::new(),
    };

    Ok(MetricSnapshot {
        run_id: row.get("run_id")?,
        timestamp_ms: row.get("timestamp_ms")?,
        name,
        value: row.get("value")?,
        labels,
    })
}

pub(super) fn sample_from_row(row: &Row<'_>) -> rusqlite::Result<SampleRecord> {
    let error_raw: Option<String> = row.get("error")?;
    let error = error_raw
        .as_deref()
        .map(serde_json::from_str::<ErrorKind>)
        .transpose()
        .map_err(|e| json_column_error(5, e))?;
    let trace_raw: Option<String> = row.get("trace")?;
    let trace = trace_raw
        .as_deref()
        .map(serde_json::from_str::<Trace>)
        .transpose()
        .map_err(|e| json_column_error(6, e))?;

    Ok(SampleRecord {
        run_id: row.get("run_id")?,
        timestamp_ms: row.get("timestamp_ms")?,
        status_code: row.get("status_code")?,
        latency_ms: row.get("latency_ms")?,
        error,
        trace,
    })
}
