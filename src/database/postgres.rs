use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgPool, PgRow};
use sqlx::types::BigDecimal;
use sqlx::{Column, Postgres, Row as _, ValueRef};
use std::time::Instant;

use super::executor::{log_statement, ExecResult, ExecutionError, Executor, Row};
use crate::filter::Param;
use crate::schema::ColumnType;

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

#[async_trait]
impl Executor for PgPool {
    async fn execute(&self, sql: &str, params: &[Param]) -> Result<ExecResult, ExecutionError> {
        let started = Instant::now();
        let mut q = sqlx::query(sql);
        for p in params {
            q = bind_param(q, p);
        }
        let result = q.execute(self).await?;
        log_statement(sql, params, started);
        Ok(ExecResult { rows_affected: result.rows_affected(), last_insert_id: None })
    }

    async fn query(&self, sql: &str, params: &[Param]) -> Result<Vec<Row>, ExecutionError> {
        let started = Instant::now();
        let mut q = sqlx::query(sql);
        for p in params {
            q = bind_param(q, p);
        }
        let rows = q.fetch_all(self).await?;
        log_statement(sql, params, started);
        rows.iter().map(to_row).collect()
    }
}

/// Nulls take the target column's type and timestamp columns get a typed
/// `timestamptz`; values with no known column bind by their JSON kind.
fn bind_param<'q>(q: PgQuery<'q>, p: &'q Param) -> PgQuery<'q> {
    match (&p.value, p.column_type) {
        (Value::Null, Some(ColumnType::Integer)) => q.bind(None::<i64>),
        (Value::Null, Some(ColumnType::Float)) => q.bind(None::<f64>),
        (Value::Null, Some(ColumnType::Bool)) => q.bind(None::<bool>),
        (Value::Null, Some(ColumnType::Timestamp)) => q.bind(None::<DateTime<Utc>>),
        (Value::Null, _) => q.bind(None::<String>),
        (Value::String(s), Some(ColumnType::Timestamp)) => match DateTime::parse_from_rfc3339(s) {
            Ok(ts) => q.bind(ts.with_timezone(&Utc)),
            Err(_) => q.bind(s.as_str()),
        },
        (v, _) => bind_value(q, v),
    }
}

fn bind_value<'q>(q: PgQuery<'q>, v: &'q Value) -> PgQuery<'q> {
    match v {
        Value::Null => q.bind(None::<String>),
        Value::Bool(b) => q.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else if let Some(u) = n.as_u64() {
                // Postgres has no unsigned 64-bit type
                q.bind(u as i64)
            } else if let Some(f) = n.as_f64() {
                q.bind(f)
            } else {
                q.bind(n.to_string())
            }
        }
        Value::String(s) => q.bind(s.as_str()),
        Value::Array(_) | Value::Object(_) => q.bind(v.clone()),
    }
}

fn to_row(row: &PgRow) -> Result<Row, ExecutionError> {
    let mut columns = Vec::with_capacity(row.len());
    for i in 0..row.len() {
        let name = row.column(i).name().to_string();
        if row.try_get_raw(i)?.is_null() {
            columns.push((name, Value::Null));
            continue;
        }

        // Try different types; the first compatible decoder wins
        let value = if let Ok(v) = row.try_get::<Value, _>(i) {
            v
        } else if let Ok(v) = row.try_get::<String, _>(i) {
            Value::String(v)
        } else if let Ok(v) = row.try_get::<i64, _>(i) {
            Value::from(v)
        } else if let Ok(v) = row.try_get::<i32, _>(i) {
            Value::from(v)
        } else if let Ok(v) = row.try_get::<i16, _>(i) {
            Value::from(v)
        } else if let Ok(v) = row.try_get::<f64, _>(i) {
            serde_json::Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
        } else if let Ok(v) = row.try_get::<f32, _>(i) {
            serde_json::Number::from_f64(v as f64).map(Value::Number).unwrap_or(Value::Null)
        } else if let Ok(v) = row.try_get::<bool, _>(i) {
            Value::Bool(v)
        } else if let Ok(v) = row.try_get::<BigDecimal, _>(i) {
            Value::String(v.to_string())
        } else if let Ok(v) = row.try_get::<DateTime<Utc>, _>(i) {
            Value::String(v.to_rfc3339_opts(chrono::SecondsFormat::Micros, true))
        } else if let Ok(v) = row.try_get::<NaiveDateTime, _>(i) {
            Value::String(v.and_utc().to_rfc3339_opts(chrono::SecondsFormat::Micros, true))
        } else if let Ok(v) = row.try_get::<NaiveDate, _>(i) {
            Value::String(v.to_string())
        } else {
            return Err(ExecutionError::Other(format!("Unsupported value in column '{}'", name)));
        };
        columns.push((name, value));
    }
    Ok(Row::new(columns))
}
