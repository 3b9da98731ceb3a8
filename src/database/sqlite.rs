use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteArguments, SqlitePool, SqliteRow};
use sqlx::{Column, Row as _, Sqlite, ValueRef};
use std::time::Instant;

use super::executor::{log_statement, ExecResult, ExecutionError, Executor, Row};
use crate::filter::Param;

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

#[async_trait]
impl Executor for SqlitePool {
    async fn execute(&self, sql: &str, params: &[Param]) -> Result<ExecResult, ExecutionError> {
        let started = Instant::now();
        let mut q = sqlx::query(sql);
        for p in params {
            q = bind_param(q, p);
        }
        let result = q.execute(self).await?;
        log_statement(sql, params, started);
        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: Some(result.last_insert_rowid()),
        })
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

fn bind_param<'q>(q: SqliteQuery<'q>, p: &'q Param) -> SqliteQuery<'q> {
    let v = &p.value;
    match v {
        Value::Null => {
            let none: Option<String> = None;
            q.bind(none)
        }
        Value::Bool(b) => q.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else if let Some(f) = n.as_f64() {
                q.bind(f)
            } else {
                q.bind(n.to_string())
            }
        }
        Value::String(s) => q.bind(s.as_str()),
        Value::Array(_) | Value::Object(_) => q.bind(v.to_string()),
    }
}

/// SQLite values carry their storage class, so try the classes in turn.
fn to_row(row: &SqliteRow) -> Result<Row, ExecutionError> {
    let mut columns = Vec::with_capacity(row.len());
    for i in 0..row.len() {
        let name = row.column(i).name().to_string();
        if row.try_get_raw(i)?.is_null() {
            columns.push((name, Value::Null));
            continue;
        }

        let value = if let Ok(v) = row.try_get::<i64, _>(i) {
            Value::from(v)
        } else if let Ok(v) = row.try_get::<f64, _>(i) {
            serde_json::Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
        } else if let Ok(v) = row.try_get::<String, _>(i) {
            Value::String(v)
        } else if let Ok(v) = row.try_get::<Vec<u8>, _>(i) {
            Value::String(String::from_utf8_lossy(&v).into_owned())
        } else {
            return Err(ExecutionError::Other(format!("Unsupported value in column '{}'", name)));
        };
        columns.push((name, value));
    }
    Ok(Row::new(columns))
}
