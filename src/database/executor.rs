//! The seam between the query layer and a live connection.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

use crate::filter::Param;

/// One result row: column names with their raw values, in select order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new(columns: Vec<(String, Value)>) -> Self {
        Self { columns }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(c, v)| (c.as_str(), v))
    }

    /// First value under `column`.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    pub fn first(&self) -> Option<&Value> {
        self.columns.first().map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub rows_affected: u64,
    pub last_insert_id: Option<i64>,
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("{0}")]
    Other(String),
}

/// Runs compiled statements. Placeholders are `$1..$n`, bound in order.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, sql: &str, params: &[Param]) -> Result<ExecResult, ExecutionError>;

    async fn query(&self, sql: &str, params: &[Param]) -> Result<Vec<Row>, ExecutionError>;

    async fn ping(&self) -> Result<(), ExecutionError> {
        self.query("SELECT 1", &[]).await.map(|_| ())
    }
}

#[async_trait]
impl<E: Executor + ?Sized> Executor for std::sync::Arc<E> {
    async fn execute(&self, sql: &str, params: &[Param]) -> Result<ExecResult, ExecutionError> {
        (**self).execute(sql, params).await
    }

    async fn query(&self, sql: &str, params: &[Param]) -> Result<Vec<Row>, ExecutionError> {
        (**self).query(sql, params).await
    }

    async fn ping(&self) -> Result<(), ExecutionError> {
        (**self).ping().await
    }
}

/// Statement log shared by the sqlx executors.
pub(crate) fn log_statement(sql: &str, params: &[Param], started: Instant) {
    let settings = &crate::config::CONFIG.database;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    if settings.enable_query_logging {
        let values: Vec<&Value> = params.iter().map(|p| &p.value).collect();
        debug!(sql, params = ?values, elapsed_ms, "statement executed");
    }
    if settings.enable_slow_query_warning && elapsed_ms >= settings.slow_query_threshold_ms {
        warn!(sql, elapsed_ms, threshold_ms = settings.slow_query_threshold_ms, "slow statement");
    }
}
