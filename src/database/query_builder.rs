use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;
use std::ops::ControlFlow;
use std::sync::Arc;

use super::executor::{Executor, Row};
use super::writer::WriteCoordinator;
use crate::error::OrmError;
use crate::filter::filter_order::FilterOrder;
use crate::filter::{FilterExpr, IntoParams, JoinKind, QueryState, SortDirection, SqlResult};
use crate::mapper::{self, MappingError};
use crate::schema::{describe, Entity, EntityDescriptor};

/// Typed query over one entity.
///
/// Chained methods consume the query and return the extended one; clone it to
/// branch. Names passed to column-taking methods may be field or column names.
pub struct Query<T: Entity> {
    descriptor: Arc<EntityDescriptor>,
    state: QueryState,
    verify_conflicts: bool,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            descriptor: Arc::clone(&self.descriptor),
            state: self.state.clone(),
            verify_conflicts: self.verify_conflicts,
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> std::fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("entity", &self.descriptor.entity_name())
            .field("state", &self.state)
            .finish()
    }
}

/// Start a query on `T`.
pub fn query<T: Entity>() -> Result<Query<T>, OrmError> {
    Query::new()
}

impl<T: Entity> Query<T> {
    pub fn new() -> Result<Self, OrmError> {
        let descriptor = describe::<T>()?;
        let mut state = QueryState::new(descriptor.table());
        if let Some(deleted) = descriptor.soft_delete() {
            state = state.soft_delete(deleted.column.clone());
        }
        Ok(Self { descriptor, state, verify_conflicts: false, _entity: PhantomData })
    }

    pub fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> &QueryState {
        &self.state
    }

    fn with(mut self, f: impl FnOnce(QueryState) -> QueryState) -> Self {
        self.state = f(self.state);
        self
    }

    fn column(&self, name: &str) -> String {
        self.descriptor.resolve(name).map(|f| f.column.clone()).unwrap_or_else(|| name.to_string())
    }

    fn columns(&self, names: &[&str]) -> Vec<String> {
        names.iter().map(|n| self.column(n)).collect()
    }

    // ========================================
    // Conditions
    // ========================================

    /// First condition; `?` marks each positional parameter.
    pub fn filter(self, fragment: &str, params: impl IntoParams) -> Self {
        self.with(|s| s.filter(fragment, params.into_params()))
    }

    pub fn and(self, fragment: &str, params: impl IntoParams) -> Self {
        self.with(|s| s.and(fragment, params.into_params()))
    }

    pub fn or(self, fragment: &str, params: impl IntoParams) -> Self {
        self.with(|s| s.or(fragment, params.into_params()))
    }

    /// Primary-key equality.
    pub fn id(self, value: impl Into<Value>) -> Self {
        let column = self.descriptor.primary_key().column.clone();
        let value = value.into();
        self.with(|s| s.guard(FilterExpr::Eq { column, value }))
    }

    /// `column IN (...)`; an empty list matches no row.
    pub fn in_values(self, column: &str, values: impl IntoParams) -> Self {
        let column = self.column(column);
        self.with(|s| s.in_values(column, values.into_params()))
    }

    // ========================================
    // Ordering and projection
    // ========================================

    /// Comma-separated columns; a leading `-` or a trailing `desc` sorts descending.
    pub fn order_by(self, spec: &str) -> Self {
        let infos = FilterOrder::parse(spec, SortDirection::Asc);
        infos.into_iter().fold(self, |q, info| {
            let column = q.column(&info.column);
            q.with(|s| s.order(column, info.sort))
        })
    }

    pub fn order(self, column: &str, direction: SortDirection) -> Self {
        let column = self.column(column);
        self.with(|s| s.order(column, direction))
    }

    pub fn asc(self, columns: &[&str]) -> Self {
        let columns = self.columns(columns);
        self.with(|s| columns.into_iter().fold(s, |s, c| s.order(c, SortDirection::Asc)))
    }

    pub fn desc(self, columns: &[&str]) -> Self {
        let columns = self.columns(columns);
        self.with(|s| columns.into_iter().fold(s, |s, c| s.order(c, SortDirection::Desc)))
    }

    /// Restrict the projection, and the columns an update writes whatever their value.
    pub fn cols(self, columns: &[&str]) -> Self {
        let columns = self.columns(columns);
        self.with(|s| s.cols(columns))
    }

    /// Write these columns on update even when zero; other columns keep zero suppression.
    pub fn must_cols(self, columns: &[&str]) -> Self {
        let columns = self.columns(columns);
        self.with(|s| s.must_cols(columns))
    }

    /// Write every mapped column on update, zero or not.
    pub fn all_cols(self) -> Self {
        self.with(QueryState::all_cols)
    }

    pub fn distinct(self, columns: &[&str]) -> Self {
        let columns = self.columns(columns);
        self.with(|s| s.distinct(columns))
    }

    pub fn group_by(self, columns: &[&str]) -> Self {
        let columns = self.columns(columns);
        self.with(|s| s.group_by(columns))
    }

    pub fn having(self, fragment: &str) -> Self {
        self.with(|s| s.having(fragment))
    }

    pub fn join(self, kind: JoinKind, table: &str, condition: &str) -> Self {
        self.with(|s| s.join(kind, table, condition))
    }

    pub fn limit(self, count: u64, offset: u64) -> Self {
        self.with(|s| s.limit(count, offset))
    }

    pub fn table(self, name: &str) -> Self {
        self.with(|s| s.table(name))
    }

    /// Include soft-deleted rows; a delete becomes a real DELETE.
    pub fn unscoped(self) -> Self {
        self.with(QueryState::unscoped)
    }

    /// On a versioned update that matches nothing, check whether the row still
    /// exists before reporting a lock conflict.
    pub fn verify_conflicts(mut self) -> Self {
        self.verify_conflicts = true;
        self
    }

    pub fn compile(&self) -> Result<SqlResult, OrmError> {
        Ok(self.state.compile()?)
    }

    // ========================================
    // Reads
    // ========================================

    /// Fetch the first row into `out`. Non-zero fields already set on `out`
    /// act as equality conditions; `out` is reset before the row is applied.
    pub async fn get<E: Executor + ?Sized>(&self, db: &E, out: &mut T) -> Result<bool, OrmError> {
        let mut state = self.state.clone();
        for (column, value) in mapper::example_conditions(out, &self.descriptor)? {
            state = state.guard(FilterExpr::Eq { column, value });
        }
        let sql = state.limit_count(1).compile()?;
        let rows = db.query(&sql.query, &sql.params).await?;
        match rows.first() {
            Some(row) => {
                mapper::to_entity(row, &self.descriptor, out)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Every matching entity; the first undecodable row fails the call.
    pub async fn find<E: Executor + ?Sized>(&self, db: &E) -> Result<Vec<T>, OrmError> {
        let rows = self.fetch(db).await?;
        rows.iter().map(|row| self.decode(row).map_err(OrmError::from)).collect()
    }

    /// Every matching row, decoded independently.
    pub async fn rows<E: Executor + ?Sized>(&self, db: &E) -> Result<Vec<Result<T, MappingError>>, OrmError> {
        let rows = self.fetch(db).await?;
        Ok(rows.iter().map(|row| self.decode(row)).collect())
    }

    /// Feed each decoded row to `f` with its index until it breaks. Returns
    /// how many rows were visited.
    pub async fn iterate<E, F>(&self, db: &E, mut f: F) -> Result<usize, OrmError>
    where
        E: Executor + ?Sized,
        F: FnMut(usize, Result<T, MappingError>) -> ControlFlow<()>,
    {
        let rows = self.fetch(db).await?;
        for (index, row) in rows.iter().enumerate() {
            if f(index, self.decode(row)).is_break() {
                return Ok(index + 1);
            }
        }
        Ok(rows.len())
    }

    /// Values of a single column.
    pub async fn find_column<V, E>(&self, db: &E, column: &str) -> Result<Vec<V>, OrmError>
    where
        V: DeserializeOwned,
        E: Executor + ?Sized,
    {
        let column = self.column(column);
        let sql = self.state.clone().cols(vec![column.clone()]).compile()?;
        let rows = db.query(&sql.query, &sql.params).await?;
        let key = column.rsplit('.').next().unwrap_or(column.as_str());

        rows.iter()
            .map(|row| {
                let raw = row.get(key).or_else(|| row.first()).cloned().unwrap_or(Value::Null);
                let value = mapper::decode_column(&self.descriptor, key, &raw)?;
                serde_json::from_value(value).map_err(|e| {
                    OrmError::from(MappingError::Decode {
                        entity: self.descriptor.entity_name().to_string(),
                        message: format!("column '{}': {}", key, e),
                    })
                })
            })
            .collect()
    }

    pub async fn count<E: Executor + ?Sized>(&self, db: &E) -> Result<i64, OrmError> {
        let sql = self.state.to_count_sql()?;
        let rows = db.query(&sql.query, &sql.params).await?;
        let value = rows.first().and_then(|r| r.get("count").or_else(|| r.first()));
        value.and_then(as_f64).map(|n| n as i64).ok_or_else(|| self.aggregate_error("count"))
    }

    pub async fn sum<E: Executor + ?Sized>(&self, db: &E, column: &str) -> Result<f64, OrmError> {
        Ok(self.sums(db, &[column]).await?.into_iter().next().unwrap_or(0.0))
    }

    pub async fn sum_int<E: Executor + ?Sized>(&self, db: &E, column: &str) -> Result<i64, OrmError> {
        Ok(self.sums_int(db, &[column]).await?.into_iter().next().unwrap_or(0))
    }

    pub async fn sums<E: Executor + ?Sized>(&self, db: &E, columns: &[&str]) -> Result<Vec<f64>, OrmError> {
        let sql = self.state.to_sums_sql(&self.columns(columns))?;
        let rows = db.query(&sql.query, &sql.params).await?;
        let row = rows.first().ok_or_else(|| self.aggregate_error("sum"))?;
        (0..columns.len())
            .map(|i| row.get(&format!("sum_{}", i)).and_then(as_f64).ok_or_else(|| self.aggregate_error("sum")))
            .collect()
    }

    pub async fn sums_int<E: Executor + ?Sized>(&self, db: &E, columns: &[&str]) -> Result<Vec<i64>, OrmError> {
        Ok(self.sums(db, columns).await?.into_iter().map(|f| f as i64).collect())
    }

    async fn fetch<E: Executor + ?Sized>(&self, db: &E) -> Result<Vec<Row>, OrmError> {
        let sql = self.state.compile()?;
        Ok(db.query(&sql.query, &sql.params).await?)
    }

    fn decode(&self, row: &Row) -> Result<T, MappingError> {
        let mut entity = T::default();
        mapper::to_entity(row, &self.descriptor, &mut entity)?;
        Ok(entity)
    }

    fn aggregate_error(&self, what: &str) -> OrmError {
        MappingError::Decode {
            entity: self.descriptor.entity_name().to_string(),
            message: format!("{} returned no numeric value", what),
        }
        .into()
    }

    // ========================================
    // Writes
    // ========================================

    /// Insert all entities in one statement, reflecting generated keys,
    /// timestamps and the initial version back into them.
    pub async fn insert<E: Executor + ?Sized>(&self, db: &E, entities: &mut [T]) -> Result<u64, OrmError> {
        WriteCoordinator::new(&self.descriptor, &self.state).insert(db, entities).await
    }

    /// Update the matched row (by default the entity's own primary key).
    ///
    /// Zero-valued fields are skipped unless named by `cols`/`must_cols` or
    /// `all_cols` is set. With a version field the write is guarded by the
    /// entity's current version and a miss is `OrmError::OptimisticLock`.
    pub async fn update<E: Executor + ?Sized>(&self, db: &E, entity: &mut T) -> Result<u64, OrmError> {
        WriteCoordinator::new(&self.descriptor, &self.state)
            .verify_conflicts(self.verify_conflicts)
            .update(db, entity)
            .await
    }

    /// Delete matched rows, or stamp their soft-delete column when the entity has one.
    pub async fn delete<E: Executor + ?Sized>(&self, db: &E, entity: &T) -> Result<u64, OrmError> {
        WriteCoordinator::new(&self.descriptor, &self.state).delete(db, entity).await
    }
}

/// Aggregates come back as integers, floats or numeric text depending on the backend.
fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Null => Some(0.0),
        _ => None,
    }
}
