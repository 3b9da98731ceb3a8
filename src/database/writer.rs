//! Write Coordinator: inserts, versioned updates and soft-delete aware deletes.
//!
//! Every call walks `Begin -> Validate -> (Insert | Update | Delete) ->
//! Complete | Failed`. Metadata-driven conditions (primary key, version
//! guard, soft-delete filter) are added to a copy of the caller's state
//! before compiling, so the builder itself stays untouched.

use chrono::Utc;
use serde_json::Value;
use tracing::trace;

use super::executor::Executor;
use crate::error::OrmError;
use crate::filter::{Assignment, FilterError, FilterExpr, Param, QueryState};
use crate::mapper::{self, RowIntent};
use crate::schema::{Entity, EntityDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePhase {
    Begin,
    Validate,
    Insert,
    Update,
    Delete,
    Complete,
    Failed,
}

pub struct WriteCoordinator<'a> {
    descriptor: &'a EntityDescriptor,
    state: &'a QueryState,
    verify_conflicts: bool,
    phase: WritePhase,
}

impl<'a> WriteCoordinator<'a> {
    pub fn new(descriptor: &'a EntityDescriptor, state: &'a QueryState) -> Self {
        trace!(table = state.table_name(), phase = ?WritePhase::Begin, "write phase");
        Self { descriptor, state, verify_conflicts: false, phase: WritePhase::Begin }
    }

    /// Re-count a zero-row versioned update without its version guard, so a
    /// row that is simply gone is reported as 0 rows instead of a conflict.
    pub fn verify_conflicts(mut self, verify: bool) -> Self {
        self.verify_conflicts = verify;
        self
    }

    pub fn phase(&self) -> WritePhase {
        self.phase
    }

    fn enter(&mut self, phase: WritePhase) {
        trace!(table = self.state.table_name(), from = ?self.phase, to = ?phase, "write phase");
        self.phase = phase;
    }

    fn finish<R>(&mut self, result: Result<R, OrmError>) -> Result<R, OrmError> {
        self.enter(if result.is_ok() { WritePhase::Complete } else { WritePhase::Failed });
        result
    }

    pub async fn insert<T, E>(&mut self, db: &E, entities: &mut [T]) -> Result<u64, OrmError>
    where
        T: Entity,
        E: Executor + ?Sized,
    {
        let result = self.run_insert(db, entities).await;
        self.finish(result)
    }

    pub async fn update<T, E>(&mut self, db: &E, entity: &mut T) -> Result<u64, OrmError>
    where
        T: Entity,
        E: Executor + ?Sized,
    {
        let result = self.run_update(db, entity).await;
        self.finish(result)
    }

    pub async fn delete<T, E>(&mut self, db: &E, entity: &T) -> Result<u64, OrmError>
    where
        T: Entity,
        E: Executor + ?Sized,
    {
        let result = self.run_delete(db, entity).await;
        self.finish(result)
    }

    async fn run_insert<T, E>(&mut self, db: &E, entities: &mut [T]) -> Result<u64, OrmError>
    where
        T: Entity,
        E: Executor + ?Sized,
    {
        self.enter(WritePhase::Validate);
        if entities.is_empty() {
            return Ok(0);
        }

        let descriptor = self.descriptor;
        let now = Utc::now();
        let mut writes = entities
            .iter()
            .map(|e| mapper::to_row(e, descriptor, RowIntent::Insert, now))
            .collect::<Result<Vec<_>, _>>()?;

        // One statement means one column list; only the key can differ
        let columns = writes[0].columns();
        if writes.iter().any(|w| w.columns() != columns) {
            return Err(FilterError::MixedPrimaryKeys.into());
        }

        let key = descriptor.primary_key();
        let returning = (descriptor.is_auto_increment() && !columns.contains(&key.column))
            .then(|| key.column.as_str());
        let rows: Vec<Vec<Param>> = writes.iter().map(|w| w.params()).collect();
        let sql = QueryState::insert_sql(self.state.table_name(), &columns, &rows, returning)?;

        self.enter(WritePhase::Insert);
        let inserted = match returning {
            Some(_) => {
                let generated = db.query(&sql.query, &sql.params).await?;
                for (write, row) in writes.iter_mut().zip(generated.iter()) {
                    if let Some(id) = row.first() {
                        write.stamped.push((key.field.clone(), id.clone()));
                    }
                }
                generated.len() as u64
            }
            None => db.execute(&sql.query, &sql.params).await?.rows_affected,
        };

        for (entity, write) in entities.iter_mut().zip(writes.iter()) {
            mapper::apply_fields(entity, descriptor, &write.stamped)?;
        }
        Ok(inserted)
    }

    async fn run_update<T, E>(&mut self, db: &E, entity: &mut T) -> Result<u64, OrmError>
    where
        T: Entity,
        E: Executor + ?Sized,
    {
        self.enter(WritePhase::Validate);
        let write = mapper::to_row(entity, self.descriptor, RowIntent::Update(self.state.columns()), Utc::now())?;

        let scoped = self.scope_to_key(&write.key, "update")?;
        let guarded = match &write.version_guard {
            Some((column, value)) => scoped.clone().guard(FilterExpr::Eq { column: column.clone(), value: value.clone() }),
            None => scoped.clone(),
        };
        let sql = guarded.to_update_sql(&write.assignments)?;

        self.enter(WritePhase::Update);
        let affected = db.execute(&sql.query, &sql.params).await?.rows_affected;

        if affected == 0 {
            if let Some((_, version)) = &write.version_guard {
                if self.verify_conflicts && !self.row_exists(db, &scoped).await? {
                    return Ok(0);
                }
                return Err(OrmError::OptimisticLock {
                    table: self.state.table_name().to_string(),
                    version: version.as_i64().unwrap_or(0),
                });
            }
            return Ok(0);
        }

        mapper::apply_fields(entity, self.descriptor, &write.stamped)?;
        Ok(affected)
    }

    async fn run_delete<T, E>(&mut self, db: &E, entity: &T) -> Result<u64, OrmError>
    where
        T: Entity,
        E: Executor + ?Sized,
    {
        self.enter(WritePhase::Validate);
        let mut state = self.state.clone();
        if state.is_unbounded() {
            let conditions = mapper::example_conditions(entity, self.descriptor)?;
            if conditions.is_empty() {
                return Err(FilterError::UnboundedWrite("delete").into());
            }
            for (column, value) in conditions {
                state = state.guard(FilterExpr::Eq { column, value });
            }
        }

        let sql = match self.descriptor.soft_delete() {
            Some(deleted) if !state.is_unscoped() => {
                let stamp = Assignment::Value {
                    column: deleted.column.clone(),
                    value: Param::typed(mapper::timestamp_value(Utc::now()), deleted.column_type),
                };
                state.to_update_sql(&[stamp])?
            }
            _ => state.to_delete_sql()?,
        };

        self.enter(WritePhase::Delete);
        Ok(db.execute(&sql.query, &sql.params).await?.rows_affected)
    }

    /// The caller's state, or the entity's primary key when the caller gave no condition.
    fn scope_to_key(&self, key: &Value, operation: &'static str) -> Result<QueryState, OrmError> {
        let state = self.state.clone();
        if !state.is_unbounded() {
            return Ok(state);
        }
        if mapper::is_zero(key) {
            return Err(FilterError::UnboundedWrite(operation).into());
        }
        Ok(state.guard(FilterExpr::Eq { column: self.descriptor.primary_key().column.clone(), value: key.clone() }))
    }

    async fn row_exists<E: Executor + ?Sized>(&self, db: &E, state: &QueryState) -> Result<bool, OrmError> {
        let sql = state.to_count_sql()?;
        let rows = db.query(&sql.query, &sql.params).await?;
        let count = rows.first().and_then(|r| r.first()).and_then(Value::as_i64).unwrap_or(0);
        Ok(count > 0)
    }
}
