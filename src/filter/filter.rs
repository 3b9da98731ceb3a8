use serde_json::Value;

use super::error::FilterError;
use super::filter_order::FilterOrder;
use super::filter_where::{qualified_column, quote_column, FilterWhere};
use super::types::{
    Assignment, Conjunction, FilterExpr, FilterOrderInfo, FilterWhereInfo, JoinInfo, JoinKind, Param,
    SortDirection, SqlResult,
};
use crate::schema::naming::is_identifier;

/// Which mapped columns an UPDATE writes.
///
/// By default a field is written only when its value is not the type's zero
/// value. `cols` restricts the write to the named columns whatever their
/// value, `must_cols` adds named columns to the default set, and `all_cols`
/// writes everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnSelection {
    pub cols: Vec<String>,
    pub must_cols: Vec<String>,
    pub all_cols: bool,
}

impl ColumnSelection {
    pub fn includes(&self, column: &str, is_zero: bool) -> bool {
        if self.all_cols {
            return true;
        }
        let named = self.cols.iter().chain(self.must_cols.iter()).any(|c| c == column);
        if !self.cols.is_empty() {
            return named;
        }
        named || !is_zero
    }
}

/// Accumulated fragments of one logical query.
///
/// Every method consumes the state and returns the extended value, so a
/// state that was cloned before a call is never affected by it. Compiling
/// borrows the state and can be repeated with identical output.
#[derive(Debug, Clone)]
pub struct QueryState {
    table_name: String,
    select_columns: Vec<String>,
    distinct: bool,
    conditions: Vec<FilterWhereInfo>,
    guards: Vec<FilterExpr>,
    order_data: Vec<FilterOrderInfo>,
    group_by: Vec<String>,
    having: Option<String>,
    joins: Vec<JoinInfo>,
    limit: Option<u64>,
    offset: Option<u64>,
    soft_delete: Option<String>,
    unscoped: bool,
    columns: ColumnSelection,
}

impl QueryState {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            select_columns: vec![],
            distinct: false,
            conditions: vec![],
            guards: vec![],
            order_data: vec![],
            group_by: vec![],
            having: None,
            joins: vec![],
            limit: None,
            offset: None,
            soft_delete: None,
            unscoped: false,
            columns: ColumnSelection::default(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn columns(&self) -> &ColumnSelection {
        &self.columns
    }

    /// True when neither the caller nor a decoration constrained the rows.
    pub fn is_unbounded(&self) -> bool {
        self.conditions.is_empty() && self.guards.is_empty()
    }

    pub fn has_conditions(&self) -> bool {
        !self.conditions.is_empty()
    }

    pub fn is_unscoped(&self) -> bool {
        self.unscoped
    }

    pub fn table(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    pub fn filter(self, fragment: impl Into<String>, params: Vec<Value>) -> Self {
        self.push(Conjunction::And, FilterExpr::Raw { fragment: fragment.into(), params })
    }

    pub fn and(self, fragment: impl Into<String>, params: Vec<Value>) -> Self {
        self.push(Conjunction::And, FilterExpr::Raw { fragment: fragment.into(), params })
    }

    pub fn or(self, fragment: impl Into<String>, params: Vec<Value>) -> Self {
        self.push(Conjunction::Or, FilterExpr::Raw { fragment: fragment.into(), params })
    }

    pub fn in_values(self, column: impl Into<String>, values: Vec<Value>) -> Self {
        self.push(Conjunction::And, FilterExpr::In { column: column.into(), values })
    }

    /// AND-ed condition added by the coordinator rather than the caller
    /// (primary key, example fields, version guard).
    pub fn guard(mut self, expr: FilterExpr) -> Self {
        self.guards.push(expr);
        self
    }

    pub fn order_by(mut self, spec: &str) -> Self {
        self.order_data.extend(FilterOrder::parse(spec, SortDirection::Asc));
        self
    }

    pub fn order(mut self, column: impl Into<String>, sort: SortDirection) -> Self {
        self.order_data.push(FilterOrderInfo { column: column.into(), sort });
        self
    }

    pub fn cols(mut self, columns: Vec<String>) -> Self {
        self.select_columns.extend(columns.iter().cloned());
        self.columns.cols.extend(columns);
        self
    }

    pub fn must_cols(mut self, columns: Vec<String>) -> Self {
        self.columns.must_cols.extend(columns);
        self
    }

    pub fn all_cols(mut self) -> Self {
        self.columns.all_cols = true;
        self
    }

    pub fn distinct(mut self, columns: Vec<String>) -> Self {
        self.select_columns.extend(columns);
        self.distinct = true;
        self
    }

    pub fn group_by(mut self, columns: Vec<String>) -> Self {
        self.group_by.extend(columns);
        self
    }

    pub fn having(mut self, fragment: impl Into<String>) -> Self {
        self.having = Some(fragment.into());
        self
    }

    pub fn join(mut self, kind: JoinKind, table: impl Into<String>, condition: impl Into<String>) -> Self {
        self.joins.push(JoinInfo { kind, table: table.into(), condition: condition.into() });
        self
    }

    pub fn limit(mut self, limit: u64, offset: u64) -> Self {
        self.offset = if offset > 0 { Some(offset) } else { None };
        self.limit_count(limit)
    }

    /// Set the row count, keeping any offset already chosen.
    pub fn limit_count(mut self, limit: u64) -> Self {
        let filter_config = &crate::config::CONFIG.filter;
        let max_limit = filter_config.max_limit.unwrap_or(u64::MAX);
        let applied_limit = if limit > max_limit {
            if filter_config.debug_logging {
                tracing::warn!("Limit {} exceeds max {}, capping to max", limit, max_limit);
            }
            max_limit
        } else {
            limit
        };
        self.limit = Some(applied_limit);
        self
    }

    /// Declare the soft-delete column; rows where it is set are hidden unless
    /// the caller filters on that column or the state is unscoped.
    pub fn soft_delete(mut self, column: impl Into<String>) -> Self {
        self.soft_delete = Some(column.into());
        self
    }

    pub fn unscoped(mut self) -> Self {
        self.unscoped = true;
        self
    }

    fn push(mut self, conjunction: Conjunction, expr: FilterExpr) -> Self {
        self.conditions.push(FilterWhereInfo { conjunction, expr });
        self
    }

    // ========================================
    // Compilation
    // ========================================

    /// SELECT statement for the accumulated state.
    pub fn compile(&self) -> Result<SqlResult, FilterError> {
        self.validate_table()?;
        let mut w = FilterWhere::new(0);

        let select_clause = self.build_select_clause()?;
        let join_clause = self.build_join_clause(&mut w)?;
        let where_clause = self.build_where_clause(&mut w, self.qualifier())?;
        let group_clause = self.build_group_clause()?;
        let having_clause = match &self.having {
            Some(h) if h.trim().is_empty() => return Err(FilterError::EmptyFragment("having")),
            Some(h) => format!("HAVING {}", w.fragment(h, &[])?),
            None => String::new(),
        };
        let order_clause = FilterOrder::generate(&self.order_data)?;
        let limit_clause = self.build_limit_clause();

        let query = join_parts([
            format!("SELECT {}", select_clause),
            format!("FROM \"{}\"", self.table_name),
            join_clause,
            where_clause,
            group_clause,
            having_clause,
            order_clause,
            limit_clause,
        ]);
        Ok(SqlResult { query, params: w.into_params() })
    }

    /// Row count; a distinct or grouped state counts the rows its SELECT would return.
    pub fn to_count_sql(&self) -> Result<SqlResult, FilterError> {
        self.validate_table()?;
        if self.distinct || !self.group_by.is_empty() {
            let inner = Self { order_data: vec![], limit: None, offset: None, ..self.clone() }.compile()?;
            return Ok(SqlResult {
                query: format!("SELECT COUNT(*) AS \"count\" FROM ({}) AS \"counted\"", inner.query),
                params: inner.params,
            });
        }
        let mut w = FilterWhere::new(0);
        let join_clause = self.build_join_clause(&mut w)?;
        let where_clause = self.build_where_clause(&mut w, self.qualifier())?;
        let query = join_parts([
            "SELECT COUNT(*) AS \"count\"".to_string(),
            format!("FROM \"{}\"", self.table_name),
            join_clause,
            where_clause,
        ]);
        Ok(SqlResult { query, params: w.into_params() })
    }

    /// One `sum_<i>` column per requested column, zero on an empty match.
    pub fn to_sums_sql(&self, columns: &[String]) -> Result<SqlResult, FilterError> {
        self.validate_table()?;
        if columns.is_empty() {
            return Err(FilterError::InvalidColumn("no columns to sum".to_string()));
        }
        let sums = columns
            .iter()
            .enumerate()
            .map(|(i, c)| Ok(format!("COALESCE(SUM({}), 0) AS \"sum_{}\"", quote_column(c)?, i)))
            .collect::<Result<Vec<_>, FilterError>>()?;

        let mut w = FilterWhere::new(0);
        let join_clause = self.build_join_clause(&mut w)?;
        let where_clause = self.build_where_clause(&mut w, self.qualifier())?;
        let query = join_parts([
            format!("SELECT {}", sums.join(", ")),
            format!("FROM \"{}\"", self.table_name),
            join_clause,
            where_clause,
        ]);
        Ok(SqlResult { query, params: w.into_params() })
    }

    /// SET values are numbered before the WHERE parameters.
    pub fn to_update_sql(&self, assignments: &[Assignment]) -> Result<SqlResult, FilterError> {
        self.validate_table()?;
        if assignments.is_empty() {
            return Err(FilterError::NothingToUpdate);
        }
        if self.is_unbounded() {
            return Err(FilterError::UnboundedWrite("update"));
        }

        let mut w = FilterWhere::new(0);
        let mut sets = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let quoted = quote_column(assignment.column())?;
            match assignment {
                Assignment::Value { value, .. } => sets.push(format!("{} = {}", quoted, w.param(value.clone()))),
                Assignment::Increment { .. } => sets.push(format!("{} = {} + 1", quoted, quoted)),
            }
        }
        let where_clause = self.build_where_clause(&mut w, None)?;
        let query = join_parts([
            format!("UPDATE \"{}\"", self.table_name),
            format!("SET {}", sets.join(", ")),
            where_clause,
        ]);
        Ok(SqlResult { query, params: w.into_params() })
    }

    pub fn to_delete_sql(&self) -> Result<SqlResult, FilterError> {
        self.validate_table()?;
        if self.is_unbounded() {
            return Err(FilterError::UnboundedWrite("delete"));
        }
        let mut w = FilterWhere::new(0);
        let where_clause = self.build_where_clause(&mut w, None)?;
        let query = join_parts([format!("DELETE FROM \"{}\"", self.table_name), where_clause]);
        Ok(SqlResult { query, params: w.into_params() })
    }

    /// Multi-row INSERT; every row must carry one value per column.
    pub fn insert_sql(
        table_name: &str,
        columns: &[String],
        rows: &[Vec<Param>],
        returning: Option<&str>,
    ) -> Result<SqlResult, FilterError> {
        if !is_identifier(table_name) {
            return Err(FilterError::InvalidTableName(table_name.to_string()));
        }
        if rows.is_empty() || columns.is_empty() {
            return Err(FilterError::NothingToInsert);
        }
        let quoted = columns.iter().map(|c| quote_column(c)).collect::<Result<Vec<_>, _>>()?;

        let mut w = FilterWhere::new(0);
        let mut tuples = Vec::with_capacity(rows.len());
        for row in rows {
            if row.len() != columns.len() {
                return Err(FilterError::ParamArity {
                    fragment: format!("INSERT INTO \"{}\"", table_name),
                    placeholders: columns.len(),
                    params: row.len(),
                });
            }
            let params: Vec<String> = row.iter().map(|v| w.param(v.clone())).collect();
            tuples.push(format!("({})", params.join(", ")));
        }
        let returning_clause = match returning {
            Some(col) => format!("RETURNING {}", quote_column(col)?),
            None => String::new(),
        };
        let query = join_parts([
            format!("INSERT INTO \"{}\" ({})", table_name, quoted.join(", ")),
            format!("VALUES {}", tuples.join(", ")),
            returning_clause,
        ]);
        Ok(SqlResult { query, params: w.into_params() })
    }

    fn qualifier(&self) -> Option<&str> {
        if self.joins.is_empty() {
            None
        } else {
            Some(&self.table_name)
        }
    }

    fn validate_table(&self) -> Result<(), FilterError> {
        if is_identifier(&self.table_name) {
            Ok(())
        } else {
            Err(FilterError::InvalidTableName(self.table_name.clone()))
        }
    }

    fn build_select_clause(&self) -> Result<String, FilterError> {
        let columns = if self.select_columns.is_empty() { &self.group_by } else { &self.select_columns };
        let list = if columns.is_empty() || columns.iter().any(|c| c == "*") {
            "*".to_string()
        } else {
            columns.iter().map(|c| quote_column(c)).collect::<Result<Vec<_>, _>>()?.join(", ")
        };
        Ok(if self.distinct { format!("DISTINCT {}", list) } else { list })
    }

    fn build_join_clause(&self, w: &mut FilterWhere) -> Result<String, FilterError> {
        let mut parts = Vec::with_capacity(self.joins.len());
        for join in &self.joins {
            if !is_identifier(&join.table) {
                return Err(FilterError::InvalidTableName(join.table.clone()));
            }
            if join.kind == JoinKind::Cross {
                parts.push(format!("{} \"{}\"", join.kind.to_sql(), join.table));
            } else {
                if join.condition.trim().is_empty() {
                    return Err(FilterError::EmptyFragment("join"));
                }
                let on = w.fragment(&join.condition, &[])?;
                parts.push(format!("{} \"{}\" ON {}", join.kind.to_sql(), join.table, on));
            }
        }
        Ok(parts.join(" "))
    }

    /// Implicit soft-delete filter first, then the caller's conditions, then guards.
    fn build_where_clause(&self, w: &mut FilterWhere, qualifier: Option<&str>) -> Result<String, FilterError> {
        let mut parts = vec![];

        if let Some(column) = self.implicit_soft_delete() {
            parts.push(format!("{} IS NULL", qualified_column(column, qualifier)?));
        }
        if let Some(sql) = w.conditions(&self.conditions, qualifier)? {
            if self.conditions.len() > 1 {
                parts.push(format!("({})", sql));
            } else {
                parts.push(sql);
            }
        }
        for guard in &self.guards {
            parts.push(w.expr(guard, qualifier)?);
        }

        Ok(if parts.is_empty() { String::new() } else { format!("WHERE {}", parts.join(" AND ")) })
    }

    fn implicit_soft_delete(&self) -> Option<&str> {
        let column = self.soft_delete.as_deref()?;
        if self.unscoped {
            return None;
        }
        let referenced = self.conditions.iter().any(|c| c.expr.references(column));
        if referenced {
            None
        } else {
            Some(column)
        }
    }

    fn build_group_clause(&self) -> Result<String, FilterError> {
        if self.group_by.is_empty() {
            return Ok(String::new());
        }
        let cols = self.group_by.iter().map(|c| quote_column(c)).collect::<Result<Vec<_>, _>>()?;
        Ok(format!("GROUP BY {}", cols.join(", ")))
    }

    fn build_limit_clause(&self) -> String {
        match (self.limit, self.offset) {
            (Some(l), Some(o)) => format!("LIMIT {} OFFSET {}", l, o),
            (Some(l), None) => format!("LIMIT {}", l),
            _ => String::new(),
        }
    }
}

fn join_parts<const N: usize>(parts: [String; N]) -> String {
    parts.into_iter().filter(|s| !s.is_empty()).collect::<Vec<_>>().join(" ")
}
