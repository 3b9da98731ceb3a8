use serde_json::Value;

use crate::schema::ColumnType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn to_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterOrderInfo {
    pub column: String,
    pub sort: SortDirection,
}

/// How a condition attaches to the conditions before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conjunction {
    And,
    Or,
}

impl Conjunction {
    pub fn to_sql(&self) -> &'static str {
        match self {
            Conjunction::And => "AND",
            Conjunction::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    /// Caller-written SQL with `?` placeholders
    Raw { fragment: String, params: Vec<Value> },
    Eq { column: String, value: Value },
    In { column: String, values: Vec<Value> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterWhereInfo {
    pub conjunction: Conjunction,
    pub expr: FilterExpr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

impl JoinKind {
    pub fn to_sql(&self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
            JoinKind::Full => "FULL OUTER JOIN",
            JoinKind::Cross => "CROSS JOIN",
        }
    }

    /// Accepts the spellings callers tend to pass as strings ("INNER", "left outer", ...).
    pub fn parse(kind: &str) -> Option<Self> {
        let normalized = kind.trim().to_ascii_uppercase();
        let normalized = normalized.trim_end_matches(" JOIN").trim_end_matches(" OUTER");
        Some(match normalized {
            "" | "INNER" => JoinKind::Inner,
            "LEFT" => JoinKind::Left,
            "RIGHT" => JoinKind::Right,
            "FULL" => JoinKind::Full,
            "CROSS" => JoinKind::Cross,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinInfo {
    pub kind: JoinKind,
    pub table: String,
    pub condition: String,
}

/// A positional parameter. `column_type` is known when the value is bound
/// to a mapped column, so a backend can bind it with that column's type.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub value: Value,
    pub column_type: Option<ColumnType>,
}

impl Param {
    pub fn typed(value: Value, column_type: ColumnType) -> Self {
        Self { value, column_type: Some(column_type) }
    }
}

impl From<Value> for Param {
    fn from(value: Value) -> Self {
        Self { value, column_type: None }
    }
}

impl PartialEq<Value> for Param {
    fn eq(&self, other: &Value) -> bool {
        self.value == *other
    }
}

/// One entry of an UPDATE's SET list.
#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    Value { column: String, value: Param },
    /// `col = col + 1`, used for the optimistic-lock counter
    Increment { column: String },
}

impl Assignment {
    pub fn column(&self) -> &str {
        match self {
            Assignment::Value { column, .. } | Assignment::Increment { column } => column,
        }
    }
}

/// Compiled statement with its positional parameters in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlResult {
    pub query: String,
    pub params: Vec<Param>,
}

/// Positional parameters accepted by the filter methods.
pub trait IntoParams {
    fn into_params(self) -> Vec<Value>;
}

impl IntoParams for () {
    fn into_params(self) -> Vec<Value> {
        Vec::new()
    }
}

impl<V: Into<Value>> IntoParams for Vec<V> {
    fn into_params(self) -> Vec<Value> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<V: Into<Value>, const N: usize> IntoParams for [V; N] {
    fn into_params(self) -> Vec<Value> {
        self.into_iter().map(Into::into).collect()
    }
}

impl IntoParams for &[Value] {
    fn into_params(self) -> Vec<Value> {
        self.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_join_kinds() {
        assert_eq!(JoinKind::parse("INNER"), Some(JoinKind::Inner));
        assert_eq!(JoinKind::parse("left outer join"), Some(JoinKind::Left));
        assert_eq!(JoinKind::parse("Full Outer"), Some(JoinKind::Full));
        assert_eq!(JoinKind::parse("sideways"), None);
    }
}
