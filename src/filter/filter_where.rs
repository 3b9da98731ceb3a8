use serde_json::Value;

use super::error::FilterError;
use super::types::{Conjunction, FilterExpr, FilterWhereInfo, Param};

/// Accumulates positional parameters while SQL text is emitted, so every
/// `$n` placeholder is numbered in the order its value was pushed.
pub struct FilterWhere {
    param_values: Vec<Param>,
    param_index: usize,
}

impl FilterWhere {
    pub fn new(starting_param_index: usize) -> Self {
        Self { param_values: vec![], param_index: starting_param_index }
    }

    pub fn param(&mut self, value: impl Into<Param>) -> String {
        self.param_values.push(value.into());
        self.param_index += 1;
        format!("${}", self.param_index)
    }

    pub fn into_params(self) -> Vec<Param> {
        self.param_values
    }

    /// Emit a caller fragment, replacing each `?` outside quotes with the next parameter.
    pub fn fragment(&mut self, fragment: &str, params: &[Value]) -> Result<String, FilterError> {
        let placeholders = count_placeholders(fragment);
        if placeholders != params.len() {
            return Err(FilterError::ParamArity {
                fragment: fragment.to_string(),
                placeholders,
                params: params.len(),
            });
        }

        let mut out = String::with_capacity(fragment.len() + params.len() * 2);
        let mut values = params.iter();
        scan(fragment, |piece| match piece {
            Piece::Text(c) => out.push(c),
            Piece::Placeholder => {
                if let Some(v) = values.next() {
                    let p = self.param(v.clone());
                    out.push_str(&p);
                }
            }
        });
        Ok(out)
    }

    /// Left-fold the caller's conditions: `a OR b AND c` reads as `(a OR b) AND c`.
    pub fn conditions(
        &mut self,
        conditions: &[FilterWhereInfo],
        qualifier: Option<&str>,
    ) -> Result<Option<String>, FilterError> {
        let mut sql = String::new();
        let mut previous: Option<Conjunction> = None;
        let mut terms = 0;

        for condition in conditions {
            let term = self.expr(&condition.expr, qualifier)?;
            if terms == 0 {
                sql = format!("({})", term);
            } else {
                if terms > 1 && previous != Some(condition.conjunction) {
                    sql = format!("({})", sql);
                }
                sql = format!("{} {} ({})", sql, condition.conjunction.to_sql(), term);
            }
            if terms > 0 {
                previous = Some(condition.conjunction);
            }
            terms += 1;
        }

        Ok(if terms == 0 { None } else { Some(sql) })
    }

    pub fn expr(&mut self, expr: &FilterExpr, qualifier: Option<&str>) -> Result<String, FilterError> {
        match expr {
            FilterExpr::Raw { fragment, params } => {
                if fragment.trim().is_empty() {
                    return Err(FilterError::EmptyFragment("where"));
                }
                self.fragment(fragment, params)
            }
            FilterExpr::Eq { column, value } => {
                let quoted = qualified_column(column, qualifier)?;
                if value.is_null() {
                    Ok(format!("{} IS NULL", quoted))
                } else {
                    Ok(format!("{} = {}", quoted, self.param(value.clone())))
                }
            }
            FilterExpr::In { column, values } => {
                let quoted = qualified_column(column, qualifier)?;
                if values.is_empty() {
                    return Ok("1=0".to_string());
                }
                let params: Vec<String> = values.iter().map(|v| self.param(v.clone())).collect();
                Ok(format!("{} IN ({})", quoted, params.join(", ")))
            }
        }
    }
}

enum Piece {
    Text(char),
    Placeholder,
}

/// Walk a fragment, reporting `?` only when it sits outside quoted text or identifiers.
fn scan(fragment: &str, mut visit: impl FnMut(Piece)) {
    let mut quote: Option<char> = None;
    for c in fragment.chars() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
                visit(Piece::Text(c));
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    visit(Piece::Text(c));
                }
                '?' => visit(Piece::Placeholder),
                _ => visit(Piece::Text(c)),
            },
        }
    }
}

pub fn count_placeholders(fragment: &str) -> usize {
    let mut count = 0;
    scan(fragment, |piece| {
        if matches!(piece, Piece::Placeholder) {
            count += 1;
        }
    });
    count
}

/// Quote `col` or `table.col` as identifiers, rejecting anything else.
pub fn quote_column(column: &str) -> Result<String, FilterError> {
    if column == "*" {
        return Ok("*".to_string());
    }
    let parts: Vec<&str> = column.split('.').collect();
    if parts.len() > 2 || parts.iter().any(|p| !crate::schema::naming::is_identifier(p)) {
        return Err(FilterError::InvalidColumn(column.to_string()));
    }
    Ok(parts.iter().map(|p| format!("\"{}\"", p)).collect::<Vec<_>>().join("."))
}

pub fn qualified_column(column: &str, qualifier: Option<&str>) -> Result<String, FilterError> {
    match qualifier {
        Some(table) if !column.contains('.') => quote_column(&format!("{}.{}", table, column)),
        _ => quote_column(column),
    }
}

/// Identifier tokens of a fragment: bare words and `"quoted"` names. Text
/// inside `'...'` literals is skipped.
fn identifiers(fragment: &str) -> Vec<String> {
    let is_ident = |c: char| c.is_ascii_alphanumeric() || c == '_';
    let mut tokens: Vec<String> = vec![];
    let mut chars = fragment.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                for n in chars.by_ref() {
                    if n == '\'' {
                        break;
                    }
                }
            }
            '"' => tokens.push(chars.by_ref().take_while(|&n| n != '"').collect()),
            c if is_ident(c) => {
                let mut word = c.to_string();
                while let Some(&n) = chars.peek() {
                    if !is_ident(n) {
                        break;
                    }
                    word.push(n);
                    chars.next();
                }
                tokens.push(word);
            }
            _ => {}
        }
    }
    tokens
}

/// Whether a caller fragment names `column` as an identifier, ignoring case.
pub fn references_column(fragment: &str, column: &str) -> bool {
    identifiers(fragment).iter().any(|token| token.eq_ignore_ascii_case(column))
}

impl FilterExpr {
    pub fn references(&self, column: &str) -> bool {
        match self {
            FilterExpr::Raw { fragment, .. } => references_column(fragment, column),
            FilterExpr::Eq { column: c, .. } | FilterExpr::In { column: c, .. } => {
                c == column || c.rsplit('.').next() == Some(column)
            }
        }
    }
}
