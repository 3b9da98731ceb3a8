use super::error::FilterError;
use super::filter_where::quote_column;
use super::types::{FilterOrderInfo, SortDirection};

pub struct FilterOrder;

impl FilterOrder {
    /// Parse `"age"`, `"-age"`, `"age desc, name"` into order entries.
    /// A leading `-` means descending.
    pub fn parse(spec: &str, default: SortDirection) -> Vec<FilterOrderInfo> {
        let mut out = Vec::new();
        for part in spec.split(',') {
            let trimmed = part.trim();
            if trimmed.is_empty() {
                continue;
            }
            let mut it = trimmed.split_whitespace();
            if let Some(col) = it.next() {
                let (col, mut sort) = match col.strip_prefix('-') {
                    Some(rest) => (rest, SortDirection::Desc),
                    None => (col, default),
                };
                if let Some(dir) = it.next() {
                    if dir.eq_ignore_ascii_case("desc") {
                        sort = SortDirection::Desc;
                    } else if dir.eq_ignore_ascii_case("asc") {
                        sort = SortDirection::Asc;
                    }
                }
                out.push(FilterOrderInfo { column: col.to_string(), sort });
            }
        }
        out
    }

    pub fn generate(infos: &[FilterOrderInfo]) -> Result<String, FilterError> {
        if infos.is_empty() {
            return Ok(String::new());
        }
        let parts = infos
            .iter()
            .map(|i| Ok(format!("{} {}", quote_column(&i.column)?, i.sort.to_sql())))
            .collect::<Result<Vec<String>, FilterError>>()?;
        Ok(format!("ORDER BY {}", parts.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dash_prefix_means_descending() {
        let parsed = FilterOrder::parse("-age", SortDirection::Asc);
        assert_eq!(parsed, vec![FilterOrderInfo { column: "age".into(), sort: SortDirection::Desc }]);
    }

    #[test]
    fn parses_lists_and_explicit_directions() {
        let parsed = FilterOrder::parse("age desc, user_name, -id", SortDirection::Asc);
        assert_eq!(
            parsed,
            vec![
                FilterOrderInfo { column: "age".into(), sort: SortDirection::Desc },
                FilterOrderInfo { column: "user_name".into(), sort: SortDirection::Asc },
                FilterOrderInfo { column: "id".into(), sort: SortDirection::Desc },
            ]
        );
        assert_eq!(
            FilterOrder::generate(&parsed).unwrap(),
            "ORDER BY \"age\" DESC, \"user_name\" ASC, \"id\" DESC"
        );
    }

    #[test]
    fn rejects_unquotable_columns() {
        let parsed = FilterOrder::parse("random()", SortDirection::Asc);
        assert!(FilterOrder::generate(&parsed).is_err());
    }
}
