//! Query Builder SELECT and FROM operations

use super::builder::QueryBuilder;
use super::types::*;
use crate::backends::DatabaseValue;

fn split_list(fields: &str) -> impl Iterator<Item = String> + '_ {
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut parts = Vec::new();
    for (i, c) in fields.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&fields[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&fields[start..]);
    parts
        .into_iter()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
}

impl<M> QueryBuilder<M> {
    /// Replace the SELECT list; `fields` is comma separated
    pub fn select(mut self, fields: &str) -> Self {
        self.columns = split_list(fields).map(SelectColumn::Column).collect();
        self
    }

    /// Append to the SELECT list
    pub fn add_select(mut self, fields: &str) -> Self {
        self.columns
            .extend(split_list(fields).map(SelectColumn::Column));
        self
    }

    /// Add SELECT DISTINCT to the query
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Add custom SELECT expression; `?` marks consume `bindings`
    pub fn select_raw(mut self, expression: &str, bindings: Vec<DatabaseValue>) -> Self {
        self.columns.push(SelectColumn::Raw {
            sql: expression.to_string(),
            bindings,
        });
        self
    }

    /// Add `(sub-query) AS alias` to the SELECT list
    pub fn select_sub<N>(mut self, query: QueryBuilder<N>, alias: &str) -> Self {
        self.columns.push(SelectColumn::Sub {
            query: Box::new(query.cast()),
            alias: alias.to_string(),
        });
        self
    }

    /// Set the FROM tables; `tables` is comma separated and may carry aliases
    pub fn from(mut self, tables: &str) -> Self {
        self.from = split_list(tables).map(FromSource::Table).collect();
        self
    }

    /// Select FROM `(sub-query) AS alias`
    pub fn from_sub<N>(mut self, query: QueryBuilder<N>, alias: &str) -> Self {
        self.from = vec![FromSource::Sub {
            query: Box::new(query.cast()),
            alias: alias.to_string(),
        }];
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_list_keeps_function_arguments_together() {
        let query = QueryBuilder::<()>::new().select("id, COALESCE(nick, name) AS label");
        assert_eq!(query.columns.len(), 2);
        assert!(matches!(&query.columns[1], SelectColumn::Column(c) if c == "COALESCE(nick, name) AS label"));
    }

    #[test]
    fn test_add_select_appends() {
        let query = QueryBuilder::<()>::new().select("id").add_select("name, email");
        assert_eq!(query.columns.len(), 3);
    }
}
