//! Query Builder pagination, union, indexing and manual binding operations

use std::sync::Arc;

use super::builder::QueryBuilder;
use super::types::*;
use crate::backends::{DatabaseValue, Row};
use crate::error::OrmError;
use crate::sql::BindingCategory;

impl<M> QueryBuilder<M> {
    /// Add LIMIT clause; negative values are ignored
    pub fn limit(mut self, count: i64) -> Self {
        if count >= 0 {
            self.limit = Some(count as u64);
        }
        self
    }

    /// Add OFFSET clause; negative values are ignored
    pub fn offset(mut self, count: i64) -> Self {
        if count >= 0 {
            self.offset = Some(count as u64);
        }
        self
    }

    /// Add pagination (LIMIT + OFFSET), pages start at 1.
    ///
    /// A page whose offset does not fit in an `i64` is an `InvalidArgument`.
    pub fn for_page(mut self, page: i64, per_page: i64) -> Self {
        let page = page.max(1);
        match (page - 1).checked_mul(per_page.max(0)) {
            Some(offset) => self.limit(per_page).offset(offset),
            None => {
                self.record_error(OrmError::InvalidArgument(format!(
                    "Page {} of {} rows is out of range",
                    page, per_page
                )));
                self
            }
        }
    }

    /// Append `UNION` with another query
    pub fn union<N>(mut self, query: QueryBuilder<N>) -> Self {
        self.unions.push(UnionClause {
            query: Box::new(query.cast()),
            all: false,
        });
        self
    }

    /// Append `UNION ALL` with another query
    pub fn union_all<N>(mut self, query: QueryBuilder<N>) -> Self {
        self.unions.push(UnionClause {
            query: Box::new(query.cast()),
            all: true,
        });
        self
    }

    /// Key collection results by a column
    pub fn index_by(mut self, column: &str) -> Self {
        self.index_by = Some(IndexBy::Column(column.to_string()));
        self
    }

    /// Key collection results by a computed value
    pub fn index_by_fn<F>(mut self, key: F) -> Self
    where
        F: Fn(&Row) -> String + Send + Sync + 'static,
    {
        self.index_by = Some(IndexBy::Callback(Arc::new(key)));
        self
    }

    /// Register values for `?` marks in raw fragments of a clause category.
    ///
    /// `category` must be one of select, from, join, where, having, order, union.
    pub fn add_binding(mut self, values: Vec<DatabaseValue>, category: &str) -> Self {
        match category.parse::<BindingCategory>() {
            Ok(category) => self.bindings.extend(category, values),
            Err(e) => self.record_error(e),
        }
        self
    }
}
