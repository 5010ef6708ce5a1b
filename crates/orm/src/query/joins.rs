//! Query Builder JOIN operations

use super::builder::QueryBuilder;
use super::types::*;

impl<M> QueryBuilder<M> {
    /// Add a join comparing two columns
    pub fn join_on(
        mut self,
        join_type: JoinType,
        table: &str,
        first: &str,
        operator: &str,
        second: &str,
    ) -> Self {
        self.joins
            .push(JoinClause::new(join_type, table).on(first, operator, second));
        self
    }

    /// Add INNER JOIN to the query
    pub fn join(self, table: &str, first: &str, operator: &str, second: &str) -> Self {
        self.join_on(JoinType::Inner, table, first, operator, second)
    }

    /// Add LEFT JOIN to the query
    pub fn left_join(self, table: &str, first: &str, operator: &str, second: &str) -> Self {
        self.join_on(JoinType::Left, table, first, operator, second)
    }

    /// Add RIGHT JOIN to the query
    pub fn right_join(self, table: &str, first: &str, operator: &str, second: &str) -> Self {
        self.join_on(JoinType::Right, table, first, operator, second)
    }

    /// Add CROSS JOIN to the query
    pub fn cross_join(mut self, table: &str) -> Self {
        self.joins.push(JoinClause::new(JoinType::Cross, table));
        self
    }

    /// Add a join with several ON conditions
    pub fn join_with<F>(mut self, join_type: JoinType, table: &str, build: F) -> Self
    where
        F: FnOnce(JoinClause) -> JoinClause,
    {
        self.joins.push(build(JoinClause::new(join_type, table)));
        self
    }

    /// Join `(sub-query) AS alias`
    pub fn join_sub_on<N>(
        mut self,
        join_type: JoinType,
        query: QueryBuilder<N>,
        alias: &str,
        first: &str,
        operator: &str,
        second: &str,
    ) -> Self {
        let clause = JoinClause::sub(join_type, query.cast(), alias);
        let clause = if join_type == JoinType::Cross {
            clause
        } else {
            clause.on(first, operator, second)
        };
        self.joins.push(clause);
        self
    }

    pub fn join_sub<N>(
        self,
        query: QueryBuilder<N>,
        alias: &str,
        first: &str,
        operator: &str,
        second: &str,
    ) -> Self {
        self.join_sub_on(JoinType::Inner, query, alias, first, operator, second)
    }

    pub fn left_join_sub<N>(
        self,
        query: QueryBuilder<N>,
        alias: &str,
        first: &str,
        operator: &str,
        second: &str,
    ) -> Self {
        self.join_sub_on(JoinType::Left, query, alias, first, operator, second)
    }

    pub fn right_join_sub<N>(
        self,
        query: QueryBuilder<N>,
        alias: &str,
        first: &str,
        operator: &str,
        second: &str,
    ) -> Self {
        self.join_sub_on(JoinType::Right, query, alias, first, operator, second)
    }

    pub fn cross_join_sub<N>(mut self, query: QueryBuilder<N>, alias: &str) -> Self {
        self.joins
            .push(JoinClause::sub(JoinType::Cross, query.cast(), alias));
        self
    }
}
