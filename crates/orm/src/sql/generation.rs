//! Query compilation
//!
//! Clauses are rendered in fixed order: SELECT, FROM, JOIN, WHERE, GROUP BY,
//! HAVING, ORDER BY, LIMIT/OFFSET, UNION. Each clause opens its own binding
//! category on the [`ParamSink`], and sub-queries are compiled in place, so
//! parameters always follow the left-to-right order of their placeholders.

use crate::backends::{check_parameter_count, DatabaseValue, SqlDialect};
use crate::conditions::{ConditionParser, RelationJoin};
use crate::error::{OrmError, OrmResult};
use crate::query::{FromSource, JoinClause, JoinTarget, JoinType, OrderClause, QueryBuilder, SelectColumn};
use crate::security::{quote_identifier, quote_qualified, split_alias};

use super::bindings::{BindingCategory, Bindings, ParamSink};

/// SQL text with named placeholders and the values bound to them
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    /// `(placeholder name, value)` in placeholder order
    pub named: Vec<(String, DatabaseValue)>,
    /// The same values grouped by clause category
    pub bindings: Bindings,
}

impl CompiledQuery {
    /// Bound values in placeholder order
    pub fn params(&self) -> Vec<DatabaseValue> {
        self.named.iter().map(|(_, value)| value.clone()).collect()
    }

    /// Rewrite into the dialect's positional placeholders
    pub fn to_positional(&self, dialect: SqlDialect) -> OrmResult<(String, Vec<DatabaseValue>)> {
        let (sql, count) = dialect.to_positional(&self.sql);
        check_parameter_count(&sql, count, self.named.len())?;
        Ok((sql, self.params()))
    }
}

/// Renders query builders for one dialect
#[derive(Debug, Clone, Copy)]
pub struct SqlCompiler {
    dialect: SqlDialect,
}

impl SqlCompiler {
    pub fn new(dialect: SqlDialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    /// Compile a query with fresh parameter numbering
    pub fn compile<M>(&self, query: &QueryBuilder<M>) -> OrmResult<CompiledQuery> {
        let mut sink = ParamSink::new();
        let sql = self.compile_into(query, &mut sink)?;
        let (named, bindings) = sink.finish();
        Ok(CompiledQuery { sql, named, bindings })
    }

    /// Wrap a query as `SELECT EXISTS (...) AS aggregate`
    pub fn compile_exists<M>(&self, query: &QueryBuilder<M>) -> OrmResult<CompiledQuery> {
        let mut compiled = self.compile(query)?;
        compiled.sql = format!("SELECT EXISTS ({}) AS aggregate", compiled.sql);
        Ok(compiled)
    }

    /// Compile into a shared sink, as done for sub-queries
    pub fn compile_into<M>(&self, query: &QueryBuilder<M>, sink: &mut ParamSink) -> OrmResult<String> {
        if let Some(error) = &query.error {
            return Err(error.clone());
        }

        let base = query.base_alias();
        let mut sql = String::from("SELECT ");
        if query.distinct {
            sql.push_str("DISTINCT ");
        }

        let frame = sink.begin(BindingCategory::Select, query.bindings.get(BindingCategory::Select));
        sql.push_str(&self.compile_columns(query, sink)?);
        sink.end(frame)?;

        let frame = sink.begin(BindingCategory::From, query.bindings.get(BindingCategory::From));
        sql.push_str(" FROM ");
        sql.push_str(&self.compile_from(query, sink)?);
        sink.end(frame)?;

        let frame = sink.begin(BindingCategory::Join, query.bindings.get(BindingCategory::Join));
        for join in self.effective_joins(query, base.as_deref()) {
            sql.push(' ');
            sql.push_str(&self.compile_join(&join, sink)?);
        }
        sink.end(frame)?;

        let mut parser = ConditionParser::new(self.dialect).with_relations(&query.relation_joins);
        if let Some(base) = base.as_deref() {
            parser = parser.with_table(base);
        }

        let frame = sink.begin(BindingCategory::Where, query.bindings.get(BindingCategory::Where));
        let wheres = parser.compile(&query.wheres, sink)?;
        if !wheres.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&wheres);
        }
        sink.end(frame)?;

        if !query.groups.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(
                &query
                    .groups
                    .iter()
                    .map(|column| self.column_expr(column))
                    .collect::<Vec<_>>()
                    .join(", "),
            );
        }

        let frame = sink.begin(BindingCategory::Having, query.bindings.get(BindingCategory::Having));
        let havings = ConditionParser::new(self.dialect).compile(&query.havings, sink)?;
        if !havings.is_empty() {
            sql.push_str(" HAVING ");
            sql.push_str(&havings);
        }
        sink.end(frame)?;

        let frame = sink.begin(BindingCategory::Order, query.bindings.get(BindingCategory::Order));
        if !query.orders.is_empty() {
            let mut parts = Vec::with_capacity(query.orders.len());
            for order in &query.orders {
                parts.push(match order {
                    OrderClause::Column { column, direction } => {
                        format!("{} {}", self.column_expr(column), direction)
                    }
                    OrderClause::Raw { sql, bindings } => sink.expand_raw(sql, bindings)?,
                });
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&parts.join(", "));
        }
        sink.end(frame)?;

        sql.push_str(&self.limit_clause(query.limit, query.offset));

        let frame = sink.begin(BindingCategory::Union, query.bindings.get(BindingCategory::Union));
        for union in &query.unions {
            sql.push_str(if union.all { " UNION ALL " } else { " UNION " });
            sql.push_str(&self.compile_into(&union.query, sink)?);
        }
        sink.end(frame)?;

        Ok(sql)
    }

    fn compile_columns<M>(&self, query: &QueryBuilder<M>, sink: &mut ParamSink) -> OrmResult<String> {
        if query.columns.is_empty() {
            return Ok("*".to_string());
        }
        let mut parts = Vec::with_capacity(query.columns.len());
        for column in &query.columns {
            parts.push(match column {
                SelectColumn::Column(column) => self.column_expr(column),
                SelectColumn::Raw { sql, bindings } => sink.expand_raw(sql, bindings)?,
                SelectColumn::Sub { query, alias } => format!(
                    "({}) AS {}",
                    self.compile_into(query, sink)?,
                    quote_identifier(alias, self.dialect)
                ),
            });
        }
        Ok(parts.join(", "))
    }

    fn compile_from<M>(&self, query: &QueryBuilder<M>, sink: &mut ParamSink) -> OrmResult<String> {
        if query.from.is_empty() {
            return Err(OrmError::InvalidArgument(
                "Query has no FROM table".to_string(),
            ));
        }
        let mut parts = Vec::with_capacity(query.from.len());
        for source in &query.from {
            parts.push(match source {
                FromSource::Table(table) => quote_qualified(table, self.dialect),
                FromSource::Sub { query, alias } => format!(
                    "({}) AS {}",
                    self.compile_into(query, sink)?,
                    quote_identifier(alias, self.dialect)
                ),
            });
        }
        Ok(parts.join(", "))
    }

    /// Explicit joins followed by relation joins referenced from WHERE or ORDER BY
    fn effective_joins<M>(&self, query: &QueryBuilder<M>, base: Option<&str>) -> Vec<JoinClause> {
        let mut joins = query.joins.clone();
        if query.relation_joins.is_empty() {
            return joins;
        }

        let mut parser = ConditionParser::new(self.dialect).with_relations(&query.relation_joins);
        if let Some(base) = base {
            parser = parser.with_table(base);
        }
        let mut referenced: Vec<RelationJoin> = parser.referenced_joins(&query.wheres);
        for order in &query.orders {
            if let OrderClause::Column { column, .. } = order {
                if let Some((prefix, _)) = column.split_once('.') {
                    if let Some(relation) = query.relation_joins.iter().find(|r| r.name == prefix) {
                        if !referenced.iter().any(|r| r.name == relation.name) {
                            referenced.push(relation.clone());
                        }
                    }
                }
            }
        }

        let explicit_aliases: Vec<String> = query.joins.iter().map(join_alias).collect();
        joins.extend(
            referenced
                .iter()
                .filter(|relation| !explicit_aliases.contains(&relation.name))
                .map(JoinClause::from),
        );
        joins
    }

    fn compile_join(&self, join: &JoinClause, sink: &mut ParamSink) -> OrmResult<String> {
        let target = match &join.target {
            JoinTarget::Table(table) => quote_qualified(table, self.dialect),
            JoinTarget::Sub { query, alias } => format!(
                "({}) AS {}",
                self.compile_into(query, sink)?,
                quote_identifier(alias, self.dialect)
            ),
        };

        let mut sql = format!("{} {}", join.join_type, target);
        if join.join_type != JoinType::Cross && !join.conditions.is_empty() {
            sql.push_str(" ON ");
            sql.push_str(&ConditionParser::new(self.dialect).compile(&join.conditions, sink)?);
        }
        Ok(sql)
    }

    /// Quote plain column references, leave expressions untouched
    fn column_expr(&self, column: &str) -> String {
        let base = split_alias(column).map(|(base, _)| base).unwrap_or(column);
        if base.contains(|c: char| matches!(c, '(' | ')' | ' ' | '\'' | '"' | '`')) {
            column.trim().to_string()
        } else {
            quote_qualified(column, self.dialect)
        }
    }

    fn limit_clause(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (Some(limit), offset) => format!(" LIMIT {} OFFSET {}", limit, offset.unwrap_or(0)),
            (None, Some(offset)) => match self.dialect {
                SqlDialect::PostgreSQL => format!(" OFFSET {}", offset),
                SqlDialect::MySQL => format!(" LIMIT 18446744073709551615 OFFSET {}", offset),
                SqlDialect::SQLite => format!(" LIMIT -1 OFFSET {}", offset),
            },
            (None, None) => String::new(),
        }
    }
}

fn join_alias(join: &JoinClause) -> String {
    match &join.target {
        JoinTarget::Table(table) => split_alias(table)
            .map(|(_, alias)| alias.to_string())
            .unwrap_or_else(|| table.trim().to_string()),
        JoinTarget::Sub { alias, .. } => alias.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Boolean;

    fn compile<M>(query: &QueryBuilder<M>) -> CompiledQuery {
        SqlCompiler::new(SqlDialect::PostgreSQL).compile(query).unwrap()
    }

    fn placeholder_count(sql: &str) -> usize {
        SqlDialect::PostgreSQL.to_positional(sql).1
    }

    #[test]
    fn test_model_style_select() {
        let query = QueryBuilder::<()>::table("orders")
            .select("orders.*")
            .where_condition("status", "=", "paid")
            .order_by("id", "DESC")
            .limit(10);
        let compiled = compile(&query);

        assert_eq!(
            compiled.sql,
            "SELECT orders.* FROM orders WHERE (orders.status = :status1) ORDER BY id DESC LIMIT 10 OFFSET 0"
        );
        assert_eq!(compiled.params(), vec![DatabaseValue::from("paid")]);
    }

    #[test]
    fn test_binding_alignment_across_clauses() {
        let sub = QueryBuilder::<()>::table("payments")
            .select("order_id")
            .where_condition("amount", ">", 100i64);
        let query = QueryBuilder::<()>::table("orders")
            .select_raw("total * ? AS taxed", vec![DatabaseValue::Float64(1.2)])
            .join_with(JoinType::Left, "customers AS c", |j| {
                j.on("c.id", "=", "orders.customer_id")
                    .where_value("c.active", "=", true)
            })
            .where_in("orders.status", vec!["paid", "sent"])
            .where_in_sub("orders.id", sub)
            .group_by("orders.customer_id")
            .having_raw("SUM(total) > ?", vec![DatabaseValue::Int64(500)])
            .order_by_raw("FIELD(status, ?)", vec![DatabaseValue::from("paid")])
            .union(QueryBuilder::<()>::table("archived_orders").where_eq("status", "paid"));
        let compiled = compile(&query);

        assert_eq!(placeholder_count(&compiled.sql), compiled.named.len());
        assert_eq!(
            compiled.params(),
            vec![
                DatabaseValue::Float64(1.2),
                DatabaseValue::Bool(true),
                DatabaseValue::from("paid"),
                DatabaseValue::from("sent"),
                DatabaseValue::Int64(100),
                DatabaseValue::Int64(500),
                DatabaseValue::from("paid"),
                DatabaseValue::from("paid"),
            ]
        );
        assert_eq!(compiled.bindings.flatten(), compiled.params());
        assert_eq!(compiled.bindings.get(BindingCategory::Where).len(), 3);
    }

    #[test]
    fn test_where_in_variants_bind_values() {
        let query = QueryBuilder::<()>::table("orders")
            .where_in("id", vec![1i64, 2, 3])
            .where_not_in("status", Vec::<String>::new());
        let compiled = compile(&query);
        assert_eq!(
            compiled.sql,
            "SELECT * FROM orders WHERE (orders.id IN (:id1, :id2, :id3)) AND ('0')"
        );
    }

    #[test]
    fn test_sub_queries_in_select_and_from() {
        let counts = QueryBuilder::<()>::table("items")
            .select_raw("COUNT(*)", vec![])
            .where_column("items.order_id", "=", "o.id")
            .where_eq("items.kind", "book");
        let inner = QueryBuilder::<()>::table("orders").where_eq("status", "paid");
        let query = QueryBuilder::<()>::new()
            .from_sub(inner, "o")
            .select("o.id")
            .select_sub(counts, "books");
        let compiled = compile(&query);

        assert_eq!(
            compiled.sql,
            "SELECT o.id, (SELECT COUNT(*) FROM items WHERE (items.order_id = o.id) AND (items.kind = :kind1)) AS books FROM (SELECT * FROM orders WHERE (orders.status = :status1)) AS o"
        );
        assert_eq!(
            compiled.params(),
            vec![DatabaseValue::from("book"), DatabaseValue::from("paid")]
        );
    }

    #[test]
    fn test_exists_and_between() {
        let query = QueryBuilder::<()>::table("customers")
            .where_exists(
                QueryBuilder::<()>::table("orders").where_column("orders.customer_id", "=", "customers.id"),
            )
            .or_where_between("created_at", "2024-01-01", "2024-12-31");
        let compiled = compile(&query);
        assert_eq!(
            compiled.sql,
            "SELECT * FROM customers WHERE ((EXISTS (SELECT * FROM orders WHERE (orders.customer_id = customers.id)))) OR (customers.created_at BETWEEN :created_at1 AND :created_at2)"
        );
    }

    #[test]
    fn test_relation_prefixed_column_adds_join() {
        let query = QueryBuilder::<()>::table("orders")
            .select("orders.*")
            .with_relation_joins(vec![RelationJoin {
                name: "customer".into(),
                table: "customers".into(),
                local_column: "orders.customer_id".into(),
                foreign_column: "id".into(),
            }])
            .where_eq("customer.name", "Acme");
        let compiled = compile(&query);
        assert_eq!(
            compiled.sql,
            "SELECT orders.* FROM orders LEFT JOIN customers AS customer ON (customer.id = orders.customer_id) WHERE (customer.name = :name1)"
        );
    }

    #[test]
    fn test_offset_without_limit_per_dialect() {
        let query = QueryBuilder::<()>::table("orders").offset(5);
        assert!(compile(&query).sql.ends_with(" OFFSET 5"));
        let mysql = SqlCompiler::new(SqlDialect::MySQL).compile(&query).unwrap();
        assert!(mysql.sql.ends_with(" LIMIT 18446744073709551615 OFFSET 5"));
    }

    #[test]
    fn test_manual_bindings_fill_raw_placeholders() {
        let query = QueryBuilder::<()>::table("orders")
            .where_raw("total > ? AND total < ?", vec![])
            .add_binding(vec![DatabaseValue::Int64(10), DatabaseValue::Int64(20)], "where");
        let compiled = compile(&query);
        assert_eq!(
            compiled.sql,
            "SELECT * FROM orders WHERE (total > :raw1 AND total < :raw2)"
        );

        let dangling = QueryBuilder::<()>::table("orders").add_binding(vec![DatabaseValue::Int64(1)], "order");
        assert!(matches!(
            SqlCompiler::new(SqlDialect::PostgreSQL).compile(&dangling),
            Err(OrmError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_recorded_error_surfaces_on_compile() {
        let query = QueryBuilder::<()>::table("orders").where_condition("id", "~~", 1i64);
        assert!(matches!(
            SqlCompiler::new(SqlDialect::PostgreSQL).compile(&query),
            Err(OrmError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_missing_from_is_invalid() {
        assert!(SqlCompiler::new(SqlDialect::SQLite)
            .compile(&QueryBuilder::<()>::new())
            .is_err());
    }

    #[test]
    fn test_positional_conversion() {
        let query = QueryBuilder::<()>::table("orders")
            .where_eq("status", "paid")
            .where_conditions(
                vec![
                    crate::conditions::Condition::op("total", ">", 5i64),
                    crate::conditions::Condition::op("total", "<", 50i64).or(),
                ],
                Boolean::And,
            );
        let compiled = compile(&query);
        let (sql, params) = compiled.to_positional(SqlDialect::PostgreSQL).unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM orders WHERE (orders.status = $1) AND (((orders.total > $2)) OR (orders.total < $3))"
        );
        assert_eq!(params.len(), 3);

        let (sql, _) = compiled.to_positional(SqlDialect::MySQL).unwrap();
        assert!(sql.contains("orders.status = ?"));
    }
}
