//! Condition rendering
//!
//! Turns a list of [`Condition`] nodes into a boolean SQL expression, binding
//! values through a [`ParamSink`]. Sibling clauses are grouped in one flat
//! level: AND clauses become `(c1) AND (c2)`, OR clauses become `(o1) OR (o2)`,
//! and when both are present the AND group is the left operand of the first
//! OR: `((c1) AND (c2)) OR (o1) OR (o2)`. Deeper precedence needs explicit
//! groups.

use crate::backends::{DatabaseValue, SqlDialect};
use crate::error::OrmResult;
use crate::query::{Boolean, QueryOperator};
use crate::security::{escape_literal, quote_identifier, quote_qualified};
use crate::sql::{ParamSink, SqlCompiler};

use super::{is_raw_column, Condition, Operand};

/// Predicate that can never match
pub const ALWAYS_FALSE: &str = "'0'";

/// A to-one relation that conditions may reference as `relation.column`
#[derive(Debug, Clone, PartialEq)]
pub struct RelationJoin {
    /// Relation name, also used as the join alias
    pub name: String,
    /// Physical table of the related model
    pub table: String,
    /// Column on the base table side
    pub local_column: String,
    /// Column on the related table side
    pub foreign_column: String,
}

/// Output of [`ConditionParser::parse`]
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCondition {
    pub sql: String,
    pub params: Vec<(String, DatabaseValue)>,
    pub joins: Vec<RelationJoin>,
}

/// Renders condition lists for one table context
#[derive(Debug, Clone, Copy)]
pub struct ConditionParser<'a> {
    dialect: SqlDialect,
    table: Option<&'a str>,
    relations: &'a [RelationJoin],
}

impl<'a> ConditionParser<'a> {
    pub fn new(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            table: None,
            relations: &[],
        }
    }

    /// Qualify bare columns with this table or alias
    pub fn with_table(mut self, table: &'a str) -> Self {
        self.table = Some(table);
        self
    }

    /// Relations whose names may prefix a column
    pub fn with_relations(mut self, relations: &'a [RelationJoin]) -> Self {
        self.relations = relations;
        self
    }

    /// Render a standalone condition list with its own parameter numbering
    pub fn parse(&self, conditions: &[Condition]) -> OrmResult<ParsedCondition> {
        let mut sink = ParamSink::new();
        let sql = self.compile(conditions, &mut sink)?;
        let (params, _) = sink.finish();
        Ok(ParsedCondition {
            sql,
            params,
            joins: self.referenced_joins(conditions),
        })
    }

    /// Render into a shared sink
    pub fn compile(&self, conditions: &[Condition], sink: &mut ParamSink) -> OrmResult<String> {
        let mut ands = Vec::new();
        let mut ors = Vec::new();

        for condition in conditions {
            let Some(sql) = self.compile_clause(condition, sink)? else {
                continue;
            };
            match condition.boolean() {
                Boolean::And => ands.push(format!("({})", sql)),
                Boolean::Or => ors.push(format!("({})", sql)),
            }
        }

        let and_group = ands.join(" AND ");
        Ok(match (ands.is_empty(), ors.is_empty()) {
            (_, true) => and_group,
            (true, false) => ors.join(" OR "),
            (false, false) => format!("({}) OR {}", and_group, ors.join(" OR ")),
        })
    }

    /// Relation joins needed by `relation.column` references, in first-use order
    pub fn referenced_joins(&self, conditions: &[Condition]) -> Vec<RelationJoin> {
        let mut joins: Vec<RelationJoin> = Vec::new();
        self.collect_joins(conditions, &mut joins);
        joins
    }

    fn collect_joins(&self, conditions: &[Condition], joins: &mut Vec<RelationJoin>) {
        for condition in conditions {
            let mut columns: Vec<&str> = Vec::new();
            match condition {
                Condition::Basic { column, value, .. } => {
                    columns.push(column);
                    if let Operand::Column(other) = value {
                        columns.push(other);
                    }
                }
                Condition::In { column, .. }
                | Condition::Between { column, .. }
                | Condition::Sub { column, .. } => columns.push(column),
                Condition::Group { children, .. } => self.collect_joins(children, joins),
                Condition::Exists { .. } | Condition::Raw { .. } => {}
            }

            for column in columns {
                if let Some(relation) = self.relation_for(column) {
                    if !joins.iter().any(|j| j.name == relation.name) {
                        joins.push(relation.clone());
                    }
                }
            }
        }
    }

    fn relation_for(&self, column: &str) -> Option<&RelationJoin> {
        let (prefix, _) = column.split_once('.')?;
        self.relations.iter().find(|relation| relation.name == prefix)
    }

    /// Quote a column reference, adding the table context to bare names
    pub fn qualify(&self, column: &str) -> String {
        let column = column.trim();
        if is_expression(column) {
            return column.to_string();
        }
        if column.contains('.') {
            return quote_qualified(column, self.dialect);
        }
        match self.table {
            Some(table) => format!(
                "{}.{}",
                quote_qualified(table, self.dialect),
                quote_identifier(column, self.dialect)
            ),
            None => quote_identifier(column, self.dialect),
        }
    }

    fn compile_clause(&self, condition: &Condition, sink: &mut ParamSink) -> OrmResult<Option<String>> {
        let sql = match condition {
            Condition::Basic {
                column,
                operator,
                value,
                ..
            } => {
                if is_raw_column(column) {
                    return Ok(Some(raw_operand_text(value)));
                }
                let operator: QueryOperator = operator.parse()?;
                self.compile_basic(column, operator, value, sink)
            }
            Condition::In {
                column,
                values,
                not,
                ..
            } => {
                if values.is_empty() {
                    ALWAYS_FALSE.to_string()
                } else {
                    let placeholders = values
                        .iter()
                        .map(|value| sink.bind(column, value.clone()))
                        .collect::<Vec<_>>()
                        .join(", ");
                    format!(
                        "{} {} ({})",
                        self.qualify(column),
                        if *not { "NOT IN" } else { "IN" },
                        placeholders
                    )
                }
            }
            Condition::Between {
                column,
                low,
                high,
                not,
                ..
            } => {
                let qualified = self.qualify(column);
                let low = sink.bind(column, low.clone());
                let high = sink.bind(column, high.clone());
                format!(
                    "{} {} {} AND {}",
                    qualified,
                    if *not { "NOT BETWEEN" } else { "BETWEEN" },
                    low,
                    high
                )
            }
            Condition::Group { children, .. } => {
                let inner = self.compile(children, sink)?;
                if inner.is_empty() {
                    return Ok(None);
                }
                inner
            }
            Condition::Sub {
                column,
                operator,
                query,
                ..
            } => {
                let operator: QueryOperator = operator.parse()?;
                let qualified = self.qualify(column);
                let sub = SqlCompiler::new(self.dialect).compile_into(query, sink)?;
                format!("{} {} ({})", qualified, operator, sub)
            }
            Condition::Exists { query, not, .. } => {
                let sub = SqlCompiler::new(self.dialect).compile_into(query, sink)?;
                format!("{}EXISTS ({})", if *not { "NOT " } else { "" }, sub)
            }
            Condition::Raw { sql, bindings, .. } => sink.expand_raw(sql, bindings)?,
        };
        Ok(Some(sql))
    }

    fn compile_basic(
        &self,
        column: &str,
        operator: QueryOperator,
        value: &Operand,
        sink: &mut ParamSink,
    ) -> String {
        let qualified = self.qualify(column);
        match value {
            Operand::Null => format!(
                "{} IS {}NULL",
                qualified,
                if operator.is_negated() { "NOT " } else { "" }
            ),
            Operand::List(values) if values.is_empty() => ALWAYS_FALSE.to_string(),
            Operand::List(values) => {
                let literals = values
                    .iter()
                    .map(|value| escape_literal(value, self.dialect))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "{} {} ({})",
                    qualified,
                    if operator.is_negated() { "NOT IN" } else { "IN" },
                    literals
                )
            }
            Operand::Column(other) => format!("{} {} {}", qualified, operator, self.qualify(other)),
            Operand::Raw(fragment) => format!("{} {} {}", qualified, operator, fragment),
            Operand::Value(DatabaseValue::String(text))
                if text.contains('*') && operator.accepts_wildcard() =>
            {
                let like = match operator {
                    QueryOperator::Equal => QueryOperator::Like,
                    QueryOperator::NotEqual => QueryOperator::NotLike,
                    other => other,
                };
                let placeholder = sink.bind(column, DatabaseValue::String(text.replace('*', "%")));
                format!("{} {} {}", qualified, like, placeholder)
            }
            Operand::Value(scalar) | Operand::Exact(scalar) => {
                let placeholder = sink.bind(column, scalar.clone());
                match operator {
                    QueryOperator::In | QueryOperator::NotIn => {
                        format!("{} {} ({})", qualified, operator, placeholder)
                    }
                    _ => format!("{} {} {}", qualified, operator, placeholder),
                }
            }
        }
    }
}

/// Function calls, arithmetic and other expressions are left untouched
fn is_expression(column: &str) -> bool {
    column.contains(|c: char| matches!(c, '(' | ')' | ' ' | '\'' | '"' | '`' | ','))
}

fn raw_operand_text(value: &Operand) -> String {
    match value {
        Operand::Value(DatabaseValue::String(text))
        | Operand::Exact(DatabaseValue::String(text))
        | Operand::Raw(text)
        | Operand::Column(text) => text.clone(),
        Operand::Value(other) | Operand::Exact(other) => other.to_string(),
        Operand::Null => "NULL".to_string(),
        Operand::List(values) => values
            .iter()
            .map(|value| value.to_string())
            .collect::<Vec<_>>()
            .join(" "),
    }
}

impl From<&RelationJoin> for crate::query::JoinClause {
    fn from(relation: &RelationJoin) -> Self {
        crate::query::JoinClause::new(
            crate::query::JoinType::Left,
            &format!("{} AS {}", relation.table, relation.name),
        )
        .on(
            &format!("{}.{}", relation.name, relation.foreign_column),
            "=",
            &relation.local_column,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrmError;
    use crate::query::QueryBuilder;
    use serde_json::json;

    fn parser() -> ConditionParser<'static> {
        ConditionParser::new(SqlDialect::PostgreSQL)
    }

    #[test]
    fn test_round_trip_and_group() {
        let conditions = Condition::from_json(&json!([["age", ">=", 18], ["status", "active"]])).unwrap();
        let parsed = parser().parse(&conditions).unwrap();

        assert_eq!(parsed.sql, "(age >= :age1) AND (status = :status1)");
        assert_eq!(
            parsed.params,
            vec![
                ("age1".to_string(), DatabaseValue::Int64(18)),
                ("status1".to_string(), DatabaseValue::from("active")),
            ]
        );
    }

    #[test]
    fn test_mixed_and_or_grouping_is_flat() {
        let conditions = vec![
            Condition::eq("a", 1i64),
            Condition::eq("b", 2i64),
            Condition::eq("c", 3i64).or(),
            Condition::eq("d", 4i64).or(),
        ];
        let parsed = parser().parse(&conditions).unwrap();
        assert_eq!(
            parsed.sql,
            "((a = :a1) AND (b = :b1)) OR (c = :c1) OR (d = :d1)"
        );
    }

    #[test]
    fn test_only_or_clauses() {
        let conditions = vec![Condition::eq("a", 1i64).or(), Condition::eq("b", 2i64).or()];
        assert_eq!(parser().parse(&conditions).unwrap().sql, "(a = :a1) OR (b = :b1)");
    }

    #[test]
    fn test_nested_group_is_wrapped() {
        let conditions = vec![
            Condition::eq("status", "paid"),
            Condition::group(vec![Condition::op("total", ">", 100i64), Condition::eq("vip", true).or()]),
        ];
        assert_eq!(
            parser().parse(&conditions).unwrap().sql,
            "(status = :status1) AND (((total > :total1)) OR (vip = :vip1))"
        );
    }

    #[test]
    fn test_null_policy() {
        let conditions = vec![
            Condition::eq("deleted_at", Operand::Null),
            Condition::op("archived_at", "<>", Operand::Null),
        ];
        let parsed = parser().parse(&conditions).unwrap();
        assert_eq!(parsed.sql, "(deleted_at IS NULL) AND (archived_at IS NOT NULL)");
        assert!(parsed.params.is_empty());
    }

    #[test]
    fn test_inline_list_is_escaped() {
        let conditions = vec![
            Condition::eq("id", vec![1i64, 2]),
            Condition::op("name", "<>", vec!["O'Hara", "Smith"]),
        ];
        let parsed = parser().parse(&conditions).unwrap();
        assert_eq!(
            parsed.sql,
            "(id IN (1, 2)) AND (name NOT IN ('O''Hara', 'Smith'))"
        );
        assert!(parsed.params.is_empty());
    }

    #[test]
    fn test_empty_lists_never_match() {
        let conditions = vec![
            Condition::eq("id", Vec::<i64>::new()),
            Condition::In {
                column: "id".into(),
                values: vec![],
                not: true,
                boolean: Boolean::And,
            },
        ];
        assert_eq!(parser().parse(&conditions).unwrap().sql, "('0') AND ('0')");
    }

    #[test]
    fn test_wildcard_becomes_like() {
        let conditions = vec![
            Condition::eq("name", "Ac*"),
            Condition::op("email", "<>", "*@spam.test"),
        ];
        let parsed = parser().parse(&conditions).unwrap();
        assert_eq!(parsed.sql, "(name LIKE :name1) AND (email NOT LIKE :email1)");
        assert_eq!(parsed.params[0].1, DatabaseValue::from("Ac%"));
        assert_eq!(parsed.params[1].1, DatabaseValue::from("%@spam.test"));
    }

    #[test]
    fn test_key_condition_is_never_like() {
        let conditions = vec![
            Condition::key("code", DatabaseValue::from("a*b")),
            Condition::key("parent_code", DatabaseValue::Null),
        ];
        let parsed = parser().with_table("tags").parse(&conditions).unwrap();
        assert_eq!(
            parsed.sql,
            "(tags.code = :code1) AND (tags.parent_code IS NULL)"
        );
        assert_eq!(parsed.params, vec![("code1".to_string(), DatabaseValue::from("a*b"))]);
    }

    #[test]
    fn test_raw_column_passes_through() {
        let conditions = vec![Condition::eq("RAW", "score > bonus")];
        assert_eq!(parser().parse(&conditions).unwrap().sql, "(score > bonus)");
    }

    #[test]
    fn test_table_qualification() {
        let conditions = vec![Condition::eq("status", "paid"), Condition::eq("c.name", "Acme")];
        let parsed = parser().with_table("orders").parse(&conditions).unwrap();
        assert_eq!(parsed.sql, "(orders.status = :status1) AND (c.name = :name1)");
    }

    #[test]
    fn test_reserved_column_is_quoted() {
        let conditions = vec![Condition::eq("order", 1i64)];
        let parsed = ConditionParser::new(SqlDialect::MySQL)
            .with_table("items")
            .parse(&conditions)
            .unwrap();
        assert_eq!(parsed.sql, "(items.`order` = :order1)");
    }

    #[test]
    fn test_relation_prefix_records_join() {
        let relations = vec![RelationJoin {
            name: "customer".into(),
            table: "customers".into(),
            local_column: "orders.customer_id".into(),
            foreign_column: "id".into(),
        }];
        let conditions = vec![Condition::eq("customer.name", "Acme"), Condition::eq("status", "paid")];
        let parsed = parser()
            .with_table("orders")
            .with_relations(&relations)
            .parse(&conditions)
            .unwrap();

        assert_eq!(parsed.sql, "(customer.name = :name1) AND (orders.status = :status1)");
        assert_eq!(parsed.joins, relations);
    }

    #[test]
    fn test_invalid_operator() {
        let conditions = vec![Condition::op("id", "=>", 1i64)];
        assert!(matches!(
            parser().parse(&conditions),
            Err(OrmError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_sub_select_splices_parameters() {
        let sub = QueryBuilder::new()
            .select("customer_id")
            .from("vip_customers")
            .where_eq("level", "gold");
        let conditions = vec![
            Condition::eq("status", "paid"),
            Condition::Sub {
                column: "customer_id".into(),
                operator: "IN".into(),
                query: Box::new(sub),
                boolean: Boolean::And,
            },
            Condition::op("total", ">", 10i64),
        ];
        let parsed = parser().parse(&conditions).unwrap();

        assert_eq!(
            parsed.sql,
            "(status = :status1) AND (customer_id IN (SELECT customer_id FROM vip_customers WHERE (vip_customers.level = :level1))) AND (total > :total1)"
        );
        let names: Vec<_> = parsed.params.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["status1", "level1", "total1"]);
    }
}
