//! Query Builder execution
//!
//! Terminal operations borrow the builder and compile it afresh on every
//! call, so running the same builder twice sends the same statement twice.
//! Queries run on the builder's connection (`default` unless a model or
//! `on_connection` chose another one).

use indexmap::IndexMap;

use super::builder::QueryBuilder;
use super::types::{AggregateFunction, SelectColumn};
use crate::backends::{DatabaseValue, Row, SqlDialect};
use crate::connection::Adapter;
use crate::database::Database;
use crate::error::{OrmError, OrmResult};
use crate::model::Model;
use crate::security::{escape_literal, quote_qualified};
use crate::sql::{CompiledQuery, SqlCompiler};

/// Alias of the single column selected by aggregate and exists queries
const AGGREGATE_ALIAS: &str = "aggregate";

/// Alias of the derived table wrapped around union and windowed queries
const AGGREGATE_SOURCE: &str = "aggregate_source";

impl<M> QueryBuilder<M> {
    pub fn compile(&self, dialect: SqlDialect) -> OrmResult<CompiledQuery> {
        SqlCompiler::new(dialect).compile(self)
    }

    /// Compiled SQL with every parameter inlined as a literal, for logs and debugging only
    pub fn to_sql(&self, dialect: SqlDialect) -> OrmResult<String> {
        let compiled = self.compile(dialect)?;
        Ok(inline_params(&compiled.sql, &compiled.named, dialect))
    }

    async fn adapter(&self, db: &Database) -> OrmResult<Adapter> {
        db.adapter(self.connection_name()).await
    }

    /// All result rows; an empty result is not an error
    pub async fn all(&self, db: &Database) -> OrmResult<Vec<Row>> {
        let adapter = self.adapter(db).await?;
        let compiled = self.compile(adapter.dialect())?;
        adapter.fetch(&compiled).await
    }

    /// All rows keyed by the `index_by` column or callback, else by position
    pub async fn all_indexed(&self, db: &Database) -> OrmResult<IndexMap<String, Row>> {
        let rows = self.all(db).await?;
        Ok(rows
            .into_iter()
            .enumerate()
            .map(|(position, row)| (self.key_for(&row, position), row))
            .collect())
    }

    fn key_for(&self, row: &Row, position: usize) -> String {
        match &self.index_by {
            Some(index_by) => index_by.key_for(row, position),
            None => position.to_string(),
        }
    }

    /// First row, querying with `LIMIT 1`
    pub async fn one(&self, db: &Database) -> OrmResult<Option<Row>> {
        Ok(self.clone().limit(1).all(db).await?.into_iter().next())
    }

    pub async fn one_or_fail(&self, db: &Database) -> OrmResult<Row> {
        self.one(db).await?.ok_or_else(|| self.not_found())
    }

    fn not_found(&self) -> OrmError {
        OrmError::NotFound(format!(
            "No row matched the query on '{}'",
            self.base_alias().unwrap_or_default()
        ))
    }

    /// First column of every row
    pub async fn column(&self, db: &Database) -> OrmResult<Vec<DatabaseValue>> {
        Ok(self
            .all(db)
            .await?
            .iter()
            .map(|row| row.get_by_index(0).cloned().unwrap_or(DatabaseValue::Null))
            .collect())
    }

    /// First column of every row, keyed like [`QueryBuilder::all_indexed`]
    pub async fn column_indexed(&self, db: &Database) -> OrmResult<IndexMap<String, DatabaseValue>> {
        Ok(self
            .all(db)
            .await?
            .iter()
            .enumerate()
            .map(|(position, row)| {
                let value = row.get_by_index(0).cloned().unwrap_or(DatabaseValue::Null);
                (self.key_for(row, position), value)
            })
            .collect())
    }

    /// First column of the first row
    pub async fn value(&self, db: &Database) -> OrmResult<Option<DatabaseValue>> {
        Ok(self
            .one(db)
            .await?
            .and_then(|row| row.get_by_index(0).cloned()))
    }

    pub async fn exists(&self, db: &Database) -> OrmResult<bool> {
        let adapter = self.adapter(db).await?;
        let compiled = SqlCompiler::new(adapter.dialect()).compile_exists(self)?;
        let rows = adapter.fetch(&compiled).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get(AGGREGATE_ALIAS).or_else(|| row.get_by_index(0)))
            .is_some_and(|value| !value.is_empty()))
    }

    pub async fn not_exists(&self, db: &Database) -> OrmResult<bool> {
        Ok(!self.exists(db).await?)
    }

    /// Walk the result in pages of `size` rows.
    ///
    /// The callback returns `false` to stop early. Without an ORDER BY the
    /// page boundaries depend on the backend's row order.
    pub async fn chunk<F>(&self, db: &Database, size: i64, mut callback: F) -> OrmResult<()>
    where
        F: FnMut(Vec<Row>) -> OrmResult<bool>,
    {
        if size <= 0 {
            return Err(OrmError::invalid_argument("Chunk size must be positive"));
        }
        let mut page = 1;
        loop {
            let rows = self.clone().for_page(page, size).all(db).await?;
            let last = (rows.len() as i64) < size;
            if rows.is_empty() || !callback(rows)? || last {
                break;
            }
            page += 1;
        }
        Ok(())
    }

    /// `COUNT(column)`; pass `*` to count rows
    pub async fn count(&self, db: &Database, column: &str) -> OrmResult<i64> {
        let value = self.aggregate(db, AggregateFunction::Count, column).await?;
        Ok(value.and_then(|value| value.as_i64()).unwrap_or(0))
    }

    pub async fn min(&self, db: &Database, column: &str) -> OrmResult<Option<DatabaseValue>> {
        self.aggregate(db, AggregateFunction::Min, column).await
    }

    pub async fn max(&self, db: &Database, column: &str) -> OrmResult<Option<DatabaseValue>> {
        self.aggregate(db, AggregateFunction::Max, column).await
    }

    pub async fn sum(&self, db: &Database, column: &str) -> OrmResult<Option<DatabaseValue>> {
        self.aggregate(db, AggregateFunction::Sum, column).await
    }

    pub async fn avg(&self, db: &Database, column: &str) -> OrmResult<Option<DatabaseValue>> {
        self.aggregate(db, AggregateFunction::Avg, column).await
    }

    /// Run `function(column)` over the query; `None` when the result is NULL
    pub async fn aggregate(
        &self,
        db: &Database,
        function: AggregateFunction,
        column: &str,
    ) -> OrmResult<Option<DatabaseValue>> {
        let adapter = self.adapter(db).await?;
        let compiled = self.aggregate_query(function, column, adapter.dialect()).compile(adapter.dialect())?;
        let rows = adapter.fetch(&compiled).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get(AGGREGATE_ALIAS).or_else(|| row.get_by_index(0)))
            .filter(|value| !value.is_null())
            .cloned())
    }

    fn aggregate_query(&self, function: AggregateFunction, column: &str, dialect: SqlDialect) -> QueryBuilder {
        let column = column.trim();
        if self.needs_derived_table() {
            // the derived table hides the base table name, so only the bare column is visible
            let target = match column.rsplit_once('.') {
                _ if column == "*" => "*".to_string(),
                Some((_, bare)) => quote_qualified(bare, dialect),
                None => quote_qualified(column, dialect),
            };
            let mut outer = QueryBuilder::<()>::new()
                .from_sub(self.untyped(), AGGREGATE_SOURCE)
                .select_raw(&format!("{}({}) AS {}", function, target, AGGREGATE_ALIAS), Vec::new());
            outer.connection = self.connection.clone();
            outer.error = self.error.clone();
            return outer;
        }

        let mut query = self.untyped();
        let target = if column == "*" {
            "*".to_string()
        } else {
            quote_qualified(column, dialect)
        };
        query.columns = vec![SelectColumn::Raw {
            sql: format!("{}({}) AS {}", function, target, AGGREGATE_ALIAS),
            bindings: Vec::new(),
        }];
        if query.groups.is_empty() {
            query.orders.clear();
        }
        query
    }

    /// Unions, row windows and DISTINCT change the row set an aggregate sees
    fn needs_derived_table(&self) -> bool {
        !self.unions.is_empty() || self.limit.is_some() || self.offset.is_some() || self.distinct
    }
}

impl<M: Model> QueryBuilder<M> {
    /// Hydrate every row as a record of `M`
    pub async fn get(&self, db: &Database) -> OrmResult<Vec<M>> {
        let schema = db.schema::<M>();
        Ok(self
            .all(db)
            .await?
            .into_iter()
            .map(|row| M::from_record(db.hydrate(&schema, row)))
            .collect())
    }

    pub async fn first(&self, db: &Database) -> OrmResult<Option<M>> {
        let schema = db.schema::<M>();
        Ok(self.one(db).await?.map(|row| M::from_record(db.hydrate(&schema, row))))
    }

    pub async fn first_or_fail(&self, db: &Database) -> OrmResult<M> {
        self.first(db).await?.ok_or_else(|| {
            OrmError::NotFound(format!("No '{}' record matched the query", db.schema::<M>().name()))
        })
    }
}

/// Replace `:name` placeholders outside quoted text with literals
fn inline_params(sql: &str, named: &[(String, DatabaseValue)], dialect: SqlDialect) -> String {
    let values: std::collections::HashMap<&str, &DatabaseValue> =
        named.iter().map(|(name, value)| (name.as_str(), value)).collect();
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
                out.push(c);
                i += 1;
            }
            None if c == '\'' || c == '"' || c == '`' => {
                quote = Some(c);
                out.push(c);
                i += 1;
            }
            None if c == ':' && i + 1 < chars.len() && chars[i + 1] == ':' => {
                out.push_str("::");
                i += 2;
            }
            None if c == ':' && i + 1 < chars.len() && (chars[i + 1].is_ascii_alphabetic() || chars[i + 1] == '_') => {
                let mut end = i + 1;
                while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_') {
                    end += 1;
                }
                let name: String = chars[i + 1..end].iter().collect();
                match values.get(name.as_str()) {
                    Some(value) => out.push_str(&escape_literal(value, dialect)),
                    None => out.extend(&chars[i..end]),
                }
                i = end;
            }
            None => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}
