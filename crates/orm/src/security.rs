//! Identifier quoting and literal escaping
//!
//! This module provides functions for:
//! - Quoting SQL identifiers (table names, column names) for a dialect
//! - Escaping literal values that have to be inlined into SQL text
//! - Validating identifier names used in DDL

use crate::backends::{DatabaseValue, SqlDialect};
use crate::error::OrmError;

/// Characters allowed in SQL identifiers (alphanumeric, underscore, dollar)
const ALLOWED_IDENTIFIER_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_$";

/// Reserved words that always need quoting when used as identifiers
static RESERVED_WORDS: &[&str] = &[
    "ALL", "AND", "AS", "ASC", "BETWEEN", "BY", "CASE", "CHECK", "COLUMN", "CREATE", "CROSS",
    "DEFAULT", "DELETE", "DESC", "DISTINCT", "DROP", "ELSE", "END", "EXISTS", "FOR", "FROM",
    "FULL", "GROUP", "HAVING", "IN", "INDEX", "INNER", "INSERT", "INTO", "IS", "JOIN", "KEY",
    "LEFT", "LIKE", "LIMIT", "NOT", "NULL", "OFFSET", "ON", "OR", "ORDER", "OUTER", "PRIMARY",
    "REFERENCES", "RIGHT", "SELECT", "SET", "TABLE", "THEN", "TO", "UNION", "UNIQUE", "UPDATE",
    "USER", "USING", "VALUES", "WHEN", "WHERE",
];

/// True when the identifier can be emitted without quotes
fn is_plain_identifier(identifier: &str) -> bool {
    let mut chars = identifier.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !RESERVED_WORDS.contains(&identifier.to_uppercase().as_str())
}

/// Quote a single identifier segment (no dots) for the dialect.
///
/// Plain identifiers are emitted verbatim, everything else is wrapped in the
/// dialect quote character with embedded quote characters doubled.
///
/// # Examples
/// ```
/// use elif_record::backends::SqlDialect;
/// use elif_record::security::quote_identifier;
///
/// assert_eq!(quote_identifier("status", SqlDialect::PostgreSQL), "status");
/// assert_eq!(quote_identifier("order", SqlDialect::MySQL), "`order`");
/// assert_eq!(quote_identifier("odd\"name", SqlDialect::PostgreSQL), "\"odd\"\"name\"");
/// ```
pub fn quote_identifier(identifier: &str, dialect: SqlDialect) -> String {
    if identifier == "*" || is_plain_identifier(identifier) {
        return identifier.to_string();
    }
    let quote = dialect.identifier_quote();
    let escaped = identifier.replace(quote, &format!("{}{}", quote, quote));
    format!("{}{}{}", quote, escaped, quote)
}

/// Quote a possibly qualified name (`table.column`, `table.*`, `table AS alias`)
pub fn quote_qualified(name: &str, dialect: SqlDialect) -> String {
    let trimmed = name.trim();

    if let Some((base, alias)) = split_alias(trimmed) {
        return format!(
            "{} AS {}",
            quote_qualified(base, dialect),
            quote_identifier(alias, dialect)
        );
    }

    trimmed
        .split('.')
        .map(|segment| quote_identifier(segment, dialect))
        .collect::<Vec<_>>()
        .join(".")
}

/// Split `expr AS alias` (case-insensitive) into its parts
pub fn split_alias(name: &str) -> Option<(&str, &str)> {
    let lower = name.to_lowercase();
    let position = lower.find(" as ")?;
    let base = name[..position].trim();
    let alias = name[position + 4..].trim();
    if base.is_empty() || alias.is_empty() {
        return None;
    }
    Some((base, alias))
}

/// Escape a string for use inside a single-quoted SQL literal
pub fn escape_string(value: &str, dialect: SqlDialect) -> String {
    let escaped = match dialect {
        SqlDialect::MySQL => value.replace('\\', "\\\\").replace('\'', "''"),
        SqlDialect::PostgreSQL | SqlDialect::SQLite => value.replace('\'', "''"),
    };
    format!("'{}'", escaped)
}

/// Render a value as an inline SQL literal.
///
/// Numbers are emitted as-is, booleans use the dialect literal and every
/// other value goes through string escaping.
pub fn escape_literal(value: &DatabaseValue, dialect: SqlDialect) -> String {
    match value {
        DatabaseValue::Null => "NULL".to_string(),
        DatabaseValue::Bool(b) => dialect.boolean_literal(*b).to_string(),
        DatabaseValue::Int32(i) => i.to_string(),
        DatabaseValue::Int64(i) => i.to_string(),
        DatabaseValue::Float64(f) if f.is_finite() => f.to_string(),
        DatabaseValue::Float64(_) => "NULL".to_string(),
        other => escape_string(&other.to_string(), dialect),
    }
}

/// Validate that an identifier is safe for use in DDL
pub fn validate_identifier(identifier: &str) -> Result<(), OrmError> {
    if identifier.is_empty() {
        return Err(OrmError::InvalidArgument(
            "Identifier cannot be empty".to_string(),
        ));
    }

    // PostgreSQL limit is 63 characters
    if identifier.len() > 63 {
        return Err(OrmError::InvalidArgument(format!(
            "Identifier '{}' is too long (max 63 characters)",
            identifier
        )));
    }

    for c in identifier.chars() {
        if !ALLOWED_IDENTIFIER_CHARS.contains(c) {
            return Err(OrmError::InvalidArgument(format!(
                "Identifier '{}' contains invalid character '{}'",
                identifier, c
            )));
        }
    }

    if identifier.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(OrmError::InvalidArgument(format!(
            "Identifier '{}' cannot start with a number",
            identifier
        )));
    }

    Ok(())
}
