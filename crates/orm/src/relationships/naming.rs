//! Naming conventions for foreign keys and junction tables
//!
//! Every convention-derived name goes through these functions so that both
//! sides of a relation always agree on column and table names.

/// Singular form of a table name: `orders` -> `order`, `categories` -> `category`
pub fn singularize(table: &str) -> String {
    let singular = pluralizer::pluralize(table, 1, false);
    if singular.is_empty() {
        table.to_string()
    } else {
        singular
    }
}

/// Table name without the connection's table prefix
pub fn strip_prefix<'a>(table: &'a str, prefix: &str) -> &'a str {
    if prefix.is_empty() {
        return table;
    }
    table.strip_prefix(prefix).unwrap_or(table)
}

/// `lower(singularize(table)) + "_" + primary_key`
///
/// ```
/// use elif_record::relationships::naming::foreign_key_name;
///
/// assert_eq!(foreign_key_name("customers", "id"), "customer_id");
/// assert_eq!(foreign_key_name("Categories", "id"), "category_id");
/// ```
pub fn foreign_key_name(table_without_prefix: &str, primary_key: &str) -> String {
    format!("{}_{}", singularize(table_without_prefix).to_lowercase(), primary_key)
}

/// Junction table for two tables sharing `prefix`.
///
/// Both names are stripped of the prefix, sorted, joined with `_` and the
/// prefix is applied again, so the argument order never matters.
pub fn junction_table_name(first: &str, second: &str, prefix: &str) -> String {
    let mut names = [strip_prefix(first, prefix), strip_prefix(second, prefix)];
    names.sort_unstable();
    format!("{}{}_{}", prefix, names[0], names[1])
}

/// Owner and related key columns of a junction table.
///
/// For a self-referential relation both conventions collide, so the related
/// key gets a `related_` prefix.
pub fn junction_keys(
    owner_table: &str,
    owner_primary_key: &str,
    related_table: &str,
    related_primary_key: &str,
) -> (String, String) {
    let owner = foreign_key_name(owner_table, owner_primary_key);
    let related = foreign_key_name(related_table, related_primary_key);
    if owner == related {
        let prefixed = format!("related_{}", related);
        (owner, prefixed)
    } else {
        (owner, related)
    }
}
