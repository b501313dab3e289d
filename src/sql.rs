//! SQL Fragment Construction
//!
//! Every identifier and literal that ends up in warehouse SQL is emitted
//! through this module. Nothing else in the crate concatenates untrusted
//! values into SQL text directly.

use std::fmt;

/// A typed SQL literal value
///
/// Rule values are coerced into one of these variants before they are
/// rendered, so numeric comparisons use bare numeric literals and strings
/// are always escaped.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// String literal, rendered single-quoted with embedded quotes doubled
    Str(String),
    /// Integer literal, rendered bare
    Int(i64),
    /// Floating-point literal, rendered bare
    Float(f64),
}

impl SqlValue {
    /// Render the value as a SQL literal
    pub fn to_literal(&self) -> String {
        match self {
            SqlValue::Str(s) => quote_str(s),
            SqlValue::Int(i) => i.to_string(),
            SqlValue::Float(f) => f.to_string(),
        }
    }

    /// The string form of the value, used when an operator turns a typed
    /// value back into a pattern (LIKE)
    pub fn as_text(&self) -> String {
        match self {
            SqlValue::Str(s) => s.clone(),
            SqlValue::Int(i) => i.to_string(),
            SqlValue::Float(f) => f.to_string(),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_literal())
    }
}

/// Quote a column identifier
///
/// Wraps in double quotes and doubles any embedded double quote, so a
/// hostile field name cannot break out of the identifier position.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a string literal, doubling embedded single quotes
pub fn quote_str(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Render a `field IN (…)` predicate over string values
pub fn in_list(field: &str, values: &[String]) -> String {
    let literals: Vec<String> = values.iter().map(|v| quote_str(v)).collect();
    format!("{} IN ({})", quote_ident(field), literals.join(", "))
}

/// An ordered set of SQL clauses
///
/// The search session holds one persistent `SqlClauses` built up by verb
/// calls; each named sub-query supplies a second, scoped set that is merged
/// in at composition time.
#[derive(Debug, Clone, Default)]
pub struct SqlClauses {
    pub select: Vec<String>,
    pub where_: Vec<String>,
    pub group_by: Vec<String>,
    pub order_by: Vec<String>,
    pub limit: Option<usize>,
}

impl SqlClauses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compose a full statement from the persistent clauses merged with
    /// this sub-query's scoped clauses.
    ///
    /// Select/group-by/order-by entries join with `, `; where entries are
    /// each parenthesized and join with ` AND `. An empty select falls back
    /// to a row count so a bare session still produces valid SQL.
    pub fn compose(&self, table: &str, extra: &SqlClauses) -> String {
        let mut select: Vec<String> = self.select.clone();
        select.extend(extra.select.iter().cloned());
        if select.is_empty() {
            select.push("COUNT(*) AS hits".to_string());
        }

        let mut sql = format!("SELECT {} FROM {}", select.join(", "), table);

        let mut where_: Vec<String> = self.where_.clone();
        where_.extend(extra.where_.iter().cloned());
        if !where_.is_empty() {
            let grouped: Vec<String> = where_.iter().map(|c| format!("({c})")).collect();
            sql.push_str(&format!(" WHERE {}", grouped.join(" AND ")));
        }

        let mut group_by: Vec<String> = self.group_by.clone();
        group_by.extend(extra.group_by.iter().cloned());
        if !group_by.is_empty() {
            sql.push_str(&format!(" GROUP BY {}", group_by.join(", ")));
        }

        let mut order_by: Vec<String> = self.order_by.clone();
        order_by.extend(extra.order_by.iter().cloned());
        if !order_by.is_empty() {
            sql.push_str(&format!(" ORDER BY {}", order_by.join(", ")));
        }

        if let Some(limit) = extra.limit.or(self.limit) {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        sql
    }
}
