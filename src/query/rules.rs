//! Filter Rule Translation
//!
//! Turns the UI's JSON rule tree (`{condition, rules: [{field, operator,
//! value}]}`) into safe SQL predicate fragments. Handles legacy field
//! aliasing, case normalization, declared field types, and the full
//! operator set. All identifiers and literals go through [`crate::sql`].

use crate::query::error::{QueryError, QueryResult};
use crate::sql::{self, SqlValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fields whose values keep their original casing
///
/// Everything else is lower-cased before comparison, matching how the
/// ingest pipeline normalizes log values.
pub const CASE_SENSITIVE_FIELDS: &[&str] = &[
    "api_key",
    "request_ip_country",
    "request_ip_region",
    "request_ip_city",
];

/// Legacy field names still sent by older dashboards, mapped to the
/// current warehouse column names
pub const LEGACY_FIELD_ALIASES: &[(&str, &str)] = &[
    ("request_scheme", "request_url_scheme"),
    ("request_host", "request_url_host"),
    ("request_path", "request_url_path"),
    ("response_time", "timer_response"),
    ("backend_response_time", "timer_backend_response"),
    ("internal_gatekeeper_time", "timer_internal"),
    ("proxy_overhead", "timer_proxy_overhead"),
    ("gatekeeper_denied_code", "denied_reason"),
    ("imported", "log_imported"),
];

/// Declared column types for fields that are not plain strings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Int,
    Double,
}

/// Resolve a rule field through the legacy alias table
///
/// Unmapped fields pass through unchanged.
pub fn resolve_field(field: &str) -> &str {
    LEGACY_FIELD_ALIASES
        .iter()
        .find(|(legacy, _)| *legacy == field)
        .map(|(_, modern)| *modern)
        .unwrap_or(field)
}

fn declared_type(field: &str) -> Option<FieldType> {
    match field {
        "response_status" | "response_size" | "request_size" => Some(FieldType::Int),
        "timer_response" | "timer_backend_response" | "timer_internal"
        | "timer_proxy_overhead" => Some(FieldType::Double),
        _ => None,
    }
}

fn is_case_sensitive(field: &str) -> bool {
    CASE_SENSITIVE_FIELDS.contains(&field)
}

/// How the rules of one tree combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Condition {
    #[default]
    #[serde(rename = "AND")]
    And,
    #[serde(rename = "OR")]
    Or,
}

/// One filter rule from the UI query builder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterRule {
    pub field: String,
    pub operator: String,
    #[serde(default)]
    pub value: Value,
}

impl FilterRule {
    /// Serialized form used in error messages
    fn describe(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.field.clone())
    }
}

/// A rule tree: a condition plus the rules it combines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub condition: Condition,
    #[serde(default)]
    pub rules: Vec<FilterRule>,
}

/// The supported filter operators
///
/// The operator token arrives as a free-form string; parsing it into this
/// enum up front means every later match is checked for completeness by
/// the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOperator {
    Equal,
    NotEqual,
    BeginsWith,
    NotBeginsWith,
    Contains,
    NotContains,
    IsNull,
    IsNotNull,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Between,
}

impl RuleOperator {
    fn parse(rule: &FilterRule) -> QueryResult<Self> {
        match rule.operator.as_str() {
            "equal" => Ok(Self::Equal),
            "not_equal" => Ok(Self::NotEqual),
            "begins_with" => Ok(Self::BeginsWith),
            "not_begins_with" => Ok(Self::NotBeginsWith),
            "contains" => Ok(Self::Contains),
            "not_contains" => Ok(Self::NotContains),
            "is_null" => Ok(Self::IsNull),
            "is_not_null" => Ok(Self::IsNotNull),
            "less" => Ok(Self::Less),
            "less_or_equal" => Ok(Self::LessOrEqual),
            "greater" => Ok(Self::Greater),
            "greater_or_equal" => Ok(Self::GreaterOrEqual),
            "between" => Ok(Self::Between),
            other => Err(QueryError::UnknownOperator {
                operator: other.to_string(),
                rule: rule.describe(),
            }),
        }
    }
}

/// Translate one rule tree into a single predicate fragment
///
/// Rules combine with the tree's condition; each rule's predicate is
/// independently parenthesized. Returns `None` for an empty tree.
pub fn rule_set_predicate(set: &RuleSet) -> QueryResult<Option<String>> {
    if set.rules.is_empty() {
        return Ok(None);
    }

    let mut predicates = Vec::with_capacity(set.rules.len());
    for rule in &set.rules {
        predicates.push(format!("({})", rule_predicate(rule)?));
    }

    let joiner = match set.condition {
        Condition::And => " AND ",
        Condition::Or => " OR ",
    };
    Ok(Some(predicates.join(joiner)))
}

/// Translate one rule into a predicate fragment
pub fn rule_predicate(rule: &FilterRule) -> QueryResult<String> {
    let op = RuleOperator::parse(rule)?;
    let field = resolve_field(&rule.field);
    let ident = sql::quote_ident(field);

    // between bypasses the generic operator+value composition: the two
    // bounds sort ascending into a single inline range predicate.
    if op == RuleOperator::Between {
        return between_predicate(rule, &ident);
    }

    match op {
        RuleOperator::IsNull => return Ok(format!("{ident} IS NULL")),
        RuleOperator::IsNotNull => return Ok(format!("{ident} IS NOT NULL")),
        _ => {}
    }

    let value = coerce_value(rule, field)?;

    let predicate = match op {
        RuleOperator::Equal => format!("{ident} = {}", value.to_literal()),
        RuleOperator::NotEqual => format!("{ident} <> {}", value.to_literal()),
        RuleOperator::BeginsWith => {
            format!("{ident} LIKE {}", sql::quote_str(&format!("{}%", value.as_text())))
        }
        RuleOperator::NotBeginsWith => {
            format!("{ident} NOT LIKE {}", sql::quote_str(&format!("{}%", value.as_text())))
        }
        RuleOperator::Contains => {
            format!("{ident} LIKE {}", sql::quote_str(&format!("%{}%", value.as_text())))
        }
        RuleOperator::NotContains => {
            format!("{ident} NOT LIKE {}", sql::quote_str(&format!("%{}%", value.as_text())))
        }
        RuleOperator::Less => format!("{ident} < {}", value.to_literal()),
        RuleOperator::LessOrEqual => format!("{ident} <= {}", value.to_literal()),
        RuleOperator::Greater => format!("{ident} > {}", value.to_literal()),
        RuleOperator::GreaterOrEqual => format!("{ident} >= {}", value.to_literal()),
        RuleOperator::IsNull | RuleOperator::IsNotNull | RuleOperator::Between => unreachable!(),
    };

    Ok(predicate)
}

/// Apply case handling and declared-type coercion to a rule value
fn coerce_value(rule: &FilterRule, field: &str) -> QueryResult<SqlValue> {
    let mut text = match &rule.value {
        Value::String(s) => {
            // Case sensitivity keys off the field name the UI sent, which
            // is also how the ingest side normalized the data.
            if is_case_sensitive(&rule.field) {
                s.clone()
            } else {
                s.to_lowercase()
            }
        }
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    };

    if !text.is_empty() {
        match declared_type(field) {
            Some(FieldType::Int) => {
                let parsed: i64 =
                    text.trim()
                        .parse()
                        .map_err(|_| QueryError::InvalidFieldValue {
                            field: field.to_string(),
                            expected: "integer",
                            value: text.clone(),
                        })?;
                return Ok(SqlValue::Int(parsed));
            }
            Some(FieldType::Double) => {
                let parsed: f64 =
                    text.trim()
                        .parse()
                        .map_err(|_| QueryError::InvalidFieldValue {
                            field: field.to_string(),
                            expected: "double",
                            value: text.clone(),
                        })?;
                return Ok(SqlValue::Float(parsed));
            }
            None => {}
        }
    }

    // HTTP methods are stored upper-cased, overriding the general
    // lower-casing rule.
    if field == "request_method" {
        text = text.to_uppercase();
    }

    Ok(SqlValue::Str(text))
}

fn between_predicate(rule: &FilterRule, ident: &str) -> QueryResult<String> {
    let values = rule.value.as_array().ok_or_else(|| QueryError::InvalidRange {
        rule: rule.describe(),
    })?;
    if values.len() != 2 {
        return Err(QueryError::InvalidRange {
            rule: rule.describe(),
        });
    }

    let mut bounds: Vec<f64> = values.iter().map(lenient_f64).collect();
    bounds.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    Ok(format!(
        "{ident} >= {} AND {ident} <= {}",
        SqlValue::Float(bounds[0]).to_literal(),
        SqlValue::Float(bounds[1]).to_literal()
    ))
}

fn lenient_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}
