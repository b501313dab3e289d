//! Hierarchical Path Drilldown
//!
//! Traffic drills down by URL host, then successive path segments. A
//! drilldown request carries a prefix of the form `"<depth>/<segment>/…"`,
//! e.g. `"0/"` for the host level or `"2/example.com/api"` for the second
//! path level under `example.com/api`.
//!
//! The warehouse stores each `request_url_path_level<N>` value with a
//! trailing slash when deeper levels exist, which is how a terminal path
//! segment is told apart from one with descendants. The host column has no
//! such marker, so the host-level grouping expression synthesizes one from
//! whether a level-1 path is present.

use crate::sql::{self, SqlClauses};

/// Host column, the root of the drilldown hierarchy
pub const HOST_FIELD: &str = "request_url_host";

/// Host grouping expression with the synthesized child marker
const HOST_MARKER_SELECT: &str = "request_url_host || CASE WHEN request_url_path_level1 \
     IS NULL THEN '' ELSE '/' END AS request_url_host";
const HOST_MARKER_GROUP: &str = "request_url_host, CASE WHEN request_url_path_level1 \
     IS NULL THEN '' ELSE '/' END";

/// Parsed drilldown request plus the clauses every drilldown sub-query
/// shares
#[derive(Debug, Clone)]
pub struct DrilldownState {
    /// Requested hierarchy depth (0 = host level)
    pub depth: usize,
    /// Field hierarchy involved at this depth, host first
    pub fields: Vec<String>,
    /// Select/where/group-by clauses common to all drilldown sub-queries
    pub common: SqlClauses,
}

impl DrilldownState {
    /// Parse a drilldown prefix and build the common query clauses
    pub fn from_prefix(prefix: &str) -> Self {
        let segments: Vec<&str> = prefix.split('/').filter(|s| !s.is_empty()).collect();
        let depth: usize = segments
            .first()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        let mut fields = vec![HOST_FIELD.to_string()];
        for level in 1..=depth {
            fields.push(format!("request_url_path_level{level}"));
        }

        let mut common = SqlClauses::new();
        common.select.push("COUNT(*) AS hits".to_string());

        for (index, field) in fields.iter().enumerate() {
            if depth == 0 {
                common.select.push(HOST_MARKER_SELECT.to_string());
                common.group_by.push(HOST_MARKER_GROUP.to_string());
            } else {
                common.select.push(field.clone());
                common.group_by.push(field.clone());
            }
            common.where_.push(format!("{field} IS NOT NULL"));

            // Constrain this level to the exact prefix segment, wrapped per
            // the trailing-slash convention: level 1 gets slashes on both
            // sides (it starts the path), deeper levels only trail.
            if let Some(segment) = segments.get(index + 1) {
                let value = if index == 1 {
                    format!("/{segment}/")
                } else if index > 1 {
                    format!("{segment}/")
                } else {
                    (*segment).to_string()
                };
                common
                    .where_
                    .push(format!("{field} = {}", sql::quote_str(&value)));
            }
        }

        Self {
            depth,
            fields,
            common,
        }
    }

    /// The deepest field in the hierarchy for this request
    pub fn depth_field(&self) -> &str {
        self.fields.last().map(String::as_str).unwrap_or(HOST_FIELD)
    }

    /// Rebuild a prefix key from one row's per-level field values
    ///
    /// The key is the depth followed by the hierarchy values joined with
    /// `/`, without doubling separators when a value carries its own
    /// boundary slash.
    pub fn prefix_key(&self, values: &[String]) -> String {
        let mut key = self.depth.to_string();
        for value in values {
            if !key.ends_with('/') && !value.starts_with('/') {
                key.push('/');
            } else if key.ends_with('/') && value.starts_with('/') {
                key.pop();
            }
            key.push_str(value);
        }
        key
    }
}
