//! Trace search statements over the `trace` metric
//!
//! Trace summaries are aggregated by the metrics store; this module only
//! turns a filter into a parameterized statement and maps result rows back.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use super::error::QueryError;
use crate::core::constants::{DEFAULT_TRACE_LIMIT, DEFAULT_TRACE_WINDOW_MS, MAX_TRACE_LIMIT};

/// Status filter over the error-count aggregate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    #[default]
    All,
    Success,
    Error,
}

impl TraceStatus {
    pub const ALL: [TraceStatus; 3] = [TraceStatus::All, TraceStatus::Success, TraceStatus::Error];

    pub fn as_str(&self) -> &'static str {
        match self {
            TraceStatus::All => "all",
            TraceStatus::Success => "success",
            TraceStatus::Error => "error",
        }
    }

    fn condition(&self) -> &'static str {
        match self {
            TraceStatus::All => "errors_sum::field>=0",
            TraceStatus::Success => "errors_sum::field=0",
            TraceStatus::Error => "errors_sum::field>0",
        }
    }
}

/// One of the fixed result orderings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TraceSort {
    #[default]
    TraceTimeDesc,
    TraceTimeAsc,
    TraceDurationDesc,
    TraceDurationAsc,
    SpanCountDesc,
    SpanCountAsc,
}

impl TraceSort {
    pub const ALL: [TraceSort; 6] = [
        TraceSort::TraceTimeDesc,
        TraceSort::TraceTimeAsc,
        TraceSort::TraceDurationDesc,
        TraceSort::TraceDurationAsc,
        TraceSort::SpanCountDesc,
        TraceSort::SpanCountAsc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TraceSort::TraceTimeDesc => "trace_time_desc",
            TraceSort::TraceTimeAsc => "trace_time_asc",
            TraceSort::TraceDurationDesc => "trace_duration_desc",
            TraceSort::TraceDurationAsc => "trace_duration_asc",
            TraceSort::SpanCountDesc => "span_count_desc",
            TraceSort::SpanCountAsc => "span_count_asc",
        }
    }

    fn clause(&self) -> &'static str {
        match self {
            TraceSort::TraceTimeDesc => "ORDER BY start_time::field DESC",
            TraceSort::TraceTimeAsc => "ORDER BY start_time::field ASC",
            TraceSort::TraceDurationDesc => "ORDER BY trace_duration::field DESC",
            TraceSort::TraceDurationAsc => "ORDER BY trace_duration::field ASC",
            TraceSort::SpanCountDesc => "ORDER BY span_count::field DESC",
            TraceSort::SpanCountAsc => "ORDER BY span_count::field ASC",
        }
    }
}

macro_rules! impl_name_parsing {
    ($ty:ty, $what:literal) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = QueryError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::ALL
                    .into_iter()
                    .find(|v| v.as_str().eq_ignore_ascii_case(s))
                    .ok_or_else(|| QueryError::parameter($what, format!("unknown value '{}'", s)))
            }
        }
    };
}

impl_name_parsing!(TraceStatus, "status");
impl_name_parsing!(TraceSort, "sort");

/// Trace search filter
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(default)]
pub struct TraceQuery {
    pub scope_id: String,
    /// Window start, unix milliseconds
    pub start_time: Option<i64>,
    /// Window end, unix milliseconds
    pub end_time: Option<i64>,
    pub trace_id: Option<String>,
    pub service_name: Option<String>,
    pub rpc_method: Option<String>,
    pub http_path: Option<String>,
    /// Duration bounds; both or neither must be set
    pub duration_min: Option<i64>,
    pub duration_max: Option<i64>,
    pub status: TraceStatus,
    pub sort: TraceSort,
    pub limit: Option<i64>,
}

/// Statement ready for the metrics store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceStatement {
    /// Window start, unix milliseconds
    pub start: i64,
    /// Window end, unix milliseconds
    pub end: i64,
    pub statement: String,
    pub params: BTreeMap<String, Value>,
}

/// One row of a trace search
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct TraceSummary {
    pub id: String,
    /// Unix milliseconds
    pub start_time: i64,
    pub duration: f64,
    pub services: Vec<String>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QueryCondition {
    pub key: &'static str,
}

/// Filter options offered to clients
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TraceQueryConditions {
    pub sort: Vec<QueryCondition>,
    pub trace_status: Vec<QueryCondition>,
    pub others: Vec<QueryCondition>,
}

pub fn trace_query_conditions() -> TraceQueryConditions {
    TraceQueryConditions {
        sort: TraceSort::ALL
            .iter()
            .map(|s| QueryCondition { key: s.as_str() })
            .collect(),
        trace_status: TraceStatus::ALL
            .iter()
            .map(|s| QueryCondition { key: s.as_str() })
            .collect(),
        others: ["trace_id", "service_name", "rpc_method", "http_path"]
            .into_iter()
            .map(|key| QueryCondition { key })
            .collect(),
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

impl TraceQuery {
    /// Apply defaults and reject invalid filter combinations
    ///
    /// `now_ms` anchors the default one-hour window.
    pub fn normalize(mut self, now_ms: i64) -> Result<Self, QueryError> {
        if self.scope_id.is_empty() {
            return Err(QueryError::MissingParameter("scope_id"));
        }

        let limit = self.limit.unwrap_or(0);
        self.limit = Some(if limit <= 0 {
            DEFAULT_TRACE_LIMIT
        } else {
            limit.min(MAX_TRACE_LIMIT)
        });

        let min = self.duration_min.filter(|d| *d != 0);
        let max = self.duration_max.filter(|d| *d != 0);
        match (min, max) {
            (Some(_), None) | (None, Some(_)) => {
                return Err(QueryError::parameter(
                    "duration",
                    "missing min or max duration",
                ));
            }
            (Some(min), Some(max)) if max <= min => {
                return Err(QueryError::parameter(
                    "duration",
                    "max duration must be greater than min duration",
                ));
            }
            _ => {}
        }
        self.duration_min = min;
        self.duration_max = max;

        let start = self.start_time.filter(|t| *t > 0);
        let end = self.end_time.filter(|t| *t > 0);
        if let (Some(start), Some(end)) = (start, end) {
            self.start_time = Some(start);
            self.end_time = Some(end);
        } else {
            self.start_time = Some(now_ms - DEFAULT_TRACE_WINDOW_MS);
            self.end_time = Some(now_ms);
        }
        Ok(self)
    }

    /// Filter clauses (each followed by `AND`) and their parameters
    fn filters(&self) -> (String, BTreeMap<String, Value>) {
        let mut params = BTreeMap::new();
        params.insert("terminus_keys".to_string(), Value::from(self.scope_id.as_str()));

        let mut clauses = String::new();
        let string_filters = [
            ("trace_id", "trace_id::tag", &self.trace_id),
            ("service_names", "service_names::field", &self.service_name),
            ("dubbo_methods", "dubbo_methods::field", &self.rpc_method),
            ("http_paths", "http_paths::field", &self.http_path),
        ];
        for (param, column, value) in string_filters {
            if let Some(value) = non_empty(value) {
                params.insert(param.to_string(), Value::from(value));
                clauses.push_str(&format!("{column}=${param} AND "));
            }
        }

        match (self.duration_min, self.duration_max) {
            (Some(min), Some(max)) if min > 0 && max > min => {
                params.insert("duration_min".to_string(), Value::from(min));
                params.insert("duration_max".to_string(), Value::from(max));
                clauses.push_str(
                    "trace_duration::field>$duration_min AND trace_duration::field<$duration_max AND ",
                );
            }
            _ => {}
        }

        clauses.push_str(self.status.condition());
        clauses.push_str(" AND ");
        (clauses, params)
    }

    fn window(&self) -> (i64, i64) {
        (self.start_time.unwrap_or(0), self.end_time.unwrap_or(0))
    }

    /// Search statement; call on a normalized query
    pub fn statement(&self) -> TraceStatement {
        let (filters, params) = self.filters();
        let (start, end) = self.window();
        let statement = format!(
            "SELECT start_time::field,end_time::field,service_names::field,trace_id::tag,\
             if(gt(errors_sum::field,0),'error','success') FROM trace WHERE {filters}\
             terminus_keys::field=$terminus_keys {} LIMIT {}",
            self.sort.clause(),
            self.limit.unwrap_or(DEFAULT_TRACE_LIMIT)
        );
        TraceStatement {
            start,
            end,
            statement,
            params,
        }
    }

    /// Count statement over the same filters
    pub fn count_statement(&self) -> TraceStatement {
        let (filters, params) = self.filters();
        let (start, end) = self.window();
        TraceStatement {
            start,
            end,
            statement: format!(
                "SELECT count(trace_id::tag) FROM trace WHERE {filters}terminus_keys::field=$terminus_keys"
            ),
            params,
        }
    }
}

fn number(value: Option<&Value>) -> f64 {
    value.and_then(Value::as_f64).unwrap_or(0.0)
}

/// Map a search row `[start_ns, end_ns, services, trace_id, status]`
///
/// Rows without a status cell read as `success`, the same outcome the
/// search statement gives a trace with no recorded errors.
pub fn trace_summary(row: &[Value]) -> TraceSummary {
    let start = number(row.first());
    let end = number(row.get(1));
    let services = match row.get(2) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    };
    TraceSummary {
        id: row
            .get(3)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        start_time: (start / 1e6) as i64,
        duration: (end - start).abs(),
        services,
        status: row
            .get(4)
            .and_then(Value::as_str)
            .unwrap_or("success")
            .to_string(),
    }
}

/// Count from the first cell of the first row
pub fn trace_count(rows: &[Vec<Value>]) -> i64 {
    number(rows.first().and_then(|row| row.first())) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;

    fn query() -> TraceQuery {
        TraceQuery {
            scope_id: "scope-1".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_scope_required() {
        let err = TraceQuery::default().normalize(NOW).unwrap_err();
        assert!(matches!(err, QueryError::MissingParameter("scope_id")));
    }

    #[test]
    fn test_defaults() {
        let q = query().normalize(NOW).unwrap();
        assert_eq!(q.limit, Some(100));
        assert_eq!(q.end_time, Some(NOW));
        assert_eq!(q.start_time, Some(NOW - 3_600_000));
    }

    #[test]
    fn test_limit_is_capped() {
        let q = TraceQuery {
            limit: Some(5000),
            ..query()
        }
        .normalize(NOW)
        .unwrap();
        assert_eq!(q.limit, Some(1000));
    }

    #[test]
    fn test_explicit_window_is_kept() {
        let q = TraceQuery {
            start_time: Some(10),
            end_time: Some(20),
            ..query()
        }
        .normalize(NOW)
        .unwrap();
        assert_eq!((q.start_time, q.end_time), (Some(10), Some(20)));
    }

    #[test]
    fn test_duration_requires_both_bounds() {
        let err = TraceQuery {
            duration_min: Some(10),
            ..query()
        }
        .normalize(NOW)
        .unwrap_err();
        assert!(matches!(err, QueryError::Parameter { name: "duration", .. }));
        assert!(err.to_string().contains("missing min or max duration"));

        let err = TraceQuery {
            duration_min: Some(10),
            duration_max: Some(10),
            ..query()
        }
        .normalize(NOW)
        .unwrap_err();
        assert!(matches!(err, QueryError::Parameter { name: "duration", .. }));
    }

    #[test]
    fn test_minimal_statement() {
        let stmt = query().normalize(NOW).unwrap().statement();
        assert_eq!(
            stmt.statement,
            "SELECT start_time::field,end_time::field,service_names::field,trace_id::tag,\
             if(gt(errors_sum::field,0),'error','success') FROM trace WHERE errors_sum::field>=0 AND \
             terminus_keys::field=$terminus_keys ORDER BY start_time::field DESC LIMIT 100"
        );
        assert_eq!(stmt.params.len(), 1);
        assert_eq!(stmt.params["terminus_keys"], json!("scope-1"));
        assert_eq!((stmt.start, stmt.end), (NOW - 3_600_000, NOW));
    }

    #[test]
    fn test_full_statement() {
        let stmt = TraceQuery {
            trace_id: Some("t-1".into()),
            service_name: Some("orders".into()),
            rpc_method: Some("".into()),
            http_path: Some("/api/orders".into()),
            duration_min: Some(5),
            duration_max: Some(50),
            status: TraceStatus::Error,
            sort: TraceSort::SpanCountAsc,
            limit: Some(10),
            ..query()
        }
        .normalize(NOW)
        .unwrap()
        .statement();

        assert!(stmt.statement.contains(
            "WHERE trace_id::tag=$trace_id AND service_names::field=$service_names AND \
             http_paths::field=$http_paths AND trace_duration::field>$duration_min AND \
             trace_duration::field<$duration_max AND errors_sum::field>0 AND terminus_keys"
        ));
        assert!(stmt.statement.ends_with("ORDER BY span_count::field ASC LIMIT 10"));
        assert!(!stmt.params.contains_key("dubbo_methods"));
        assert_eq!(stmt.params["duration_min"], json!(5));
        assert_eq!(stmt.params["http_paths"], json!("/api/orders"));
    }

    #[test]
    fn test_count_statement() {
        let stmt = TraceQuery {
            status: TraceStatus::Success,
            ..query()
        }
        .normalize(NOW)
        .unwrap()
        .count_statement();
        assert_eq!(
            stmt.statement,
            "SELECT count(trace_id::tag) FROM trace WHERE errors_sum::field=0 AND \
             terminus_keys::field=$terminus_keys"
        );
    }

    #[test]
    fn test_parse_sort_and_status() {
        assert_eq!("trace_duration_asc".parse::<TraceSort>().unwrap(), TraceSort::TraceDurationAsc);
        assert_eq!("ERROR".parse::<TraceStatus>().unwrap(), TraceStatus::Error);
        assert!("sideways".parse::<TraceSort>().is_err());
    }

    #[test]
    fn test_trace_summary_mapping() {
        let row = vec![
            json!(1_000_000_000_000_000i64),
            json!(1_000_000_250_000_000i64),
            json!(["gateway", "orders"]),
            json!("t-1"),
            json!("error"),
        ];
        let summary = trace_summary(&row);
        assert_eq!(summary.id, "t-1");
        assert_eq!(summary.start_time, 1_000_000_000);
        assert_eq!(summary.duration, 250_000_000.0);
        assert_eq!(summary.services, vec!["gateway", "orders"]);
        assert_eq!(summary.status, "error");
    }

    #[test]
    fn test_trace_summary_without_status_reads_success() {
        let row = vec![json!(2_000_000.0), json!(1_000_000.0), json!("gateway"), json!("t-2")];
        let summary = trace_summary(&row);
        assert_eq!(summary.status, "success");
        assert_eq!(summary.services, vec!["gateway"]);
        // End before start still yields a positive duration
        assert_eq!(summary.duration, 1_000_000.0);
        assert_eq!(summary.start_time, 2);
    }

    #[test]
    fn test_trace_count() {
        assert_eq!(trace_count(&[vec![json!(42.0)]]), 42);
        assert_eq!(trace_count(&[]), 0);
    }

    #[test]
    fn test_conditions() {
        let conditions = trace_query_conditions();
        assert_eq!(conditions.sort.len(), 6);
        assert_eq!(conditions.sort[0].key, "trace_time_desc");
        assert_eq!(conditions.trace_status.len(), 3);
    }
}
