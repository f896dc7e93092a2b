//! Span decoders for the two accepted wire shapes
//!
//! Dedicated span shape:
//!
//! ```json
//! {"traceID": "..", "spanID": "..", "parentSpanID": "..", "name": "..",
//!  "startTimeUnixNano": 1, "endTimeUnixNano": 2, "attributes": {"k": "v"}}
//! ```
//!
//! Tagged-metric shape:
//!
//! ```json
//! {"name": "span", "timestamp": 1,
//!  "tags": {"trace_id": "..", "span_id": "..", "parent_span_id": "..", "operation_name": ".."},
//!  "fields": {"start_time": 1, "end_time": 2}}
//! ```

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::IngestError;
use crate::domain::span::Span;

const TRACE_ID: &[&str] = &["traceID", "trace_id", "traceId"];
const SPAN_ID: &[&str] = &["spanID", "span_id", "spanId"];
const PARENT_SPAN_ID: &[&str] = &["parentSpanID", "parent_span_id", "parentSpanId"];
const OPERATION_NAME: &[&str] = &["name", "operation_name", "operationName"];
const START_TIME: &[&str] = &["startTimeUnixNano", "start_time", "startTime"];
const END_TIME: &[&str] = &["endTimeUnixNano", "end_time", "endTime"];
const ATTRIBUTES: &[&str] = &["attributes", "tags"];
const METRIC_OPERATION_NAME: &[&str] = &["operation_name", "operationName"];

/// Metric name carried by tagged-metric span records
pub const SPAN_METRIC_NAME: &str = "span";

/// Wire shape of a span topic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanFormat {
    #[default]
    Span,
    Metric,
}

impl fmt::Display for SpanFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpanFormat::Span => write!(f, "span"),
            SpanFormat::Metric => write!(f, "metric"),
        }
    }
}

/// Turns a raw topic record into a canonical span
///
/// `key` is the producer's partition key. Producers key span records by trace
/// id, so decoders fall back to it when the payload omits one.
pub trait SpanDecoder: Send + Sync {
    fn decode(
        &self,
        key: Option<&[u8]>,
        value: &[u8],
        topic: &str,
        timestamp_ms: i64,
    ) -> Result<Span, IngestError>;
}

pub fn decoder_for(format: SpanFormat) -> Box<dyn SpanDecoder> {
    match format {
        SpanFormat::Span => Box::new(SpanRecordDecoder),
        SpanFormat::Metric => Box::new(MetricRecordDecoder),
    }
}

/// Reject spans without identity
pub fn validate(span: &Span) -> Result<(), IngestError> {
    if span.trace_id.is_empty() {
        return Err(IngestError::validate("trace_id is empty"));
    }
    if span.span_id.is_empty() {
        return Err(IngestError::validate(format!(
            "span_id is empty (trace_id={})",
            span.trace_id
        )));
    }
    Ok(())
}

/// Decoder for the dedicated span shape
pub struct SpanRecordDecoder;

impl SpanDecoder for SpanRecordDecoder {
    fn decode(
        &self,
        key: Option<&[u8]>,
        value: &[u8],
        topic: &str,
        _timestamp_ms: i64,
    ) -> Result<Span, IngestError> {
        let obj = parse_object(value, topic)?;

        let tags = match field(&obj, ATTRIBUTES) {
            Some(Value::Object(attrs)) => stringify_tags(attrs),
            _ => HashMap::new(),
        };

        Ok(Span {
            trace_id: string_field(&obj, TRACE_ID).unwrap_or_else(|| key_string(key)),
            span_id: string_field(&obj, SPAN_ID).unwrap_or_default(),
            parent_span_id: string_field(&obj, PARENT_SPAN_ID).unwrap_or_default(),
            operation_name: string_field(&obj, OPERATION_NAME).unwrap_or_default(),
            start_time: time_field(&obj, START_TIME, topic)?,
            end_time: time_field(&obj, END_TIME, topic)?,
            tags,
        })
    }
}

/// Decoder for the generic tagged-metric shape
pub struct MetricRecordDecoder;

impl SpanDecoder for MetricRecordDecoder {
    fn decode(
        &self,
        key: Option<&[u8]>,
        value: &[u8],
        topic: &str,
        _timestamp_ms: i64,
    ) -> Result<Span, IngestError> {
        let obj = parse_object(value, topic)?;

        if let Some(name) = obj.get("name").and_then(Value::as_str)
            && name != SPAN_METRIC_NAME
        {
            return Err(IngestError::decode(format!(
                "unexpected metric '{}' on span topic {}",
                name, topic
            )));
        }

        let fields = match obj.get("fields") {
            Some(Value::Object(fields)) => fields,
            _ => {
                return Err(IngestError::decode(format!(
                    "metric record without fields on topic {}",
                    topic
                )));
            }
        };

        let mut tags = match obj.get("tags") {
            Some(Value::Object(tags)) => stringify_tags(tags),
            _ => HashMap::new(),
        };
        let mut lift = |names: &[&str]| names.iter().find_map(|n| tags.remove(*n));

        let trace_id = lift(TRACE_ID).unwrap_or_else(|| key_string(key));
        let span_id = lift(SPAN_ID).unwrap_or_default();
        let parent_span_id = lift(PARENT_SPAN_ID).unwrap_or_default();
        let operation_name = lift(METRIC_OPERATION_NAME).unwrap_or_default();

        Ok(Span {
            trace_id,
            span_id,
            parent_span_id,
            operation_name,
            start_time: time_field(fields, START_TIME, topic)?,
            end_time: time_field(fields, END_TIME, topic)?,
            tags,
        })
    }
}

/// Normalize every numeric JSON representation to `i64`
///
/// Accepts signed and unsigned integers within range, finite floats
/// (truncated), and strings holding either form.
pub fn coerce_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i)
            } else if n.is_u64() {
                // Only reached for values above i64::MAX
                None
            } else {
                n.as_f64().and_then(float_to_i64)
            }
        }
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(float_to_i64))
        }
        _ => None,
    }
}

fn float_to_i64(f: f64) -> Option<i64> {
    (f.is_finite() && f >= i64::MIN as f64 && f <= i64::MAX as f64).then_some(f as i64)
}

fn parse_object(value: &[u8], topic: &str) -> Result<Map<String, Value>, IngestError> {
    match serde_json::from_slice::<Value>(value) {
        Ok(Value::Object(obj)) => Ok(obj),
        Ok(_) => Err(IngestError::decode(format!(
            "span record on topic {} is not a JSON object",
            topic
        ))),
        Err(e) => Err(IngestError::decode(format!(
            "invalid JSON on topic {}: {}",
            topic, e
        ))),
    }
}

fn field<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|n| obj.get(*n))
}

fn string_field(obj: &Map<String, Value>, names: &[&str]) -> Option<String> {
    field(obj, names).and_then(tag_value)
}

fn time_field(obj: &Map<String, Value>, names: &[&str], topic: &str) -> Result<i64, IngestError> {
    let value = field(obj, names).ok_or_else(|| {
        IngestError::decode(format!("missing {} on topic {}", names[0], topic))
    })?;
    coerce_i64(value).ok_or_else(|| {
        IngestError::decode(format!(
            "{} is not numeric on topic {}: {}",
            names[0], topic, value
        ))
    })
}

fn tag_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn stringify_tags(map: &Map<String, Value>) -> HashMap<String, String> {
    map.iter()
        .filter_map(|(k, v)| tag_value(v).map(|v| (k.clone(), v)))
        .collect()
}

fn key_string(key: Option<&[u8]>) -> String {
    key.map(|k| String::from_utf8_lossy(k).into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(format: SpanFormat, value: Value) -> Result<Span, IngestError> {
        let bytes = serde_json::to_vec(&value).unwrap();
        decoder_for(format).decode(None, &bytes, "spans", 0)
    }

    #[test]
    fn test_coerce_i64_variants() {
        assert_eq!(coerce_i64(&json!(42)), Some(42));
        assert_eq!(coerce_i64(&json!(-7)), Some(-7));
        assert_eq!(coerce_i64(&json!(12.9)), Some(12));
        assert_eq!(coerce_i64(&json!("1700000000000000000")), Some(1_700_000_000_000_000_000));
        assert_eq!(coerce_i64(&json!(" 3.5 ")), Some(3));
        assert_eq!(coerce_i64(&json!(u64::MAX)), None);
        assert_eq!(coerce_i64(&json!("abc")), None);
        assert_eq!(coerce_i64(&json!(true)), None);
        assert_eq!(coerce_i64(&Value::Null), None);
    }

    #[test]
    fn test_decode_span_shape() {
        let span = decode(
            SpanFormat::Span,
            json!({
                "traceID": "t1",
                "spanID": "s1",
                "parentSpanID": "p1",
                "name": "GET /users",
                "startTimeUnixNano": "100",
                "endTimeUnixNano": 250.0,
                "attributes": {"service_name": "api", "http_status": 200, "empty": null},
                "events": []
            }),
        )
        .unwrap();

        assert_eq!(span.trace_id, "t1");
        assert_eq!(span.span_id, "s1");
        assert_eq!(span.parent_span_id, "p1");
        assert_eq!(span.operation_name, "GET /users");
        assert_eq!(span.start_time, 100);
        assert_eq!(span.end_time, 250);
        assert_eq!(span.service_name(), "api");
        assert_eq!(span.tag("http_status"), Some("200"));
        assert!(!span.tags.contains_key("empty"));
        assert!(validate(&span).is_ok());
    }

    #[test]
    fn test_decode_metric_shape_lifts_identity() {
        let span = decode(
            SpanFormat::Metric,
            json!({
                "name": "span",
                "timestamp": 100,
                "tags": {
                    "trace_id": "t1",
                    "span_id": "s1",
                    "parent_span_id": "",
                    "operation_name": "query",
                    "service_name": "db"
                },
                "fields": {"start_time": 100, "end_time": "300"}
            }),
        )
        .unwrap();

        assert_eq!(span.trace_id, "t1");
        assert_eq!(span.operation_name, "query");
        assert_eq!(span.end_time, 300);
        assert!(span.is_root());
        assert_eq!(span.tags.len(), 1);
        assert_eq!(span.service_name(), "db");
    }

    #[test]
    fn test_decode_rejects_malformed() {
        let bad = decoder_for(SpanFormat::Span).decode(None, b"{not json", "spans", 0);
        assert!(matches!(bad, Err(IngestError::Decode(_))));

        let array = decode(SpanFormat::Span, json!([1, 2]));
        assert!(matches!(array, Err(IngestError::Decode(_))));

        let missing_end = decode(
            SpanFormat::Span,
            json!({"traceID": "t", "spanID": "s", "startTimeUnixNano": 1}),
        );
        assert!(matches!(missing_end, Err(IngestError::Decode(_))));

        let other_metric = decode(
            SpanFormat::Metric,
            json!({"name": "cpu", "tags": {}, "fields": {"start_time": 1, "end_time": 2}}),
        );
        assert!(matches!(other_metric, Err(IngestError::Decode(_))));
    }

    #[test]
    fn test_validate_requires_ids() {
        let span = decode(
            SpanFormat::Span,
            json!({"traceID": "t", "startTimeUnixNano": 1, "endTimeUnixNano": 2}),
        )
        .unwrap();
        assert!(matches!(validate(&span), Err(IngestError::Validate(_))));

        let span = Span {
            span_id: "s".into(),
            ..Default::default()
        };
        assert!(matches!(validate(&span), Err(IngestError::Validate(_))));
    }

    #[test]
    fn test_key_fallback_for_trace_id() {
        let bytes = serde_json::to_vec(&json!({
            "spanID": "s", "startTimeUnixNano": 1, "endTimeUnixNano": 2
        }))
        .unwrap();
        let span = SpanRecordDecoder
            .decode(Some(b"trace-from-key"), &bytes, "spans", 0)
            .unwrap();
        assert_eq!(span.trace_id, "trace-from-key");
    }

    #[test]
    fn test_valid_records_keep_identity() {
        for (trace_id, span_id) in [("a", "b"), ("0af7651916cd43dd", "b7ad6b7169203331")] {
            for format in [SpanFormat::Span, SpanFormat::Metric] {
                let value = match format {
                    SpanFormat::Span => json!({
                        "traceID": trace_id, "spanID": span_id,
                        "startTimeUnixNano": 1, "endTimeUnixNano": 2
                    }),
                    SpanFormat::Metric => json!({
                        "name": "span",
                        "tags": {"trace_id": trace_id, "span_id": span_id},
                        "fields": {"start_time": 1, "end_time": 2}
                    }),
                };
                let span = decode(format, value).unwrap();
                assert!(validate(&span).is_ok());
                assert_eq!(span.trace_id, trace_id);
                assert_eq!(span.span_id, span_id);
            }
        }
    }
}
