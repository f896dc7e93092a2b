//! Canonical span representation shared by ingestion, storage and query

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Tag carrying the emitting service
pub const TAG_SERVICE_NAME: &str = "service_name";
/// Tags naming the scope a span belongs to, in lookup order
pub const SCOPE_TAGS: [&str; 2] = ["terminus_key", "scope_id"];

/// A single timed operation within a trace
///
/// Times are nanoseconds since the unix epoch. `end_time >= start_time` is not
/// enforced; durations are taken as absolute differences.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Span {
    pub trace_id: String,
    pub span_id: String,
    /// Empty for roots
    #[serde(default)]
    pub parent_span_id: String,
    pub operation_name: String,
    pub start_time: i64,
    pub end_time: i64,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl Span {
    /// Roots have no parent or name themselves as parent
    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_empty() || self.parent_span_id == self.span_id
    }

    /// Parent id with self-parenting normalized away
    pub fn parent_id(&self) -> Option<&str> {
        if self.is_root() {
            None
        } else {
            Some(&self.parent_span_id)
        }
    }

    pub fn duration(&self) -> i64 {
        self.end_time.saturating_sub(self.start_time).saturating_abs()
    }

    /// Service name tag, empty when absent
    pub fn service_name(&self) -> &str {
        self.tags
            .get(TAG_SERVICE_NAME)
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// First non-empty scope tag
    pub fn scope(&self) -> Option<&str> {
        SCOPE_TAGS
            .iter()
            .find_map(|k| self.tag(k).filter(|v| !v.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(span_id: &str, parent: &str) -> Span {
        Span {
            trace_id: "t".into(),
            span_id: span_id.into(),
            parent_span_id: parent.into(),
            operation_name: "op".into(),
            start_time: 100,
            end_time: 40,
            tags: HashMap::new(),
        }
    }

    #[test]
    fn test_root_detection() {
        assert!(span("a", "").is_root());
        assert!(span("a", "a").is_root());
        assert!(!span("a", "b").is_root());
        assert_eq!(span("a", "a").parent_id(), None);
        assert_eq!(span("a", "b").parent_id(), Some("b"));
    }

    #[test]
    fn test_duration_tolerates_skew() {
        assert_eq!(span("a", "").duration(), 60);
    }

    #[test]
    fn test_tag_accessors() {
        let mut s = span("a", "");
        assert_eq!(s.service_name(), "");
        assert_eq!(s.tag("region"), None);

        s.tags.insert(TAG_SERVICE_NAME.into(), "checkout".into());
        s.tags.insert("region".into(), "eu".into());
        assert_eq!(s.service_name(), "checkout");
        assert_eq!(s.tag("region"), Some("eu"));
    }

    #[test]
    fn test_scope_prefers_terminus_key() {
        let mut s = span("a", "");
        assert_eq!(s.scope(), None);
        s.tags.insert("scope_id".into(), "sc".into());
        assert_eq!(s.scope(), Some("sc"));
        s.tags.insert("terminus_key".into(), String::new());
        assert_eq!(s.scope(), Some("sc"));
        s.tags.insert("terminus_key".into(), "tk".into());
        assert_eq!(s.scope(), Some("tk"));
    }
}
