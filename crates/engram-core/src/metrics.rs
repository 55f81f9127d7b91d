//! Metrics
//!
//! Append-only per-session observability ledger. Events are written by the
//! command pipelines and summarized on demand; nothing here is ever updated
//! in place.

use serde::{Deserialize, Serialize};

/// Kind of a metric event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Remember,
    Recall,
    Forget,
    Upsert,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Remember => "remember",
            MetricKind::Recall => "recall",
            MetricKind::Forget => "forget",
            MetricKind::Upsert => "upsert",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single append-only metric event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricEvent {
    pub kind: MetricKind,
    pub session_id: Option<String>,
    pub memory_id: Option<String>,
    pub query: Option<String>,
    pub result_count: Option<i64>,
    pub was_fallback: bool,
}

impl MetricEvent {
    pub fn new(kind: MetricKind) -> Self {
        Self {
            kind,
            session_id: None,
            memory_id: None,
            query: None,
            result_count: None,
            was_fallback: false,
        }
    }

    pub fn session(mut self, session_id: Option<&str>) -> Self {
        self.session_id = session_id.map(str::to_string);
        self
    }

    pub fn memory(mut self, memory_id: &str) -> Self {
        self.memory_id = Some(memory_id.to_string());
        self
    }

    pub fn query(mut self, query: &str) -> Self {
        self.query = Some(query.to_string());
        self
    }

    pub fn results(mut self, count: i64, was_fallback: bool) -> Self {
        self.result_count = Some(count);
        self.was_fallback = was_fallback;
        self
    }
}

/// Aggregate metric summary, optionally filtered to one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total_remembers: i64,
    pub total_recalls: i64,
    /// recall events with result_count > 0 / all recall events (0 when none)
    pub recall_hit_rate: f64,
    /// recall events with was_fallback / all recall events (0 when none)
    pub fallback_rate: f64,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_kind_roundtrip() {
        for kind in [
            MetricKind::Remember,
            MetricKind::Recall,
            MetricKind::Forget,
            MetricKind::Upsert,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_event_builder() {
        let event = MetricEvent::new(MetricKind::Recall)
            .session(Some("s1"))
            .query("rust borrow checker")
            .results(3, true);
        assert_eq!(event.session_id.as_deref(), Some("s1"));
        assert_eq!(event.result_count, Some(3));
        assert!(event.was_fallback);
        assert!(event.memory_id.is_none());
    }
}
