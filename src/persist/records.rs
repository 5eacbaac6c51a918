// src/persist/records.rs
//! Storage rows for each telemetry kind.
//!
//! Text columns are never null: missing optional values become empty
//! strings, missing numbers take a neutral value.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::ToRecord;
use crate::message::{
    DependencyMessage, Envelope, ErrorMessage, EventMessage, MessageHeader, MetricMessage,
    PageViewMessage, RequestMessage, TraceMessage,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordHeader {
    pub id: Uuid,
    pub operation_id: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&MessageHeader> for RecordHeader {
    fn from(header: &MessageHeader) -> Self {
        RecordHeader {
            id: header.id,
            operation_id: header.operation_id.clone(),
            // Unstamped messages were not produced by a publisher; record arrival time.
            timestamp: header.timestamp().unwrap_or_else(Utc::now),
        }
    }
}

fn text(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub message: String,
    pub severity_level: String,
    pub category: String,
}

impl ToRecord for TraceMessage {
    type Record = TraceRecord;

    fn to_record(&self) -> TraceRecord {
        TraceRecord {
            header: self.header().into(),
            message: self.message.clone(),
            severity_level: self.severity_level.as_str().to_string(),
            category: text(&self.category),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub message: String,
    pub exception_type: String,
    pub stack_trace: String,
    pub severity_level: String,
}

impl ToRecord for ErrorMessage {
    type Record = ErrorRecord;

    fn to_record(&self) -> ErrorRecord {
        ErrorRecord {
            header: self.header().into(),
            message: self.message.clone(),
            exception_type: self.exception_type.clone(),
            stack_trace: text(&self.stack_trace),
            severity_level: self.severity_level.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub name: String,
    pub namespace: String,
    pub value: f64,
    pub count: u32,
    pub min: f64,
    pub max: f64,
}

impl ToRecord for MetricMessage {
    type Record = MetricRecord;

    fn to_record(&self) -> MetricRecord {
        MetricRecord {
            header: self.header().into(),
            name: self.name.clone(),
            namespace: text(&self.namespace),
            value: self.value,
            count: self.count.unwrap_or(1),
            min: self.min.unwrap_or(self.value),
            max: self.max.unwrap_or(self.value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageViewRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub name: String,
    pub url: String,
    pub duration_ms: u64,
}

impl ToRecord for PageViewMessage {
    type Record = PageViewRecord;

    fn to_record(&self) -> PageViewRecord {
        PageViewRecord {
            header: self.header().into(),
            name: self.name.clone(),
            url: text(&self.url),
            duration_ms: self.duration_ms.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub name: String,
    pub url: String,
    pub http_method: String,
    pub response_code: u16,
    pub success: bool,
    pub duration_ms: u64,
}

impl ToRecord for RequestMessage {
    type Record = RequestRecord;

    fn to_record(&self) -> RequestRecord {
        RequestRecord {
            header: self.header().into(),
            name: self.name.clone(),
            url: self.url.clone(),
            http_method: text(&self.http_method),
            response_code: self.response_code,
            success: self.success,
            duration_ms: self.duration_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DependencyRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub dependency_type: String,
    pub target: String,
    pub name: String,
    pub data: String,
    pub result_code: String,
    pub success: bool,
    pub duration_ms: u64,
}

impl ToRecord for DependencyMessage {
    type Record = DependencyRecord;

    fn to_record(&self) -> DependencyRecord {
        DependencyRecord {
            header: self.header().into(),
            dependency_type: self.dependency_type.clone(),
            target: self.target.clone(),
            name: self.name.clone(),
            data: text(&self.data),
            result_code: text(&self.result_code),
            success: self.success,
            duration_ms: self.duration_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub name: String,
    pub data: String,
}

impl ToRecord for EventMessage {
    type Record = EventRecord;

    fn to_record(&self) -> EventRecord {
        EventRecord {
            header: self.header().into(),
            name: self.name.clone(),
            data: text(&self.data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::SeverityLevel;

    #[test]
    fn missing_text_becomes_empty_string() {
        let record = TraceMessage::new("boot", SeverityLevel::Warning).to_record();

        assert_eq!(record.category, "");
        assert_eq!(record.severity_level, "Warning");
        assert_eq!(record.message, "boot");
    }

    #[test]
    fn header_values_are_copied() {
        let mut trace = TraceMessage::new("boot", SeverityLevel::Information);
        let now = Utc::now();
        trace.header_mut().stamp(now);

        let record = trace.to_record();

        assert_eq!(record.header.id, trace.id());
        assert_eq!(record.header.operation_id, trace.operation_id());
        assert_eq!(record.header.timestamp, now);
    }

    #[test]
    fn single_metric_sample_fills_its_own_bounds() {
        let record = MetricMessage::new("queue.depth", 42.0).to_record();

        assert_eq!(record.count, 1);
        assert_eq!(record.min, 42.0);
        assert_eq!(record.max, 42.0);
        assert_eq!(record.namespace, "");
    }

    #[test]
    fn dependency_optional_columns_are_never_null() {
        let mut dependency = DependencyMessage::new("SQL", "db01", "SELECT orders", false, 310);
        dependency.result_code = Some("40001".to_string());

        let record = dependency.to_record();

        assert_eq!(record.data, "");
        assert_eq!(record.result_code, "40001");
        assert!(!record.success);
    }
}
