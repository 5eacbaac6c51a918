// src/message/mod.rs
//! Message envelopes: identity, correlation and send time, plus one payload
//! type per telemetry kind.

mod telemetry;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

pub use telemetry::{
    DependencyMessage, ErrorMessage, EventMessage, MetricMessage, PageViewMessage, RequestMessage,
    SeverityLevel, TestMessage, TraceMessage,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    Trace,
    Error,
    Metric,
    PageView,
    Request,
    Dependency,
    Event,
    Test,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Trace => "Trace",
            MessageKind::Error => "Error",
            MessageKind::Metric => "Metric",
            MessageKind::PageView => "PageView",
            MessageKind::Request => "Request",
            MessageKind::Dependency => "Dependency",
            MessageKind::Event => "Event",
            MessageKind::Test => "Test",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity, correlation and timestamp shared by every envelope.
///
/// A nil `id` and an empty `operation_id` mean "not assigned yet". The
/// timestamp can only be written by the publisher.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHeader {
    #[serde(default)]
    pub id: Uuid,
    #[serde(default)]
    pub operation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<DateTime<Utc>>,
}

impl MessageHeader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_operation_id(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = operation_id.into();
        self
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    pub fn is_stamped(&self) -> bool {
        !self.id.is_nil() && !self.operation_id.is_empty() && self.timestamp.is_some()
    }

    /// Fills a missing id and operation id, then overwrites the timestamp.
    pub(crate) fn stamp(&mut self, now: DateTime<Utc>) {
        if self.id.is_nil() {
            self.id = Uuid::new_v4();
        }
        if self.operation_id.is_empty() {
            self.operation_id = self.id.to_string();
        }
        self.timestamp = Some(now);
    }
}

pub trait Envelope: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: MessageKind;

    fn header(&self) -> &MessageHeader;

    fn header_mut(&mut self) -> &mut MessageHeader;

    fn id(&self) -> Uuid {
        self.header().id
    }

    fn operation_id(&self) -> &str {
        &self.header().operation_id
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.header().timestamp()
    }
}
