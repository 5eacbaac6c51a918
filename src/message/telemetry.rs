// src/message/telemetry.rs

use serde::{Deserialize, Serialize};

use super::{Envelope, MessageHeader, MessageKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeverityLevel {
    Verbose,
    #[default]
    Information,
    Warning,
    Error,
    Critical,
}

impl SeverityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeverityLevel::Verbose => "Verbose",
            SeverityLevel::Information => "Information",
            SeverityLevel::Warning => "Warning",
            SeverityLevel::Error => "Error",
            SeverityLevel::Critical => "Critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceMessage {
    #[serde(flatten)]
    pub header: MessageHeader,
    pub message: String,
    #[serde(default)]
    pub severity_level: SeverityLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl TraceMessage {
    pub fn new(message: impl Into<String>, severity_level: SeverityLevel) -> Self {
        Self {
            header: MessageHeader::new(),
            message: message.into(),
            severity_level,
            category: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    #[serde(flatten)]
    pub header: MessageHeader,
    pub message: String,
    pub exception_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    #[serde(default = "error_severity")]
    pub severity_level: SeverityLevel,
}

fn error_severity() -> SeverityLevel {
    SeverityLevel::Error
}

impl ErrorMessage {
    pub fn new(message: impl Into<String>, exception_type: impl Into<String>) -> Self {
        Self {
            header: MessageHeader::new(),
            message: message.into(),
            exception_type: exception_type.into(),
            stack_trace: None,
            severity_level: SeverityLevel::Error,
        }
    }

    /// Builds an error message from any error, walking its `source()` chain
    /// into the stack trace field.
    pub fn from_error<E: std::error::Error + 'static>(err: &E) -> Self {
        let mut chain = Vec::new();
        let mut cause = err.source();
        while let Some(inner) = cause {
            chain.push(inner.to_string());
            cause = inner.source();
        }

        let type_name = std::any::type_name::<E>();
        let path = type_name.split('<').next().unwrap_or(type_name);
        let short_name = path.rsplit("::").next().unwrap_or(path);
        let mut message = Self::new(err.to_string(), short_name);
        if !chain.is_empty() {
            message.stack_trace = Some(chain.join("\ncaused by: "));
        }
        message
    }

    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricMessage {
    #[serde(flatten)]
    pub header: MessageHeader,
    pub name: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl MetricMessage {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            header: MessageHeader::new(),
            name: name.into(),
            value,
            namespace: None,
            count: None,
            min: None,
            max: None,
        }
    }

    /// Pre-aggregated sample set.
    pub fn aggregate(name: impl Into<String>, samples: &[f64]) -> Self {
        let sum: f64 = samples.iter().sum();
        let mut metric = Self::new(name, sum);
        metric.count = Some(samples.len() as u32);
        metric.min = samples.iter().copied().reduce(f64::min);
        metric.max = samples.iter().copied().reduce(f64::max);
        metric
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageViewMessage {
    #[serde(flatten)]
    pub header: MessageHeader,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl PageViewMessage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            header: MessageHeader::new(),
            name: name.into(),
            url: None,
            duration_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMessage {
    #[serde(flatten)]
    pub header: MessageHeader,
    pub name: String,
    pub url: String,
    pub response_code: u16,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_method: Option<String>,
}

impl RequestMessage {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        response_code: u16,
        duration_ms: u64,
    ) -> Self {
        Self {
            header: MessageHeader::new(),
            name: name.into(),
            url: url.into(),
            response_code,
            success: response_code < 400,
            duration_ms,
            http_method: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyMessage {
    #[serde(flatten)]
    pub header: MessageHeader,
    pub dependency_type: String,
    pub target: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_code: Option<String>,
    pub success: bool,
    pub duration_ms: u64,
}

impl DependencyMessage {
    pub fn new(
        dependency_type: impl Into<String>,
        target: impl Into<String>,
        name: impl Into<String>,
        success: bool,
        duration_ms: u64,
    ) -> Self {
        Self {
            header: MessageHeader::new(),
            dependency_type: dependency_type.into(),
            target: target.into(),
            name: name.into(),
            data: None,
            result_code: None,
            success,
            duration_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMessage {
    #[serde(flatten)]
    pub header: MessageHeader,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl EventMessage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            header: MessageHeader::new(),
            name: name.into(),
            data: None,
        }
    }
}

/// Smoke-test payload with no persistence mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestMessage {
    #[serde(flatten)]
    pub header: MessageHeader,
    pub message: String,
}

impl TestMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            header: MessageHeader::new(),
            message: message.into(),
        }
    }
}

macro_rules! impl_envelope {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl Envelope for $ty {
                const KIND: MessageKind = MessageKind::$kind;

                fn header(&self) -> &MessageHeader {
                    &self.header
                }

                fn header_mut(&mut self) -> &mut MessageHeader {
                    &mut self.header
                }
            }
        )*
    };
}

impl_envelope! {
    TraceMessage => Trace,
    ErrorMessage => Error,
    MetricMessage => Metric,
    PageViewMessage => PageView,
    RequestMessage => Request,
    DependencyMessage => Dependency,
    EventMessage => Event,
    TestMessage => Test,
}
