//! Telemetry type definitions
//!
//! The subset of the Application Insights envelope schema that azdiag sends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::time::Duration;

/// Custom dimensions attached to an item
pub type Properties = BTreeMap<String, String>;

/// Schema version of every data item
const DATA_VERSION: u8 = 2;

/// One telemetry item as posted to `v2/track`
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub name: String,
    pub time: DateTime<Utc>,
    #[serde(rename = "iKey")]
    pub instrumentation_key: String,
    pub tags: BTreeMap<String, String>,
    pub data: TelemetryData,
}

impl Envelope {
    pub fn new(instrumentation_key: &str, data: TelemetryData) -> Self {
        Self {
            name: format!(
                "Microsoft.ApplicationInsights.{}.{}",
                instrumentation_key.replace('-', ""),
                data.item_type()
            ),
            time: Utc::now(),
            instrumentation_key: instrumentation_key.to_string(),
            tags: BTreeMap::new(),
            data,
        }
    }

    pub fn with_tag(mut self, key: &str, value: impl Into<String>) -> Self {
        self.tags.insert(key.to_string(), value.into());
        self
    }
}

/// `baseType` / `baseData` pair
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "baseType", content = "baseData")]
pub enum TelemetryData {
    MessageData(TraceTelemetry),
    ExceptionData(ExceptionTelemetry),
    MetricData(MetricTelemetry),
    RemoteDependencyData(DependencyTelemetry),
}

impl TelemetryData {
    fn item_type(&self) -> &'static str {
        match self {
            Self::MessageData(_) => "Message",
            Self::ExceptionData(_) => "Exception",
            Self::MetricData(_) => "Metric",
            Self::RemoteDependencyData(_) => "RemoteDependency",
        }
    }
}

/// Severity levels, sent as their numeric value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeverityLevel {
    Verbose = 0,
    #[default]
    Information = 1,
    Warning = 2,
    Error = 3,
    Critical = 4,
}

impl Serialize for SeverityLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceTelemetry {
    pub ver: u8,
    pub message: String,
    pub severity_level: SeverityLevel,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
}

impl TraceTelemetry {
    pub fn new(message: impl Into<String>, severity_level: SeverityLevel) -> Self {
        Self {
            ver: DATA_VERSION,
            message: message.into(),
            severity_level,
            properties: Properties::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    pub type_name: String,
    pub message: String,
    pub has_full_stack: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionTelemetry {
    pub ver: u8,
    pub exceptions: Vec<ExceptionDetails>,
    pub severity_level: SeverityLevel,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
}

impl ExceptionTelemetry {
    /// One exception entry per error in the chain, outermost first
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        let mut exceptions = Vec::new();
        let mut current = Some(error);
        while let Some(e) = current {
            exceptions.push(ExceptionDetails {
                type_name: "Error".to_string(),
                message: e.to_string(),
                has_full_stack: false,
            });
            current = e.source();
        }
        Self {
            ver: DATA_VERSION,
            exceptions,
            severity_level: SeverityLevel::Error,
            properties: Properties::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPoint {
    pub name: String,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricTelemetry {
    pub ver: u8,
    pub metrics: Vec<DataPoint>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
}

impl MetricTelemetry {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            ver: DATA_VERSION,
            metrics: vec![DataPoint {
                name: name.into(),
                value,
                count: None,
            }],
            properties: Properties::new(),
        }
    }
}

/// A call to an external dependency
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyTelemetry {
    pub ver: u8,
    pub name: String,
    /// Command or URL of the call
    pub data: String,
    pub target: String,
    #[serde(rename = "type")]
    pub dependency_type: String,
    #[serde(serialize_with = "serialize_timespan")]
    pub duration: Duration,
    pub result_code: String,
    pub success: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
}

/// Describes a dependency call before it is made
#[derive(Debug, Clone)]
pub struct DependencyCall {
    pub dependency_type: String,
    pub name: String,
    pub data: String,
    pub target: String,
    pub properties: Properties,
}

impl DependencyCall {
    pub fn new(
        dependency_type: impl Into<String>,
        name: impl Into<String>,
        data: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            dependency_type: dependency_type.into(),
            name: name.into(),
            data: data.into(),
            target: target.into(),
            properties: Properties::new(),
        }
    }

    pub fn with_property(mut self, key: &str, value: impl ToString) -> Self {
        self.properties.insert(key.to_string(), value.to_string());
        self
    }

    pub(crate) fn complete(
        self,
        duration: Duration,
        success: bool,
        extra: Properties,
    ) -> DependencyTelemetry {
        let mut properties = self.properties;
        properties.extend(extra);
        DependencyTelemetry {
            ver: DATA_VERSION,
            name: self.name,
            data: self.data,
            target: self.target,
            dependency_type: self.dependency_type,
            duration,
            result_code: if success { "200" } else { "500" }.to_string(),
            success,
            properties,
        }
    }
}

/// `[d.]hh:mm:ss.fff`
pub fn format_timespan(duration: Duration) -> String {
    let total_ms = duration.as_millis();
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    let secs = total_secs % 60;
    let mins = (total_secs / 60) % 60;
    let hours = (total_secs / 3600) % 24;
    let days = total_secs / 86400;
    if days > 0 {
        format!("{}.{:02}:{:02}:{:02}.{:03}", days, hours, mins, secs, ms)
    } else {
        format!("{:02}:{:02}:{:02}.{:03}", hours, mins, secs, ms)
    }
}

fn serialize_timespan<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_timespan(*duration))
}

/// Response body of `v2/track`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items_received: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items_accepted: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<serde_json::Value>>,
}

impl IngestionResponse {
    pub fn error_count(&self) -> usize {
        self.errors.as_ref().map(Vec::len).unwrap_or(0)
    }

    /// Exactly `sent` items received and accepted, without errors
    pub fn accepted_all(&self, sent: u64) -> bool {
        self.items_received == Some(sent)
            && self.items_accepted == Some(sent)
            && self.error_count() == 0
    }
}
