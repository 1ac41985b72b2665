//! ChangeRecord - upstream CDC detection output
//!
//! One detected database mutation. The router never mutates a change record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Metadata key carrying the change priority
pub const PRIORITY_METADATA_KEY: &str = "Priority";

/// Kind of database mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
    Truncate,
    SchemaChange,
}

impl ChangeOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Truncate => "truncate",
            Self::SchemaChange => "schema_change",
        }
    }
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "insert" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            "truncate" => Ok(Self::Truncate),
            "schema_change" | "schemachange" => Ok(Self::SchemaChange),
            other => Err(format!("unknown change operation '{other}'")),
        }
    }
}

/// Business priority attached to a change through the `Priority` metadata key
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ChangePriority {
    #[default]
    Low,
    Normal,
    High,
    Critical,
}

impl ChangePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl FromStr for ChangePriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

/// Opaque metadata value
///
/// The wire form is plain JSON: integers that fit in 32 bits become `Int`,
/// larger integers `Long`, floats `Double`. `DateTime` and `Priority` are
/// written as strings and read back as `String` unless the key is `Priority`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum MetadataValue {
    String(String),
    Int(i32),
    Long(i64),
    Double(f64),
    DateTime(DateTime<Utc>),
    Bool(bool),
    Priority(ChangePriority),
    Json(serde_json::Value),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Int(_) => "int",
            Self::Long(_) => "long",
            Self::Double(_) => "double",
            Self::DateTime(_) => "datetime",
            Self::Bool(_) => "bool",
            Self::Priority(_) => "priority",
            Self::Json(_) => "json",
        }
    }
}

impl From<serde_json::Value> for MetadataValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::String(s) => Self::String(s),
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    match i32::try_from(i) {
                        Ok(small) => Self::Int(small),
                        Err(_) => Self::Long(i),
                    }
                } else if let Some(f) = n.as_f64() {
                    Self::Double(f)
                } else {
                    Self::Json(Value::Number(n))
                }
            }
            other => Self::Json(other),
        }
    }
}

impl From<MetadataValue> for serde_json::Value {
    fn from(value: MetadataValue) -> Self {
        match value {
            MetadataValue::String(s) => serde_json::Value::String(s),
            MetadataValue::Int(i) => i.into(),
            MetadataValue::Long(l) => l.into(),
            MetadataValue::Double(d) => d.into(),
            MetadataValue::DateTime(dt) => serde_json::Value::String(dt.to_rfc3339()),
            MetadataValue::Bool(b) => b.into(),
            MetadataValue::Priority(p) => serde_json::Value::String(p.as_str().to_string()),
            MetadataValue::Json(v) => v,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i32> for MetadataValue {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<DateTime<Utc>> for MetadataValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::DateTime(value)
    }
}

impl From<ChangePriority> for MetadataValue {
    fn from(value: ChangePriority) -> Self {
        Self::Priority(value)
    }
}

/// Detected database change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Change identifier (unique per upstream source)
    pub id: String,

    /// Mutation kind
    pub operation: ChangeOperation,

    /// Detection timestamp (defaults to the time of parsing)
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Log position / offset token
    #[serde(default)]
    pub position: String,

    /// Column values and source annotations
    #[serde(default, deserialize_with = "deserialize_metadata")]
    pub metadata: HashMap<String, MetadataValue>,
}

impl ChangeRecord {
    /// Create a change with empty metadata
    pub fn new(
        id: impl Into<String>,
        operation: ChangeOperation,
        position: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            operation,
            timestamp: Utc::now(),
            position: position.into(),
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata entry (builder style)
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Override the detection timestamp (builder style)
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Priority carried in metadata, `Low` when absent or wrong-typed
    pub fn priority(&self) -> ChangePriority {
        match self.metadata.get(PRIORITY_METADATA_KEY) {
            Some(MetadataValue::Priority(p)) => *p,
            _ => ChangePriority::Low,
        }
    }
}

/// Plain JSON strings under the `Priority` key are lifted into `MetadataValue::Priority`
fn deserialize_metadata<'de, D>(deserializer: D) -> Result<HashMap<String, MetadataValue>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = HashMap::<String, MetadataValue>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                MetadataValue::String(s) if key == PRIORITY_METADATA_KEY => s
                    .parse::<ChangePriority>()
                    .map(MetadataValue::Priority)
                    .unwrap_or(MetadataValue::String(s)),
                other => other,
            };
            (key, value)
        })
        .collect())
}
