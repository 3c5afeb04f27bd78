//! Raw input records and point identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Separator between text and payload when hashing record content.
const CONTENT_SEPARATOR: char = '\u{1f}';

/// A raw input record as read from a batch source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Identifier supplied by the source, if any.
    pub id: Option<String>,
    /// Free text that gets embedded.
    pub text: String,
    /// Arbitrary metadata stored alongside the point.
    #[serde(default)]
    pub payload: serde_json::Map<String, serde_json::Value>,
    /// Dense embedding computed upstream, if the dataset ships one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dense: Option<Vec<f32>>,
}

impl Record {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: None,
            text: text.into(),
            payload: serde_json::Map::new(),
            dense: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    pub fn with_dense(mut self, dense: Vec<f32>) -> Self {
        self.dense = Some(dense);
        self
    }

    /// Resolve the point id for this record.
    ///
    /// Source ids win over the strategy. Numeric and UUID ids are kept as-is,
    /// other strings are mapped onto a UUIDv5 so the store accepts them.
    pub fn point_id(&self, strategy: IdStrategy) -> PointId {
        if let Some(ref id) = self.id {
            return PointId::from_source(id);
        }
        match strategy {
            IdStrategy::Random => PointId::Uuid(Uuid::new_v4()),
            IdStrategy::Content => PointId::Uuid(self.content_uuid()),
        }
    }

    fn content_uuid(&self) -> Uuid {
        // serde_json::Map is ordered by key, so this rendering is canonical.
        let payload = serde_json::Value::Object(self.payload.clone()).to_string();
        let name = format!("{}{}{}", self.text, CONTENT_SEPARATOR, payload);
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
    }
}

/// How ids are assigned to records that arrive without one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdStrategy {
    /// Fresh UUIDv4 per ingestion attempt. Re-running a partial ingest
    /// duplicates the points that already landed.
    Random,
    /// UUIDv5 derived from text and payload. Re-runs overwrite instead of duplicating.
    #[default]
    Content,
}

impl std::str::FromStr for IdStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "random" | "uuid4" => Ok(IdStrategy::Random),
            "content" | "hash" => Ok(IdStrategy::Content),
            _ => Err(format!("unknown id strategy: {}", s)),
        }
    }
}

impl fmt::Display for IdStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdStrategy::Random => write!(f, "random"),
            IdStrategy::Content => write!(f, "content"),
        }
    }
}

/// Identifier of a point in the vector store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointId {
    Num(u64),
    Uuid(Uuid),
}

impl PointId {
    pub fn from_source(id: &str) -> Self {
        let trimmed = id.trim();
        if let Ok(num) = trimmed.parse::<u64>() {
            return PointId::Num(num);
        }
        if let Ok(uuid) = Uuid::parse_str(trimmed) {
            return PointId::Uuid(uuid);
        }
        PointId::Uuid(Uuid::new_v5(&Uuid::NAMESPACE_OID, trimmed.as_bytes()))
    }
}

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointId::Num(n) => write!(f, "{}", n),
            PointId::Uuid(u) => write!(f, "{}", u),
        }
    }
}
