use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed tag set carried in every document's `type` metadata entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    EmployeeSummary,
    FinancialPattern,
    FinancialTrend,
    AdvancePattern,
    DomainKnowledge,
}

impl DocumentType {
    pub const ALL: [DocumentType; 5] = [
        DocumentType::EmployeeSummary,
        DocumentType::FinancialPattern,
        DocumentType::FinancialTrend,
        DocumentType::AdvancePattern,
        DocumentType::DomainKnowledge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::EmployeeSummary => "employee_summary",
            DocumentType::FinancialPattern => "financial_pattern",
            DocumentType::FinancialTrend => "financial_trend",
            DocumentType::AdvancePattern => "advance_pattern",
            DocumentType::DomainKnowledge => "domain_knowledge",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Unknown document type: {}", s))
    }
}

/// Scalar metadata value. Serialized untagged so payloads stay plain JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(b) => write!(f, "{}", b),
            MetadataValue::Int(i) => write!(f, "{}", i),
            MetadataValue::Float(x) => write!(f, "{}", x),
            MetadataValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Text(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Int(value)
    }
}

impl From<usize> for MetadataValue {
    fn from(value: usize) -> Self {
        MetadataValue::Int(value as i64)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Float(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

pub type Metadata = BTreeMap<String, MetadataValue>;

pub const META_TYPE: &str = "type";
pub const META_CREATED_AT: &str = "created_at";

/// A normalized text document. Immutable once handed to the index; an
/// "update" is a new document with a new id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
}

impl Document {
    /// Creates a document stamped with its type and the current time.
    pub fn new(doc_type: DocumentType, content: impl Into<String>) -> Self {
        Self::created_at(doc_type, content, Utc::now())
    }

    pub fn created_at(doc_type: DocumentType, content: impl Into<String>, at: DateTime<Utc>) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert(META_TYPE.to_string(), doc_type.as_str().into());
        metadata.insert(META_CREATED_AT.to_string(), at.to_rfc3339().into());
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            metadata,
        }
    }

    /// Adds a type-specific metadata field. `type` and `created_at` are reserved.
    pub fn with_meta(mut self, key: &str, value: impl Into<MetadataValue>) -> Self {
        if key != META_TYPE && key != META_CREATED_AT {
            self.metadata.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn doc_type(&self) -> Option<DocumentType> {
        self.meta_str(META_TYPE).and_then(|s| s.parse().ok())
    }

    pub fn type_tag(&self) -> &str {
        self.meta_str(META_TYPE).unwrap_or("unknown")
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.meta_str(META_CREATED_AT)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(MetadataValue::as_str)
    }
}

/// A document paired with its similarity to a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub document: Document,
    pub score: f32,
    /// Insertion order in the store that returned it; later inserts are greater.
    #[serde(default)]
    pub sequence: u64,
}

/// Ordered retrieval result: descending score, ties newest first, at most top-k.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievedContext {
    pub entries: Vec<ScoredDocument>,
}

impl RetrievedContext {
    pub fn new(entries: Vec<ScoredDocument>) -> Self {
        Self { entries }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScoredDocument> {
        self.entries.iter()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.document.id.as_str()).collect()
    }
}
