//! Embedded documents and their metadata

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Closed set of knowledge-base document kinds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    FinancialReport,
    Policy,
    Procedure,
    DataDictionary,
    Analysis,
    #[default]
    Other,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::FinancialReport => "financial_report",
            DocumentType::Policy => "policy",
            DocumentType::Procedure => "procedure",
            DocumentType::DataDictionary => "data_dictionary",
            DocumentType::Analysis => "analysis",
            DocumentType::Other => "other",
        }
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Document kind
    #[serde(rename = "type", default)]
    pub doc_type: DocumentType,

    /// Human-readable title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Where the document came from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Document date (YYYY-MM-DD)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,

    /// Owning company
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_id: Option<String>,

    /// Free-form keys
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl DocumentMetadata {
    pub fn new(doc_type: DocumentType) -> Self {
        Self {
            doc_type,
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    /// Look up a metadata key as JSON, covering both named and extra keys.
    pub fn field(&self, key: &str) -> Option<Value> {
        match key {
            "type" => Some(Value::String(self.doc_type.as_str().to_string())),
            "title" => self.title.clone().map(Value::String),
            "source" => self.source.clone().map(Value::String),
            "date" => self.date.clone().map(Value::String),
            "company_id" => self.company_id.clone().map(Value::String),
            other => self.extra.get(other).cloned(),
        }
    }
}

/// A stored document with its embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorDocument {
    pub id: String,
    pub content: String,
    pub metadata: DocumentMetadata,
    #[serde(default)]
    pub embedding: Vec<f32>,
}

/// A document that has not been embedded yet
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewDocument {
    /// Caller-assigned id; generated when absent
    #[serde(default)]
    pub id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub metadata: DocumentMetadata,
}

impl NewDocument {
    pub fn new(content: impl Into<String>, metadata: DocumentMetadata) -> Self {
        Self {
            id: None,
            content: content.into(),
            metadata,
        }
    }
}

/// Generate a document id of the form `doc_<unix_millis>_<9 chars>`.
pub fn generate_document_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(9).collect();
    format!("doc_{}_{}", millis, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_serialization() {
        let mut metadata = DocumentMetadata::new(DocumentType::DataDictionary).with_title("Metrics");
        metadata.extra.insert("department".into(), Value::String("finance".into()));

        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["type"], "data_dictionary");
        assert_eq!(json["title"], "Metrics");
        assert_eq!(json["department"], "finance");
        assert!(json.get("source").is_none());

        let back: DocumentMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(back, metadata);
    }

    #[test]
    fn test_missing_type_defaults_to_other() {
        let metadata: DocumentMetadata = serde_json::from_str(r#"{"title":"x"}"#).unwrap();
        assert_eq!(metadata.doc_type, DocumentType::Other);
    }

    #[test]
    fn test_field_lookup() {
        let mut metadata = DocumentMetadata::new(DocumentType::Policy).with_date("2025-01-01");
        metadata.extra.insert("owner".into(), Value::String("cfo".into()));
        assert_eq!(metadata.field("type"), Some(Value::String("policy".into())));
        assert_eq!(metadata.field("date"), Some(Value::String("2025-01-01".into())));
        assert_eq!(metadata.field("owner"), Some(Value::String("cfo".into())));
        assert_eq!(metadata.field("title"), None);
    }

    #[test]
    fn test_document_id_format() {
        let id = generate_document_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "doc");
        assert!(parts[1].parse::<u128>().is_ok());
        assert_eq!(parts[2].len(), 9);
        assert_ne!(id, generate_document_id());
    }
}
