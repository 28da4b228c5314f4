//! Feed entry types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of mutation recorded by a feed entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

impl std::str::FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "insert" | "i" => Ok(Self::Insert),
            "update" | "u" => Ok(Self::Update),
            "delete" | "d" => Ok(Self::Delete),
            other => Err(format!("Unknown operation: {}", other)),
        }
    }
}

/// One record of the append-only change feed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedEntry {
    /// Position in the feed, assigned by the store (starts at 1)
    pub seq: u64,
    pub operation: Operation,
    /// Collection the mutation applied to
    pub collection: String,
    /// Document (insert/update) or `{"_id": ...}` (delete)
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl FeedEntry {
    pub fn new(seq: u64, operation: Operation, collection: impl Into<String>, payload: Value) -> Self {
        Self {
            seq,
            operation,
            collection: collection.into(),
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Identifier of the document this entry touches, if it carries one
    pub fn document_id(&self) -> Option<&str> {
        self.payload.get(crate::ID_FIELD).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Operation::Insert).unwrap(), r#""insert""#);
        assert_eq!(serde_json::to_string(&Operation::Delete).unwrap(), r#""delete""#);
    }

    #[test]
    fn test_operation_from_str() {
        assert_eq!("Insert".parse::<Operation>().unwrap(), Operation::Insert);
        assert_eq!("u".parse::<Operation>().unwrap(), Operation::Update);
        assert!("upsert".parse::<Operation>().is_err());
    }

    #[test]
    fn test_document_id() {
        let entry = FeedEntry::new(1, Operation::Insert, "instruction", json!({"_id": "abc", "x": 1}));
        assert_eq!(entry.document_id(), Some("abc"));

        let entry = FeedEntry::new(2, Operation::Insert, "instruction", json!({"x": 1}));
        assert_eq!(entry.document_id(), None);
    }
}
