use serde::{Deserialize, Serialize};

/// Identifier of a record as provided by the caller.
///
/// `Generate` asks the writer for a fresh random id. An empty `Supplied`
/// string is not the same as `Generate`: it is rejected at submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordId {
    Supplied(String),
    Generate,
}

impl RecordId {
    pub fn supplied(id: impl Into<String>) -> Self {
        RecordId::Supplied(id.into())
    }
}

impl From<Option<String>> for RecordId {
    fn from(id: Option<String>) -> Self {
        id.map_or(RecordId::Generate, RecordId::Supplied)
    }
}

/// A record as built by the caller, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: RecordId,
    pub title: String,
    pub author: String,
}

impl Record {
    pub fn new(id: RecordId, title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            author: author.into(),
        }
    }

    /// Attach the resolved id and submission timestamp.
    pub fn stamp(self, id: String, updated_at: i64) -> StampedRecord {
        StampedRecord {
            id,
            title: self.title,
            author: self.author,
            updated_at,
        }
    }
}

/// Normalized record, the document actually persisted by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StampedRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub author: String,
    /// Unix seconds.
    pub updated_at: i64,
}
